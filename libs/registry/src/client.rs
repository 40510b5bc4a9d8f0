use crate::auth::AuthConfig;
use crate::error::{CheckError, Result};

use std::future::Future;

use oci_client::client::ClientConfig;
use oci_client::{Client, Reference};
use tracing::debug;

/// Capability to verify that one registry entry of an image-pull secret
/// actually works. The admission pipeline is constructed over any
/// implementation of this trait, which is also the seam for test stubs.
pub trait CheckImage {
    /// Check that `auth` authenticates against `registry` and that
    /// `registry/image` is retrievable with it.
    fn check_image(
        &self,
        registry: &str,
        image: &str,
        auth: &AuthConfig,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Registry client backed by the OCI distribution API.
///
/// Validates a credential by fetching the manifest digest of the configured
/// image, which exercises both the auth handshake and repository access
/// without downloading any layer.
#[derive(Clone, Default)]
pub struct OciRegistryClient {
    client: Client,
}

impl OciRegistryClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(ClientConfig::default()),
        }
    }
}

impl CheckImage for OciRegistryClient {
    async fn check_image(&self, registry: &str, image: &str, auth: &AuthConfig) -> Result<()> {
        let raw = format!("{}/{}", normalize_registry(registry), image);
        let reference =
            Reference::try_from(raw.as_str()).map_err(|source| CheckError::InvalidReference {
                reference: raw.clone(),
                source,
            })?;
        let registry_auth = auth.registry_auth()?;

        debug!("checking image {reference}");
        let digest = self
            .client
            .fetch_manifest_digest(&reference, &registry_auth)
            .await
            .map_err(|source| CheckError::ImageCheck {
                reference: reference.to_string(),
                source,
            })?;
        debug!("image {reference} resolved to {digest}");
        Ok(())
    }
}

/// Map a docker config registry key to a plain host for reference building.
/// Keys are frequently written with a scheme or in the legacy Docker Hub
/// form (`https://index.docker.io/v1/`).
fn normalize_registry(registry: &str) -> &str {
    let registry = registry
        .strip_prefix("https://")
        .or_else(|| registry.strip_prefix("http://"))
        .unwrap_or(registry);
    let registry = registry.trim_end_matches('/');
    match registry {
        "index.docker.io/v1" | "index.docker.io/v2" | "index.docker.io" => "docker.io",
        _ => registry,
    }
}
