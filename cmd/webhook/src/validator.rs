use std::collections::HashMap;

use k8s_openapi::api::core::v1::Secret;
use pullcheck_registry::{AuthConfig, CheckError, CheckImage};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Secret type that marks an image-pull secret.
pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";

/// Data field holding the docker config payload inside such a secret.
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

/// The payload of the `.dockerconfigjson` field: registry host to
/// credential descriptor. An absent `auths` key decodes to an empty map
/// and fails validation the same way a present-but-empty one does.
#[derive(Deserialize)]
pub struct DockerConfig {
    #[serde(default)]
    pub auths: HashMap<String, AuthConfig>,
}

/// Why a structurally-decodable review gets denied. The Display output of
/// the first failing check is the denial message, verbatim.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("can't deserialize secret: {0}")]
    MalformedSecret(#[source] serde_json::Error),

    #[error("secret should be {} type", DOCKER_CONFIG_JSON_TYPE)]
    WrongSecretType,

    #[error("secret should contain {} field", DOCKER_CONFIG_JSON_KEY)]
    MissingConfigField,

    #[error("can't deserialize docker config: {0}")]
    BadConfigEncoding(#[source] serde_json::Error),

    #[error("bad docker config")]
    EmptyAuths,

    #[error(transparent)]
    Registry(#[from] CheckError),
}

/// Decode the raw object carried by the admission request into a Secret.
/// A request without an object fails here like any other non-Secret
/// payload.
pub fn decode_secret(object: Option<serde_json::Value>) -> Result<Secret, ValidationError> {
    serde_json::from_value(object.unwrap_or(serde_json::Value::Null))
        .map_err(ValidationError::MalformedSecret)
}

/// Run the ordered structural checks over the secret, then verify every
/// registry entry against the configured image. Checks short-circuit on
/// the first failure; with several broken registries only one is reported.
pub async fn validate_secret<C: CheckImage>(
    secret: &Secret,
    image: &str,
    checker: &C,
) -> Result<(), ValidationError> {
    if secret.type_.as_deref() != Some(DOCKER_CONFIG_JSON_TYPE) {
        return Err(ValidationError::WrongSecretType);
    }

    let raw = secret
        .data
        .as_ref()
        .and_then(|data| data.get(DOCKER_CONFIG_JSON_KEY))
        .ok_or(ValidationError::MissingConfigField)?;

    let config: DockerConfig =
        serde_json::from_slice(&raw.0).map_err(ValidationError::BadConfigEncoding)?;

    if config.auths.is_empty() {
        return Err(ValidationError::EmptyAuths);
    }

    for (registry, auth) in &config.auths {
        debug!("checking registry {registry}");
        checker.check_image(registry, image, auth).await?;
    }

    Ok(())
}
