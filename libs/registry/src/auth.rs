use crate::error::{CheckError, Result};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use oci_client::secrets::RegistryAuth;
use serde::{Deserialize, Serialize};

/// One entry of the `auths` mapping in a docker config JSON.
///
/// Matches the conventional docker credential descriptor: either an explicit
/// username/password pair, a pre-encoded `auth` field (`base64(user:pass)`),
/// or a registry/identity token.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identitytoken: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registrytoken: Option<String>,
}

impl AuthConfig {
    /// Resolve the descriptor into the credential used for registry calls.
    ///
    /// An entry with no usable material resolves to anonymous access rather
    /// than an error; whether anonymous access suffices is for the registry
    /// to decide.
    pub fn registry_auth(&self) -> Result<RegistryAuth> {
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            return Ok(RegistryAuth::Basic(username.clone(), password.clone()));
        }

        if let Some(token) = self.registrytoken.as_ref().or(self.identitytoken.as_ref()) {
            return Ok(RegistryAuth::Bearer(token.clone()));
        }

        if let Some(auth) = &self.auth {
            let decoded = BASE64
                .decode(auth.trim())
                .map_err(|e| CheckError::BadAuthConfig(format!("auth field is not base64: {e}")))?;
            let decoded = String::from_utf8(decoded).map_err(|e| {
                CheckError::BadAuthConfig(format!("auth field is not valid UTF-8: {e}"))
            })?;
            let (username, password) = decoded.trim_end().split_once(':').ok_or_else(|| {
                CheckError::BadAuthConfig("auth field is not user:password".to_string())
            })?;
            return Ok(RegistryAuth::Basic(
                username.to_string(),
                password.to_string(),
            ));
        }

        Ok(RegistryAuth::Anonymous)
    }
}
