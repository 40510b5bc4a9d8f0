use thiserror::Error;

#[derive(Error, Debug)]
pub enum CheckError {
    #[error("invalid image reference {reference}: {source}")]
    InvalidReference {
        reference: String,
        #[source]
        source: oci_client::ParseError,
    },

    #[error("invalid auth config: {0}")]
    BadAuthConfig(String),

    #[error("can't pull {reference}: {source}")]
    ImageCheck {
        reference: String,
        #[source]
        source: oci_client::errors::OciDistributionError,
    },
}

pub type Result<T, E = CheckError> = std::result::Result<T, E>;
