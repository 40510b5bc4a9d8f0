//! Registry credential verification.
//!
//! A docker-config secret lists registries with their login material. This
//! crate answers one question per entry: can these credentials authenticate
//! against the registry and retrieve a given image reference?

pub mod auth;
pub mod client;
pub mod error;

pub use auth::AuthConfig;
pub use client::{CheckImage, OciRegistryClient};
pub use error::CheckError;
