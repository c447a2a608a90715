//! Payment-gateway request signing and callback verification.
//!
//! The gateway speaks an RSA2 (RSA-SHA256, PKCS#1 v1.5) signed query
//! protocol: outbound requests are canonicalized, signed with the
//! merchant private key and handed to the user's browser as a redirect
//! URL; inbound callbacks carry a detached signature that is checked
//! against the gateway's public key before any order state is touched.

pub mod canonical;
pub mod gateway;

pub use gateway::{GatewayClient, GatewayConfig};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("cannot read key material: {0}")]
    KeyFile(#[from] std::io::Error),

    #[error("invalid PEM key material: {0}")]
    InvalidKey(#[source] openssl::error::ErrorStack),

    #[error("unserializable parameter value: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("signature computation failed: {0}")]
    Signing(#[source] openssl::error::ErrorStack),
}
