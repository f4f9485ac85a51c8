//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Shared secret was empty
    #[error("shared secret must not be empty")]
    EmptySecret,

    /// Invalid nonce length
    #[error("invalid nonce length")]
    InvalidNonceLength,

    /// Random number generation failed
    #[error("random number generation failed")]
    RandomFailed,

    /// Nonce could not be written to the underlying connection
    #[error("write nonce failed: {0}")]
    NonceWrite(#[source] std::io::Error),
}
