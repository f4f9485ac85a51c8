//! Error types for tunnel endpoints.
//!
//! Errors fall into three groups, matching how far their effect reaches:
//!
//! - **Startup**: [`Error::Listen`], [`Error::InvalidRole`] and key
//!   derivation failures. The endpoint cannot run.
//! - **Listener**: [`Error::ListenerClosed`]. The accept loop ends.
//! - **Per connection**: [`Error::Dial`] and [`Error::Cipher`]. Only the one
//!   connection being set up is abandoned.

use shroud_crypto::CryptoError;
use shroud_transport::TransportError;
use thiserror::Error;

/// Tunnel errors
#[derive(Debug, Error)]
pub enum Error {
    /// Could not start listening
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        /// Configured listen address
        addr: String,
        /// Underlying transport error
        #[source]
        source: TransportError,
    },

    /// Could not open the outbound leg of a connection
    #[error("failed to dial {addr}: {source}")]
    Dial {
        /// Address dialed
        addr: String,
        /// Underlying transport error
        #[source]
        source: TransportError,
    },

    /// Key derivation or cipher stream setup failed
    #[error("cipher error: {0}")]
    Cipher(#[from] CryptoError),

    /// Other transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The listener can no longer accept connections
    #[error("listener closed")]
    ListenerClosed,

    /// Unrecognised role name
    #[error("invalid role '{0}' (expected A or B)")]
    InvalidRole(String),
}

/// Result type for tunnel operations
pub type Result<T> = std::result::Result<T, Error>;
