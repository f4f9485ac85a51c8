//! Transport factory for creating transport instances.
//!
//! The backend is picked once at startup from configuration and handed to
//! the tunnel as an `Arc<dyn Transport>`.

use crate::arq::{ArqConfig, ArqTransport};
use crate::tcp::TcpTransport;
use crate::transport::{Transport, TransportError};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Transport backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// Plain TCP
    #[default]
    Tcp,
    /// Reliable ARQ session over UDP
    Arq,
}

impl TransportKind {
    /// Configuration name of this backend.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Arq => "arq",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "arq" | "kcp" | "udp" => Ok(Self::Arq),
            other => Err(TransportError::InvalidConfig(format!(
                "unknown transport '{other}' (expected tcp or arq)"
            ))),
        }
    }
}

/// Factory for creating transport instances.
///
/// # Examples
///
/// ```no_run
/// use shroud_transport::factory::{TransportFactory, TransportKind};
/// use shroud_transport::ArqConfig;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = TransportFactory::create(TransportKind::Arq, &ArqConfig::default());
/// let conn = transport.dial("127.0.0.1:2001").await?;
/// # Ok(())
/// # }
/// ```
pub struct TransportFactory;

impl TransportFactory {
    /// Create the transport for `kind`.
    ///
    /// `arq` tunes the ARQ backend and is ignored for TCP.
    #[must_use]
    pub fn create(kind: TransportKind, arq: &ArqConfig) -> Arc<dyn Transport> {
        match kind {
            TransportKind::Tcp => Arc::new(TcpTransport::new()),
            TransportKind::Arq => Arc::new(ArqTransport::new(arq.clone())),
        }
    }
}
