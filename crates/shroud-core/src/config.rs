//! Tunnel configuration.
//!
//! A [`TunnelConfig`] is built once at startup and never changes afterwards;
//! every connection handler reads it through a shared `Arc`.

use crate::error::{Error, Result};
use shroud_crypto::SessionKey;
use shroud_transport::{ArqConfig, TransportKind};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Default listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:2000";

/// Default peer address
pub const DEFAULT_REMOTE_ADDR: &str = "127.0.0.1:2001";

/// Which side of the tunnel an endpoint is.
///
/// Role A sits next to the client: it accepts cleartext and encrypts toward
/// the peer. Role B sits next to the destination: it accepts ciphertext and
/// forwards cleartext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Cleartext in, ciphertext out
    #[default]
    A,
    /// Ciphertext in, cleartext out
    B,
}

impl Role {
    /// Transport the endpoint listens on, given the tunnel's transport.
    #[must_use]
    pub fn listen_kind(self, tunnel: TransportKind) -> TransportKind {
        match self {
            Self::A => TransportKind::Tcp,
            Self::B => tunnel,
        }
    }

    /// Transport the endpoint dials out on, given the tunnel's transport.
    #[must_use]
    pub fn dial_kind(self, tunnel: TransportKind) -> TransportKind {
        match self {
            Self::A => tunnel,
            Self::B => TransportKind::Tcp,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => f.write_str("A"),
            Self::B => f.write_str("B"),
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "A" | "a" => Ok(Self::A),
            "B" | "b" => Ok(Self::B),
            other => Err(Error::InvalidRole(other.to_string())),
        }
    }
}

/// Immutable endpoint configuration.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    listen_addr: String,
    remote_addr: String,
    role: Role,
    transport: TransportKind,
    key: Arc<SessionKey>,
    arq: ArqConfig,
}

impl TunnelConfig {
    /// Build a configuration, deriving the session key from `secret`.
    ///
    /// Uses the TCP transport and default ARQ tuning; see
    /// [`with_transport`](Self::with_transport) and [`with_arq`](Self::with_arq).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cipher`] if `secret` is empty.
    pub fn new(
        listen_addr: impl Into<String>,
        remote_addr: impl Into<String>,
        role: Role,
        secret: &str,
    ) -> Result<Self> {
        let key = SessionKey::derive(secret)?;
        Ok(Self::with_key(listen_addr, remote_addr, role, Arc::new(key)))
    }

    /// Build a configuration from an already derived key.
    #[must_use]
    pub fn with_key(
        listen_addr: impl Into<String>,
        remote_addr: impl Into<String>,
        role: Role,
        key: Arc<SessionKey>,
    ) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            remote_addr: remote_addr.into(),
            role,
            transport: TransportKind::default(),
            key,
            arq: ArqConfig::default(),
        }
    }

    /// Select the tunnel transport between the two endpoints.
    #[must_use]
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Replace the ARQ tuning.
    #[must_use]
    pub fn with_arq(mut self, arq: ArqConfig) -> Self {
        self.arq = arq;
        self
    }

    /// Address to accept connections on.
    #[must_use]
    pub fn listen_addr(&self) -> &str {
        &self.listen_addr
    }

    /// Address each accepted connection is relayed to.
    #[must_use]
    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// Endpoint role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Transport used between the two tunnel endpoints.
    #[must_use]
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Shared session key.
    #[must_use]
    pub fn key(&self) -> &Arc<SessionKey> {
        &self.key
    }

    /// ARQ tuning.
    #[must_use]
    pub fn arq(&self) -> &ArqConfig {
        &self.arq
    }
}
