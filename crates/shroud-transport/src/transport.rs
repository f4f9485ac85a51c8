//! Transport trait abstraction for multiple stream backends.
//!
//! This module defines the core [`Transport`] trait that abstracts over the
//! connection-oriented backends the tunnel can run on (plain TCP, or an ARQ
//! session over UDP). Relay code dials, listens and accepts through this
//! trait and handles every connection as an opaque [`Connection`].

use crate::factory::TransportKind;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error from underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport is closed
    #[error("Transport is closed")]
    Closed,

    /// Address binding failed
    #[error("Failed to bind to address: {0}")]
    BindFailed(String),

    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Address could not be resolved
    #[error("Failed to resolve address: {0}")]
    Resolve(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// A bidirectional byte stream produced by a transport.
///
/// Implemented for every `AsyncRead + AsyncWrite` type that can move
/// between tasks.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Boxed connection handed out by [`Transport::dial`] and [`Listener::accept`].
///
/// Dropping it closes the connection.
pub type Connection = Box<dyn Stream>;

/// Connection-oriented transport backend.
///
/// # Examples
///
/// ```no_run
/// use shroud_transport::factory::{TransportFactory, TransportKind};
/// use shroud_transport::ArqConfig;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = TransportFactory::create(TransportKind::Tcp, &ArqConfig::default());
/// let mut listener = transport.listen("127.0.0.1:0").await?;
/// let (conn, from) = listener.accept().await?;
/// println!("accepted {} over {}", from, transport.kind());
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to `addr` (`host:port`).
    ///
    /// # Errors
    /// Returns `TransportError` if the address cannot be resolved or the
    /// connection cannot be established.
    async fn dial(&self, addr: &str) -> TransportResult<Connection>;

    /// Start listening on `addr` (`host:port`).
    ///
    /// # Errors
    /// Returns `TransportError` if the address cannot be resolved or bound.
    async fn listen(&self, addr: &str) -> TransportResult<Box<dyn Listener>>;

    /// Which backend this is.
    fn kind(&self) -> TransportKind;
}

/// Accepting side of a [`Transport`].
#[async_trait]
pub trait Listener: Send {
    /// Wait for the next inbound connection.
    ///
    /// # Errors
    /// Returns `TransportError` if accepting fails. Failures are usually
    /// transient; callers may keep accepting.
    async fn accept(&mut self) -> TransportResult<(Connection, SocketAddr)>;

    /// Local address the listener is bound to.
    ///
    /// # Errors
    /// Returns `TransportError` if the address cannot be determined
    fn local_addr(&self) -> TransportResult<SocketAddr>;
}

/// Resolve `host:port` to the first matching socket address.
pub(crate) async fn resolve(addr: &str) -> TransportResult<SocketAddr> {
    tokio::net::lookup_host(addr)
        .await
        .map_err(|e| TransportError::Resolve(format!("{addr}: {e}")))?
        .next()
        .ok_or_else(|| TransportError::Resolve(format!("{addr}: no addresses")))
}
