//! TCP backend.
//!
//! Plain connection-oriented transport with no extra framing. Dialed and
//! accepted sockets get `TCP_NODELAY` and a kernel keepalive, so a peer that
//! vanishes without a FIN eventually unblocks pending reads.

use crate::factory::TransportKind;
use crate::transport::{Connection, Listener, Transport, TransportError, TransportResult};
use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

/// Idle time before the first keepalive packet
const KEEPALIVE_TIME: Duration = Duration::from_secs(15);

/// TCP transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl TcpTransport {
    /// Create a TCP transport.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn configure(stream: &TcpStream) -> TransportResult<()> {
    stream.set_nodelay(true)?;
    SockRef::from(stream).set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_TIME))?;
    Ok(())
}

#[async_trait]
impl Transport for TcpTransport {
    async fn dial(&self, addr: &str) -> TransportResult<Connection> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{addr}: {e}")))?;
        configure(&stream)?;
        Ok(Box::new(stream))
    }

    async fn listen(&self, addr: &str) -> TransportResult<Box<dyn Listener>> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(format!("{addr}: {e}")))?;
        Ok(Box::new(TcpAcceptor { listener }))
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }
}

/// Accepting side of [`TcpTransport`].
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
}

#[async_trait]
impl Listener for TcpAcceptor {
    async fn accept(&mut self) -> TransportResult<(Connection, SocketAddr)> {
        let (stream, from) = self.listener.accept().await?;
        configure(&stream)?;
        Ok((Box::new(stream), from))
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.listener.local_addr().map_err(TransportError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_tcp_dial_accept() {
        let transport = TcpTransport::new();
        let mut listener = transport.listen("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut conn = TcpTransport::new().dial(&addr.to_string()).await.unwrap();
            conn.write_all(b"over tcp").await.unwrap();
        });

        let (mut conn, from) = listener.accept().await.unwrap();
        assert!(from.ip().is_loopback());

        let mut buf = [0u8; 8];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"over tcp");
        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_dial_refused() {
        // Bind then drop to get a port nobody listens on
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let result = TcpTransport::new().dial(&addr.to_string()).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_tcp_listen_invalid_addr() {
        let result = TcpTransport::new().listen("not-an-address").await;
        assert!(matches!(result, Err(TransportError::BindFailed(_))));
    }

    #[test]
    fn test_tcp_kind() {
        assert_eq!(TcpTransport::new().kind(), TransportKind::Tcp);
    }
}
