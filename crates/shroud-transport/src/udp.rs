//! UDP datagram socket for the ARQ backend.
//!
//! Wraps a Tokio `UdpSocket` set up through `socket2` so the kernel buffers
//! can be enlarged before binding.

use crate::datagram::{DatagramStats, DatagramTransport};
use crate::transport::{TransportError, TransportResult};
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::net::UdpSocket;
use tokio::sync::Notify;

/// Kernel buffer size requested for each direction
const SOCKET_BUFFER_SIZE: usize = 2 * 1024 * 1024;

#[derive(Debug, Default)]
struct Counters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    send_errors: AtomicU64,
    recv_errors: AtomicU64,
}

impl Counters {
    fn sent(&self, len: usize) {
        self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn received(&self, len: usize) {
        self.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DatagramStats {
        DatagramStats {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            recv_errors: self.recv_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
struct Shared {
    socket: UdpSocket,
    closed: AtomicBool,
    shutdown: Notify,
    counters: Counters,
}

/// UDP socket implementing [`DatagramTransport`].
///
/// Clones share one socket. Closing any clone fails every later send and
/// wakes every pending `recv_from` with [`TransportError::Closed`].
///
/// # Examples
///
/// ```no_run
/// use shroud_transport::datagram::DatagramTransport;
/// use shroud_transport::udp::UdpDatagram;
/// use std::net::SocketAddr;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let socket = UdpDatagram::bind("127.0.0.1:0".parse::<SocketAddr>()?).await?;
/// socket.send_to(b"ping", "127.0.0.1:2001".parse()?).await?;
///
/// let mut buf = vec![0u8; 1500];
/// let (len, from) = socket.recv_from(&mut buf).await?;
/// println!("{len} bytes from {from}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct UdpDatagram {
    shared: Arc<Shared>,
}

fn bind_failed(addr: SocketAddr) -> impl Fn(std::io::Error) -> TransportError {
    move |e| TransportError::BindFailed(format!("{addr}: {e}"))
}

impl UdpDatagram {
    /// Bind a socket on `addr`. Port 0 picks an ephemeral port.
    ///
    /// # Errors
    /// Returns `TransportError::BindFailed` if the socket cannot be created,
    /// configured or bound.
    pub async fn bind<A: Into<SocketAddr>>(addr: A) -> TransportResult<Self> {
        let addr = addr.into();
        let err = bind_failed(addr);

        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
            .map_err(&err)?;
        socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE).map_err(&err)?;
        socket.set_send_buffer_size(SOCKET_BUFFER_SIZE).map_err(&err)?;
        socket.set_nonblocking(true).map_err(&err)?;
        socket.bind(&addr.into()).map_err(&err)?;

        let socket = UdpSocket::from_std(socket.into()).map_err(&err)?;
        Ok(Self::from_socket(socket))
    }

    /// Wrap an already bound Tokio socket.
    #[must_use]
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            shared: Arc::new(Shared {
                socket,
                closed: AtomicBool::new(false),
                shutdown: Notify::new(),
                counters: Counters::default(),
            }),
        }
    }
}

#[async_trait]
impl DatagramTransport for UdpDatagram {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> TransportResult<usize> {
        let shared = &self.shared;
        if shared.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        match shared.socket.send_to(buf, addr).await {
            Ok(len) => {
                shared.counters.sent(len);
                Ok(len)
            }
            Err(e) => {
                shared.counters.send_errors.fetch_add(1, Ordering::Relaxed);
                Err(e.into())
            }
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)> {
        let shared = &self.shared;

        // Register for the close notification before checking the flag, so
        // a close in between cannot be missed
        let closing = shared.shutdown.notified();
        tokio::pin!(closing);
        closing.as_mut().enable();
        if shared.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        tokio::select! {
            () = &mut closing => Err(TransportError::Closed),
            result = shared.socket.recv_from(buf) => {
                let (len, from) = result.inspect_err(|_| {
                    shared.counters.recv_errors.fetch_add(1, Ordering::Relaxed);
                })?;
                shared.counters.received(len);
                Ok((len, from))
            }
        }
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.shared.socket.local_addr()?)
    }

    async fn close(&self) -> TransportResult<()> {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.shutdown.notify_waiters();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn stats(&self) -> DatagramStats {
        self.shared.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn loopback() -> UdpDatagram {
        UdpDatagram::bind("127.0.0.1:0".parse::<SocketAddr>().unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_bind_picks_port() {
        let socket = loopback().await;
        let addr = socket.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_exchange_updates_counters() {
        let a = loopback().await;
        let b = loopback().await;

        assert_eq!(a.send_to(b"segment", b.local_addr().unwrap()).await.unwrap(), 7);

        let mut buf = [0u8; 64];
        let (len, from) = timeout(Duration::from_secs(1), b.recv_from(&mut buf))
            .await
            .expect("datagram not delivered")
            .unwrap();
        assert_eq!(&buf[..len], b"segment");
        assert_eq!(from, a.local_addr().unwrap());

        let sent = a.stats();
        assert_eq!((sent.packets_sent, sent.bytes_sent), (1, 7));
        let received = b.stats();
        assert_eq!((received.packets_received, received.bytes_received), (1, 7));
        assert_eq!(received.errors(), 0);
    }

    #[tokio::test]
    async fn test_closed_socket_refuses_send() {
        let socket = loopback().await;
        socket.close().await.unwrap();
        assert!(socket.is_closed());

        let to = "127.0.0.1:9".parse().unwrap();
        assert!(matches!(
            socket.send_to(b"late", to).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_close_from_clone_wakes_receiver() {
        let socket = loopback().await;
        let closer = socket.clone();

        let waiting = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            socket.recv_from(&mut buf).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        closer.close().await.unwrap();

        let result = timeout(Duration::from_secs(1), waiting)
            .await
            .expect("receiver stayed blocked")
            .unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_bind_ipv6_loopback() {
        let Ok(socket) = UdpDatagram::bind("[::1]:0".parse::<SocketAddr>().unwrap()).await else {
            // No IPv6 on this host
            return;
        };
        assert!(socket.local_addr().unwrap().is_ipv6());
    }

    #[tokio::test]
    async fn test_bind_address_in_use() {
        let first = loopback().await;
        let taken = first.local_addr().unwrap();
        assert!(matches!(
            UdpDatagram::bind(taken).await,
            Err(TransportError::BindFailed(_))
        ));
    }
}
