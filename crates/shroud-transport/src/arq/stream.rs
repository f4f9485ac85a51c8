//! User-facing ARQ stream and the dialing side.

use super::ArqConfig;
use super::segment::Segment;
use super::session::Session;
use crate::datagram::{DatagramTransport, MAX_DATAGRAM_SIZE};
use crate::transport::{TransportError, TransportResult};
use crate::udp::UdpDatagram;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;

/// An ordered, reliable byte stream carried over datagrams.
///
/// Reads return end of file once the peer has finished sending and every
/// byte before its end of stream has been delivered. If the session ends
/// first, because the peer stopped answering or the socket closed, reads
/// and writes fail with [`io::ErrorKind::TimedOut`] instead. Shutting down
/// the write half sends end of stream after all buffered data. Dropping the
/// stream closes both directions.
#[derive(Debug)]
pub struct ArqStream {
    io: DuplexStream,
    _guard: oneshot::Sender<()>,
    truncated: Arc<AtomicBool>,
    conv: u32,
    peer: SocketAddr,
}

fn link_lost() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "ARQ peer stopped responding")
}

impl ArqStream {
    pub(crate) fn new(
        io: DuplexStream,
        guard: oneshot::Sender<()>,
        truncated: Arc<AtomicBool>,
        conv: u32,
        peer: SocketAddr,
    ) -> Self {
        Self {
            io,
            _guard: guard,
            truncated,
            conv,
            peer,
        }
    }

    /// Open a session to `peer` from a fresh ephemeral UDP socket.
    ///
    /// No packet is exchanged before this returns: an unreachable peer
    /// shows up later as a `TimedOut` error.
    ///
    /// # Errors
    /// Returns `TransportError::InvalidConfig` for an invalid `config`, or
    /// `TransportError::BindFailed` if the local socket cannot be bound.
    pub async fn connect(peer: SocketAddr, config: ArqConfig) -> TransportResult<Self> {
        config.validate()?;
        let local: SocketAddr = if peer.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpDatagram::bind(local).await?;
        Self::connect_with(Arc::new(socket), peer, config)
    }

    /// Open a session to `peer` over an existing datagram socket.
    ///
    /// The session takes ownership of `socket` and closes it when the
    /// session ends. Must be called within a Tokio runtime.
    ///
    /// # Errors
    /// Returns `TransportError::InvalidConfig` for an invalid `config`.
    pub fn connect_with(
        socket: Arc<dyn DatagramTransport>,
        peer: SocketAddr,
        config: ArqConfig,
    ) -> TransportResult<Self> {
        config.validate()?;

        let conv = rand::random::<u32>();
        let (tx, rx) = mpsc::channel(config.inbound_queue());
        let (session, stream) = Session::new(conv, peer, config, Arc::clone(&socket), rx);

        tokio::spawn(pump(socket, peer, conv, tx));
        tokio::spawn(session.run());

        tracing::debug!(conv, %peer, "dialed ARQ session");
        Ok(stream)
    }

    /// Conversation id of this session.
    #[must_use]
    pub fn conv(&self) -> u32 {
        self.conv
    }

    /// Remote address of this session.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

/// Feed datagrams from `peer` for `conv` into the session until it ends.
async fn pump(
    socket: Arc<dyn DatagramTransport>,
    peer: SocketAddr,
    conv: u32,
    tx: mpsc::Sender<Segment>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            () = tx.closed() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, from)) => {
                    if from != peer {
                        continue;
                    }
                    let segment = match Segment::decode(&buf[..len]) {
                        Ok(segment) if segment.conv == conv => segment,
                        Ok(_) => continue,
                        Err(e) => {
                            tracing::trace!(%from, error = %e, "dropping malformed datagram");
                            continue;
                        }
                    };
                    match tx.try_send(segment) {
                        Ok(()) | Err(TrySendError::Full(_)) => {}
                        Err(TrySendError::Closed(_)) => break,
                    }
                }
                Err(TransportError::Closed) => break,
                // ICMP errors surface here on some platforms; the session
                // notices a dead peer on its own
                Err(e) => tracing::trace!(%peer, error = %e, "datagram receive failed"),
            },
        }
    }

    if let Err(e) = socket.close().await {
        tracing::debug!(error = %e, "closing dialer socket failed");
    }
    let stats = socket.stats();
    tracing::debug!(
        conv,
        %peer,
        packets_sent = stats.packets_sent,
        packets_received = stats.packets_received,
        "dialer socket closed"
    );
}

impl AsyncRead for ArqStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let wanted = buf.remaining() > 0;
        let before = buf.filled().len();
        ready!(Pin::new(&mut self.io).poll_read(cx, buf))?;

        // A closed pipe without the peer's end of stream is a lost link
        if wanted && buf.filled().len() == before && self.truncated.load(Ordering::Acquire) {
            return Poll::Ready(Err(link_lost()));
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for ArqStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match ready!(Pin::new(&mut self.io).poll_write(cx, buf)) {
            Err(_) if self.truncated.load(Ordering::Acquire) => Poll::Ready(Err(link_lost())),
            result => Poll::Ready(result),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}
