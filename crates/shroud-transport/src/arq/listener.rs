//! Accepting side of the ARQ backend.
//!
//! A single demultiplexer task owns the listening socket. It routes each
//! datagram to the session for its `(source address, conversation id)` and
//! starts a new session when an unknown conversation sends its first
//! sequenced segment.

use super::ArqConfig;
use super::segment::Segment;
use super::session::Session;
use super::stream::ArqStream;
use crate::datagram::{DatagramTransport, MAX_DATAGRAM_SIZE};
use crate::transport::{Connection, Listener, TransportError, TransportResult};
use crate::udp::UdpDatagram;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};

type ConvKey = (SocketAddr, u32);

/// Listens for ARQ sessions on one datagram socket.
///
/// Dropping the listener stops new sessions from being accepted; sessions
/// already handed out keep running until they finish.
#[derive(Debug)]
pub struct ArqListener {
    incoming: mpsc::Receiver<(ArqStream, SocketAddr)>,
    local_addr: SocketAddr,
}

impl ArqListener {
    /// Bind a UDP socket on `addr` and start accepting sessions.
    ///
    /// # Errors
    /// Returns `TransportError::InvalidConfig` for an invalid `config`, or
    /// `TransportError::BindFailed` if the socket cannot be bound.
    pub async fn bind(addr: SocketAddr, config: ArqConfig) -> TransportResult<Self> {
        config.validate()?;
        let socket = UdpDatagram::bind(addr).await?;
        Self::with_transport(Arc::new(socket), config)
    }

    /// Accept sessions arriving on an existing datagram socket.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    /// Returns `TransportError::InvalidConfig` for an invalid `config`, or
    /// an error if the socket's local address cannot be read.
    pub fn with_transport(
        socket: Arc<dyn DatagramTransport>,
        config: ArqConfig,
    ) -> TransportResult<Self> {
        config.validate()?;
        let local_addr = socket.local_addr()?;

        let (accept_tx, incoming) = mpsc::channel(config.accept_backlog);
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        let demux = Demux {
            socket,
            config,
            sessions: HashMap::new(),
            finished: HashMap::new(),
            accept_tx,
            done_tx,
            done_rx,
        };
        tokio::spawn(demux.run());

        tracing::debug!(%local_addr, "ARQ listener bound");
        Ok(Self {
            incoming,
            local_addr,
        })
    }

    /// Wait for the next session.
    ///
    /// # Errors
    /// Returns `TransportError::Closed` if the underlying socket failed.
    pub async fn accept(&mut self) -> TransportResult<(ArqStream, SocketAddr)> {
        self.incoming.recv().await.ok_or(TransportError::Closed)
    }

    /// Address the listening socket is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Listener for ArqListener {
    async fn accept(&mut self) -> TransportResult<(Connection, SocketAddr)> {
        let (stream, from) = ArqListener::accept(self).await?;
        Ok((Box::new(stream), from))
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.local_addr)
    }
}

struct Demux {
    socket: Arc<dyn DatagramTransport>,
    config: ArqConfig,
    sessions: HashMap<ConvKey, mpsc::Sender<Segment>>,
    /// Recently finished conversations, so stray retransmissions do not
    /// start a new session
    finished: HashMap<ConvKey, Instant>,
    accept_tx: mpsc::Sender<(ArqStream, SocketAddr)>,
    done_tx: mpsc::UnboundedSender<ConvKey>,
    done_rx: mpsc::UnboundedReceiver<ConvKey>,
}

impl Demux {
    async fn run(mut self) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut listener_gone = false;

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok((len, from)) => self.dispatch(&buf[..len], from),
                    Err(TransportError::Closed) => break,
                    Err(e) => tracing::trace!(error = %e, "datagram receive failed"),
                },
                Some(key) = self.done_rx.recv() => {
                    self.sessions.remove(&key);
                    self.finished.insert(key, Instant::now());
                }
                () = self.accept_tx.closed(), if !listener_gone => listener_gone = true,
            }

            if listener_gone && self.sessions.is_empty() {
                break;
            }
        }

        if let Err(e) = self.socket.close().await {
            tracing::debug!(error = %e, "closing listener socket failed");
        }
        let stats = self.socket.stats();
        tracing::debug!(
            packets_sent = stats.packets_sent,
            packets_received = stats.packets_received,
            errors = stats.errors(),
            "ARQ listener stopped"
        );
    }

    fn dispatch(&mut self, datagram: &[u8], from: SocketAddr) {
        let segment = match Segment::decode(datagram) {
            Ok(segment) => segment,
            Err(e) => {
                tracing::trace!(%from, error = %e, "dropping malformed datagram");
                return;
            }
        };
        let key = (from, segment.conv);

        if let Some(tx) = self.sessions.get(&key) {
            if let Err(TrySendError::Full(_)) = tx.try_send(segment) {
                tracing::trace!(%from, conv = key.1, "session queue full, dropping segment");
            }
            return;
        }

        let grace = self.config.close_grace;
        self.finished.retain(|_, at| at.elapsed() < grace);
        if self.finished.contains_key(&key) || !segment.cmd.is_sequenced() {
            return;
        }

        let permit = match self.accept_tx.try_reserve() {
            Ok(permit) => permit,
            Err(TrySendError::Full(())) => {
                tracing::warn!(%from, "accept backlog full, refusing ARQ session");
                return;
            }
            Err(TrySendError::Closed(())) => return,
        };

        let (tx, rx) = mpsc::channel(self.config.inbound_queue());
        let (session, stream) = Session::new(
            segment.conv,
            from,
            self.config.clone(),
            Arc::clone(&self.socket),
            rx,
        );
        let conv = segment.conv;
        let _ = tx.try_send(segment);
        self.sessions.insert(key, tx);

        let done = self.done_tx.clone();
        tokio::spawn(async move {
            session.run().await;
            let _ = done.send(key);
        });

        permit.send((stream, from));
        tracing::debug!(%from, conv, "accepted ARQ session");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arq::segment::Command;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;

    async fn listener() -> ArqListener {
        ArqListener::bind("127.0.0.1:0".parse().unwrap(), ArqConfig::default())
            .await
            .unwrap()
    }

    async fn raw_socket() -> UdpDatagram {
        UdpDatagram::bind("127.0.0.1:0".parse::<SocketAddr>().unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_listener_local_addr() {
        let listener = listener().await;
        assert!(listener.local_addr().ip().is_loopback());
        assert_ne!(listener.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_sessions_are_separate() {
        let mut listener = listener().await;
        let addr = listener.local_addr();

        let mut clients = Vec::new();
        for i in 0..4u8 {
            let mut client = ArqStream::connect(addr, ArqConfig::default()).await.unwrap();
            client.write_all(&[i; 3]).await.unwrap();
            clients.push(client);
        }

        let mut seen = Vec::new();
        for _ in 0..4 {
            let (mut server, _) = timeout(Duration::from_secs(5), listener.accept())
                .await
                .unwrap()
                .unwrap();
            let mut buf = [0u8; 3];
            server.read_exact(&mut buf).await.unwrap();
            assert!(buf.iter().all(|&b| b == buf[0]));
            seen.push(buf[0]);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_garbage_and_stray_acks_do_not_create_sessions() {
        let mut listener = listener().await;
        let addr = listener.local_addr();
        let raw = raw_socket().await;

        raw.send_to(b"definitely not a segment", addr).await.unwrap();
        let ack = Segment::control(77, Command::Ack, 128, 0, 0);
        raw.send_to(&ack.encode().unwrap(), addr).await.unwrap();

        let result = timeout(Duration::from_millis(200), listener.accept()).await;
        assert!(result.is_err(), "unexpected session accepted");
    }

    #[tokio::test]
    async fn test_raw_push_creates_session() {
        let mut listener = listener().await;
        let addr = listener.local_addr();
        let raw = raw_socket().await;

        let push = Segment {
            conv: 5,
            cmd: Command::Push,
            wnd: 128,
            sn: 0,
            una: 0,
            payload: Bytes::from_static(b"hi"),
        };
        raw.send_to(&push.encode().unwrap(), addr).await.unwrap();

        let (mut stream, from) = timeout(Duration::from_secs(1), listener.accept())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(from, raw.local_addr().unwrap());
        assert_eq!(stream.conv(), 5);

        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");

        // The session acks what it received
        let mut datagram = vec![0u8; MAX_DATAGRAM_SIZE];
        let (len, _) = timeout(Duration::from_secs(1), raw.recv_from(&mut datagram))
            .await
            .unwrap()
            .unwrap();
        let reply = Segment::decode(&datagram[..len]).unwrap();
        assert_eq!(reply.cmd, Command::Ack);
        assert_eq!(reply.conv, 5);
        assert_eq!(reply.una, 1);
    }

    #[tokio::test]
    async fn test_with_invalid_config() {
        let socket = Arc::new(raw_socket().await);
        let config = ArqConfig {
            dead_link: 0,
            ..ArqConfig::default()
        };
        assert!(matches!(
            ArqListener::with_transport(socket, config),
            Err(TransportError::InvalidConfig(_))
        ));
    }
}
