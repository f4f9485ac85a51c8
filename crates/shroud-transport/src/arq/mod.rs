//! Reliable ordered byte streams over unreliable datagrams.
//!
//! Each connection is a *conversation* identified by the dialer's address
//! and a random 32-bit conversation id. Every datagram carries exactly one
//! [`Segment`]; data segments are numbered, acknowledged individually and
//! cumulatively, and retransmitted on timeout or after repeated later acks.
//!
//! There is no handshake: [`ArqStream::connect`] succeeds as soon as the
//! local socket is bound, and the listener creates a session when the first
//! data segment of an unknown conversation arrives. A peer that stays silent
//! through `dead_link` consecutive retransmission timeouts of one segment is
//! declared dead; reads and writes on the stream then fail with
//! [`std::io::ErrorKind::TimedOut`] rather than reporting end of file.
//!
//! Teardown is a sequenced `Fin` segment after the last data byte, so the
//! reader sees end of file only once everything before it has arrived.

mod control;
mod listener;
pub mod segment;
mod session;
mod stream;

pub use listener::ArqListener;
pub use segment::{Command, HEADER_SIZE, Segment, SegmentError};
pub use stream::ArqStream;

use crate::datagram::MAX_DATAGRAM_SIZE;
use crate::factory::TransportKind;
use crate::transport::{
    Connection, Listener, Transport, TransportError, TransportResult, resolve,
};
use async_trait::async_trait;
use std::time::Duration;

/// ARQ tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArqConfig {
    /// Largest datagram sent, header included
    pub mtu: usize,
    /// Segments in flight before the sender waits for acks
    pub send_window: u16,
    /// Segments buffered for the reader before the window closes
    pub recv_window: u16,
    /// Timer resolution of the session loop
    pub interval: Duration,
    /// Lower bound for the retransmission timeout
    pub min_rto: Duration,
    /// Upper bound for the retransmission timeout
    pub max_rto: Duration,
    /// Retransmission timeout before the first RTT sample
    pub initial_rto: Duration,
    /// Later acks that trigger a fast retransmit (0 disables)
    pub fast_resend: u32,
    /// Consecutive timeouts of one segment, with nothing heard from the peer,
    /// before the session is declared dead
    pub dead_link: u32,
    /// How often to ask a peer advertising a zero window for an update
    pub window_ask_interval: Duration,
    /// How long a finished conversation's datagrams are ignored
    pub close_grace: Duration,
    /// Bytes buffered between the session and its stream handle
    pub stream_buffer: usize,
    /// Sessions waiting in `accept` before new ones are refused
    pub accept_backlog: usize,
}

impl Default for ArqConfig {
    fn default() -> Self {
        Self {
            mtu: 1400,
            send_window: 128,
            recv_window: 128,
            interval: Duration::from_millis(10),
            min_rto: Duration::from_millis(30),
            max_rto: Duration::from_secs(5),
            initial_rto: Duration::from_millis(200),
            fast_resend: 2,
            dead_link: 20,
            window_ask_interval: Duration::from_millis(500),
            close_grace: Duration::from_secs(30),
            stream_buffer: 256 * 1024,
            accept_backlog: 128,
        }
    }
}

impl ArqConfig {
    /// Largest payload carried by one segment.
    #[must_use]
    pub fn mss(&self) -> usize {
        self.mtu.saturating_sub(HEADER_SIZE)
    }

    /// Capacity of a session's inbound segment queue.
    pub(crate) fn inbound_queue(&self) -> usize {
        usize::from(self.send_window.max(self.recv_window)) * 2
    }

    /// Check the configuration for values the session cannot work with.
    ///
    /// # Errors
    /// Returns `TransportError::InvalidConfig` naming the offending field.
    pub fn validate(&self) -> TransportResult<()> {
        let invalid = |msg: String| Err(TransportError::InvalidConfig(msg));

        if self.mtu <= HEADER_SIZE || self.mtu > MAX_DATAGRAM_SIZE {
            return invalid(format!(
                "mtu must be between {} and {MAX_DATAGRAM_SIZE}, got {}",
                HEADER_SIZE + 1,
                self.mtu
            ));
        }
        if self.send_window == 0 || self.recv_window == 0 {
            return invalid("send_window and recv_window must be non-zero".into());
        }
        if self.interval.is_zero() {
            return invalid("interval must be non-zero".into());
        }
        if self.min_rto.is_zero() || self.min_rto > self.max_rto {
            return invalid(format!(
                "min_rto ({:?}) must be non-zero and not exceed max_rto ({:?})",
                self.min_rto, self.max_rto
            ));
        }
        if self.initial_rto < self.min_rto || self.initial_rto > self.max_rto {
            return invalid(format!(
                "initial_rto ({:?}) must lie between min_rto and max_rto",
                self.initial_rto
            ));
        }
        if self.dead_link == 0 {
            return invalid("dead_link must be non-zero".into());
        }
        if self.window_ask_interval.is_zero() {
            return invalid("window_ask_interval must be non-zero".into());
        }
        if self.stream_buffer == 0 || self.accept_backlog == 0 {
            return invalid("stream_buffer and accept_backlog must be non-zero".into());
        }
        Ok(())
    }
}

/// ARQ backend for the [`Transport`] trait.
#[derive(Debug, Clone, Default)]
pub struct ArqTransport {
    config: ArqConfig,
}

impl ArqTransport {
    /// Create an ARQ transport with the given tuning.
    #[must_use]
    pub fn new(config: ArqConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for ArqTransport {
    async fn dial(&self, addr: &str) -> TransportResult<Connection> {
        let peer = resolve(addr).await?;
        let stream = ArqStream::connect(peer, self.config.clone()).await?;
        Ok(Box::new(stream))
    }

    async fn listen(&self, addr: &str) -> TransportResult<Box<dyn Listener>> {
        let local = resolve(addr).await?;
        let listener = ArqListener::bind(local, self.config.clone()).await?;
        Ok(Box::new(listener))
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Arq
    }
}
