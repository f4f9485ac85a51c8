//! Unreliable datagram layer.
//!
//! The ARQ backend runs on top of a [`DatagramTransport`]. The production
//! implementation is [`UdpDatagram`](crate::udp::UdpDatagram); tests plug in
//! implementations that drop, delay or reorder packets.

use crate::transport::TransportResult;
use async_trait::async_trait;
use std::net::SocketAddr;

/// Largest datagram the ARQ layer reads in one call.
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Async datagram socket.
///
/// Delivery is best effort: datagrams may be lost, duplicated or reordered.
/// Every method takes `&self` so one socket can be shared by a receive loop
/// and any number of session drivers.
#[async_trait]
pub trait DatagramTransport: Send + Sync {
    /// Send one datagram to `addr`, returning the bytes handed to the
    /// kernel.
    ///
    /// # Errors
    /// Returns `TransportError::Closed` after [`close`](Self::close), or the
    /// I/O error of the failed send.
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> TransportResult<usize>;

    /// Wait for one datagram, returning its length and sender.
    ///
    /// # Errors
    /// Returns `TransportError::Closed` once the socket is closed, including
    /// while a call is waiting.
    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)>;

    /// Bound local address.
    ///
    /// # Errors
    /// Returns the I/O error if the address cannot be read.
    fn local_addr(&self) -> TransportResult<SocketAddr>;

    /// Stop the socket. Idempotent.
    ///
    /// # Errors
    /// Implementations may report a failure to release the socket.
    async fn close(&self) -> TransportResult<()>;

    /// Whether [`close`](Self::close) has been called.
    fn is_closed(&self) -> bool;

    /// Traffic counters so far.
    fn stats(&self) -> DatagramStats {
        DatagramStats::default()
    }
}

/// Datagram counters
#[derive(Debug, Clone, Default)]
pub struct DatagramStats {
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Total packets sent
    pub packets_sent: u64,
    /// Total packets received
    pub packets_received: u64,
    /// Send errors
    pub send_errors: u64,
    /// Receive errors
    pub recv_errors: u64,
}

impl DatagramStats {
    /// Total datagrams that failed in either direction
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.send_errors + self.recv_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datagram_stats_default() {
        let stats = DatagramStats::default();
        assert_eq!(stats.bytes_sent, 0);
        assert_eq!(stats.packets_received, 0);
        assert_eq!(stats.errors(), 0);
    }

    #[test]
    fn test_datagram_stats_errors() {
        let stats = DatagramStats {
            send_errors: 2,
            recv_errors: 3,
            ..DatagramStats::default()
        };
        assert_eq!(stats.errors(), 5);
    }
}
