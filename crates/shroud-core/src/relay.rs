//! Bidirectional relay between two byte streams.
//!
//! Both directions are copied concurrently. The first direction to end, by
//! end of stream or by error, ends the whole relay: the other copy is
//! cancelled and both streams are dropped, which closes them.

use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Copy buffer size per direction
const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// One direction of a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// From the first stream to the second
    AToB,
    /// From the second stream to the first
    BToA,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AToB => f.write_str("a->b"),
            Self::BToA => f.write_str("b->a"),
        }
    }
}

/// How a relay ended.
#[derive(Debug)]
pub struct RelayOutcome {
    /// Direction whose end tore the relay down
    pub first_finished: Direction,
    /// Bytes written to the second stream
    pub a_to_b: u64,
    /// Bytes written to the first stream
    pub b_to_a: u64,
    /// Error that ended the first direction, if it did not end cleanly
    pub error: Option<io::Error>,
}

impl RelayOutcome {
    /// Whether the relay ended by end of stream rather than an error.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }
}

/// Copy `reader` into `writer` until end of stream, counting bytes written.
///
/// On end of stream the writer is shut down so the far side sees it too.
async fn copy_counted<R, W>(reader: &mut R, writer: &mut W, copied: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return writer.shutdown().await;
        }
        writer.write_all(&buf[..n]).await?;
        *copied += n as u64;
    }
}

/// Relay bytes between `a` and `b` until either direction ends.
///
/// Never fails: errors end the relay and are reported in the outcome.
/// Both streams are closed when this returns.
pub async fn relay<A, B>(a: A, b: B) -> RelayOutcome
where
    A: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
{
    let (mut a_rx, mut a_tx) = tokio::io::split(a);
    let (mut b_rx, mut b_tx) = tokio::io::split(b);
    let mut a_to_b = 0u64;
    let mut b_to_a = 0u64;

    let (first_finished, result) = tokio::select! {
        result = copy_counted(&mut a_rx, &mut b_tx, &mut a_to_b) => (Direction::AToB, result),
        result = copy_counted(&mut b_rx, &mut a_tx, &mut b_to_a) => (Direction::BToA, result),
    };

    RelayOutcome {
        first_finished,
        a_to_b,
        b_to_a,
        error: result.err(),
    }
}
