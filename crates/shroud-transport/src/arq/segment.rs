//! ARQ segment encoding and decoding.
//!
//! One segment per datagram. All multi-byte fields are big-endian.
//!
//! ```text
//! +--------+-----+-----+--------+--------+-----+-----------+
//! | conv:4 | cmd | wnd | sn:4   | una:4  | len | payload   |
//! |        | :1  | :2  |        |        | :2  | len bytes |
//! +--------+-----+-----+--------+--------+-----+-----------+
//! ```

use bytes::Bytes;
use thiserror::Error;

/// Fixed header size in bytes
pub const HEADER_SIZE: usize = 17;

/// Segment-level errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentError {
    /// Datagram too short to hold a header
    #[error("segment too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Unknown command byte
    #[error("invalid segment command: 0x{0:02X}")]
    InvalidCommand(u8),

    /// Length field disagrees with datagram size
    #[error("payload length {declared} does not match {actual} trailing bytes")]
    LengthMismatch {
        /// Length declared in the header
        declared: usize,
        /// Bytes actually present after the header
        actual: usize,
    },

    /// Payload does not fit the 16-bit length field
    #[error("payload of {0} bytes exceeds the segment length field")]
    PayloadTooLarge(usize),
}

/// Segment commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Sequenced data
    Push = 0x51,
    /// Acknowledges one sequence number
    Ack = 0x52,
    /// Asks the peer to report its receive window
    WindowAsk = 0x53,
    /// Window report
    WindowTell = 0x54,
    /// Sequenced end of stream
    Fin = 0x55,
}

impl Command {
    /// Whether segments with this command occupy a sequence number.
    #[must_use]
    pub fn is_sequenced(self) -> bool {
        matches!(self, Self::Push | Self::Fin)
    }
}

impl TryFrom<u8> for Command {
    type Error = SegmentError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x51 => Ok(Self::Push),
            0x52 => Ok(Self::Ack),
            0x53 => Ok(Self::WindowAsk),
            0x54 => Ok(Self::WindowTell),
            0x55 => Ok(Self::Fin),
            _ => Err(SegmentError::InvalidCommand(value)),
        }
    }
}

/// A decoded ARQ segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Conversation id chosen by the dialing side
    pub conv: u32,
    /// Segment command
    pub cmd: Command,
    /// Sender's free receive window, in segments
    pub wnd: u16,
    /// Sequence number (sequenced commands) or acknowledged number (`Ack`)
    pub sn: u32,
    /// Next sequence number the sender expects (cumulative ack)
    pub una: u32,
    /// Payload bytes
    pub payload: Bytes,
}

impl Segment {
    /// Build a segment without payload.
    #[must_use]
    pub fn control(conv: u32, cmd: Command, wnd: u16, sn: u32, una: u32) -> Self {
        Self {
            conv,
            cmd,
            wnd,
            sn,
            una,
            payload: Bytes::new(),
        }
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode into a new datagram buffer.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::PayloadTooLarge`] if the payload does not fit
    /// the 16-bit length field.
    pub fn encode(&self) -> Result<Vec<u8>, SegmentError> {
        let len = u16::try_from(self.payload.len())
            .map_err(|_| SegmentError::PayloadTooLarge(self.payload.len()))?;

        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.conv.to_be_bytes());
        buf.push(self.cmd as u8);
        buf.extend_from_slice(&self.wnd.to_be_bytes());
        buf.extend_from_slice(&self.sn.to_be_bytes());
        buf.extend_from_slice(&self.una.to_be_bytes());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Decode one datagram.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError`] if the datagram is truncated, carries an
    /// unknown command, or its length field disagrees with its size.
    pub fn decode(data: &[u8]) -> Result<Self, SegmentError> {
        if data.len() < HEADER_SIZE {
            return Err(SegmentError::TooShort {
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }

        let conv = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let cmd = Command::try_from(data[4])?;
        let wnd = u16::from_be_bytes([data[5], data[6]]);
        let sn = u32::from_be_bytes([data[7], data[8], data[9], data[10]]);
        let una = u32::from_be_bytes([data[11], data[12], data[13], data[14]]);
        let len = usize::from(u16::from_be_bytes([data[15], data[16]]));

        let payload = &data[HEADER_SIZE..];
        if payload.len() != len {
            return Err(SegmentError::LengthMismatch {
                declared: len,
                actual: payload.len(),
            });
        }

        Ok(Self {
            conv,
            cmd,
            wnd,
            sn,
            una,
            payload: Bytes::copy_from_slice(payload),
        })
    }
}
