//! Transparent `XChaCha20` encryption over any byte stream.
//!
//! A [`CipherStream`] wraps a connection and keeps its shape: it is
//! `AsyncRead + AsyncWrite` exactly like the connection it owns. The two
//! directions use independent keystreams:
//!
//! - **write**: a random nonce is generated and sent in cleartext when the
//!   stream is constructed; every later write is XORed with the keystream
//!   derived from `(key, that nonce)`.
//! - **read**: the first read consumes the peer's cleartext nonce, then
//!   every later read is XORed in place with the keystream derived from
//!   `(key, peer nonce)`.
//!
//! The cipher is unauthenticated. A peer using a different secret produces
//! garbage plaintext rather than an error.

use crate::random::random_nonce;
use crate::{CryptoError, NONCE_SIZE, SessionKey};
use chacha20::XChaCha20;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

/// Read-direction keystream state.
enum ReadState {
    /// Peer nonce not fully received yet
    AwaitingNonce {
        nonce: [u8; NONCE_SIZE],
        filled: usize,
    },
    /// Peer nonce received, keystream ready
    Keyed(XChaCha20),
    /// Nonce read failed; the stream cannot be decrypted
    Broken,
}

/// Encrypting/decrypting wrapper around a byte-stream connection.
///
/// Owns the wrapped connection: dropping or shutting down the cipher
/// stream closes it.
pub struct CipherStream<S> {
    inner: S,
    key: Arc<SessionKey>,
    encoder: XChaCha20,
    read_state: ReadState,
    /// Ciphertext of the current write call not yet accepted by `inner`
    pending: Vec<u8>,
    written: usize,
}

fn new_cipher(key: &SessionKey, nonce: &[u8]) -> Result<XChaCha20, CryptoError> {
    XChaCha20::new_from_slices(key.as_bytes(), nonce).map_err(|_| CryptoError::InvalidNonceLength)
}

fn keystream_exhausted() -> io::Error {
    io::Error::other("keystream exhausted")
}

impl<S> CipherStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap `inner`, generating this direction's nonce and sending it.
    ///
    /// The nonce is written before this returns, so it always precedes any
    /// ciphertext on the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if the CSPRNG fails, the cipher cannot be keyed, or
    /// the nonce cannot be written in full. `inner` is dropped (closed) in
    /// every error case.
    pub async fn new(key: Arc<SessionKey>, mut inner: S) -> Result<Self, CryptoError> {
        let nonce = random_nonce()?;
        let encoder = new_cipher(&key, &nonce)?;

        inner
            .write_all(&nonce)
            .await
            .map_err(CryptoError::NonceWrite)?;

        Ok(Self {
            inner,
            key,
            encoder,
            read_state: ReadState::AwaitingNonce {
                nonce: [0u8; NONCE_SIZE],
                filled: 0,
            },
            pending: Vec::new(),
            written: 0,
        })
    }

    #[cfg(test)]
    fn is_read_keyed(&self) -> bool {
        matches!(self.read_state, ReadState::Keyed(_))
    }

    fn poll_read_nonce(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        loop {
            let ReadState::AwaitingNonce { nonce, filled } = &mut self.read_state else {
                return Poll::Ready(Ok(()));
            };

            let mut buf = ReadBuf::new(&mut nonce[*filled..]);
            let result = ready!(Pin::new(&mut self.inner).poll_read(cx, &mut buf));
            let received = buf.filled().len();

            if let Err(e) = result {
                self.read_state = ReadState::Broken;
                return Poll::Ready(Err(e));
            }
            if received == 0 {
                self.read_state = ReadState::Broken;
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "can't read nonce from stream",
                )));
            }

            *filled += received;
            if *filled == NONCE_SIZE {
                let peer_nonce = *nonce;
                match new_cipher(&self.key, &peer_nonce) {
                    Ok(decoder) => self.read_state = ReadState::Keyed(decoder),
                    Err(e) => {
                        self.read_state = ReadState::Broken;
                        return Poll::Ready(Err(io::Error::other(e)));
                    }
                }
                tracing::trace!("peer nonce received, read keystream ready");
            }
        }
    }
}

impl<S> AsyncRead for CipherStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        ready!(this.poll_read_nonce(cx))?;

        match &mut this.read_state {
            ReadState::Keyed(decoder) => {
                let before = buf.filled().len();
                ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
                decoder
                    .try_apply_keystream(&mut buf.filled_mut()[before..])
                    .map_err(|_| keystream_exhausted())?;
                Poll::Ready(Ok(()))
            }
            ReadState::Broken => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "cipher stream unusable: peer nonce was not received",
            ))),
            ReadState::AwaitingNonce { .. } => unreachable!("nonce read completes before keying"),
        }
    }
}

impl<S> AsyncWrite for CipherStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Encrypt a copy of `buf` and write it.
    ///
    /// Returns `buf.len()` once the whole ciphertext has been accepted by
    /// the wrapped connection. If the connection returns `Pending` part way
    /// through, the remaining ciphertext is held and the caller must retry
    /// with the same `buf`, as `write_all` and `io::copy` do.
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if this.pending.is_empty() {
            if buf.is_empty() {
                return Pin::new(&mut this.inner).poll_write(cx, buf);
            }
            this.pending.extend_from_slice(buf);
            this.written = 0;
            this.encoder
                .try_apply_keystream(&mut this.pending)
                .map_err(|_| keystream_exhausted())?;
        }

        while this.written < this.pending.len() {
            let n = ready!(Pin::new(&mut this.inner).poll_write(cx, &this.pending[this.written..]))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            this.written += n;
        }

        let n = this.pending.len();
        this.pending.clear();
        this.written = 0;
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
