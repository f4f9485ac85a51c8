//! # Shroud Crypto
//!
//! Cryptographic primitives for the Shroud tunnel.
//!
//! This crate provides:
//! - Session key derivation from a shared secret
//! - Per-direction random nonces from the OS CSPRNG
//! - [`CipherStream`], an `AsyncRead + AsyncWrite` wrapper that encrypts
//!   everything written and decrypts everything read with `XChaCha20`
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Notes |
//! |----------|-----------|-------|
//! | Key derivation | hex(MD5(secret)) | 32 ASCII bytes, wire compatible |
//! | Stream cipher | `XChaCha20` | unauthenticated |
//! | Nonce | 24 random bytes | one per direction per connection |
//!
//! ## Wire Format
//!
//! Each direction of a connection starts with the sender's nonce in
//! cleartext, followed by ciphertext. There is no header, length field or
//! tag; the payload is whatever byte stream rides inside the tunnel.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod key;
pub mod random;
pub mod stream;

pub use error::CryptoError;
pub use key::SessionKey;
pub use stream::CipherStream;

/// `XChaCha20` key size
pub const KEY_SIZE: usize = 32;

/// `XChaCha20` nonce size
pub const NONCE_SIZE: usize = 24;
