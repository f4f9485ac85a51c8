//! Session key derivation.
//!
//! Both tunnel endpoints derive the same 32-byte key from the same secret
//! text. The key is the lowercase hex rendering of `MD5(secret)`, taken as
//! ASCII bytes, which keeps the wire format compatible with existing peers.

use crate::{CryptoError, KEY_SIZE};
use md5::{Digest, Md5};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Immutable key shared by every cipher stream of a process.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_SIZE]);

impl SessionKey {
    /// Derive the session key from shared secret text.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::EmptySecret`] if `secret` is empty.
    pub fn derive(secret: &str) -> Result<Self, CryptoError> {
        if secret.is_empty() {
            return Err(CryptoError::EmptySecret);
        }

        let digest = Md5::digest(secret.as_bytes());
        let encoded = hex::encode(digest);

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(encoded.as_bytes());
        Ok(Self(key))
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}
