//! Secure random number generation.
//!
//! All randomness comes from the operating system CSPRNG.

use crate::{CryptoError, NONCE_SIZE};

/// Fill a buffer with random bytes from the OS CSPRNG.
///
/// # Errors
///
/// Returns [`CryptoError::RandomFailed`] if the underlying OS CSPRNG fails.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    getrandom::getrandom(buf).map_err(|_| CryptoError::RandomFailed)
}

/// Generate a fresh stream nonce.
///
/// # Errors
///
/// Returns [`CryptoError::RandomFailed`] if the underlying OS CSPRNG fails.
pub fn random_nonce() -> Result<[u8; NONCE_SIZE], CryptoError> {
    let mut buf = [0u8; NONCE_SIZE];
    fill_random(&mut buf)?;
    Ok(buf)
}
