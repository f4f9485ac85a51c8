//! # Shroud Core
//!
//! Tunnel endpoints for the Shroud encrypted point-to-point tunnel.
//!
//! This crate provides:
//! - [`TunnelConfig`], the immutable endpoint configuration
//! - [`Endpoint`], which accepts connections and sets up each relay
//!   according to its [`Role`]
//! - [`relay`], the bidirectional byte copy between two streams
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  cleartext  ┌──────────┐  nonce + ciphertext  ┌──────────┐  cleartext  ┌─────────────┐
//! │  client  │ ──────────▶ │  Role A  │ ═══════════════════▶ │  Role B  │ ──────────▶ │ destination │
//! └──────────┘     tcp     └──────────┘      tcp or arq      └──────────┘     tcp     └─────────────┘
//! ```
//!
//! Role A wraps its outbound leg in a
//! [`CipherStream`](shroud_crypto::CipherStream); Role B wraps its inbound
//! leg. Each direction of the encrypted leg starts with its own nonce.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod endpoint;
pub mod error;
pub mod relay;

pub use config::{Role, TunnelConfig};
pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use relay::{Direction, RelayOutcome, relay};
