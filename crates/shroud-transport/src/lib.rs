//! # Shroud Transport
//!
//! Network transport layer for the Shroud tunnel.
//!
//! This crate provides:
//! - The [`Transport`] / [`Listener`] abstraction (`dial`, `listen`, `accept`)
//!   that the tunnel uses without knowing which backend is underneath
//! - A TCP backend
//! - An ARQ backend: ordered, reliable byte-stream sessions built on
//!   unreliable datagrams
//! - The [`DatagramTransport`] layer the ARQ backend runs on, with a Tokio
//!   UDP implementation
//!
//! Both backends deliver the bytes of one direction of one connection in
//! order and without duplication, so anything written first (for example a
//! cipher nonce) is read first by the peer.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arq;
pub mod datagram;
pub mod factory;
pub mod tcp;
pub mod transport;
pub mod udp;

pub use arq::{ArqConfig, ArqListener, ArqStream, ArqTransport};
pub use datagram::{DatagramStats, DatagramTransport};
pub use factory::{TransportFactory, TransportKind};
pub use tcp::TcpTransport;
pub use transport::{Connection, Listener, Stream, Transport, TransportError, TransportResult};
pub use udp::UdpDatagram;
