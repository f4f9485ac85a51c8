//! Session driver: connects a [`ControlBlock`] to the network and to the
//! user's [`ArqStream`].
//!
//! The stream handle is one end of an in-memory duplex pipe; the driver task
//! owns the other end, the control block, and the inbound segment queue fed
//! by the listener or dialer pump.

use super::ArqConfig;
use super::control::ControlBlock;
use super::segment::Segment;
use super::stream::ArqStream;
use crate::datagram::DatagramTransport;
use bytes::{Buf, Bytes};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

/// One conversation's driver, ready to be spawned.
pub(crate) struct Session {
    conv: u32,
    peer: SocketAddr,
    config: ArqConfig,
    cb: ControlBlock,
    socket: Arc<dyn DatagramTransport>,
    inbound: mpsc::Receiver<Segment>,
    app: DuplexStream,
    user_gone: oneshot::Receiver<()>,
    /// Set when the session ends before the peer's end of stream
    truncated: Arc<AtomicBool>,
}

impl Session {
    /// Create the driver and the user-facing stream for one conversation.
    pub(crate) fn new(
        conv: u32,
        peer: SocketAddr,
        config: ArqConfig,
        socket: Arc<dyn DatagramTransport>,
        inbound: mpsc::Receiver<Segment>,
    ) -> (Self, ArqStream) {
        let (user, app) = tokio::io::duplex(config.stream_buffer);
        let (guard, user_gone) = oneshot::channel();
        let truncated = Arc::new(AtomicBool::new(false));

        let session = Self {
            conv,
            peer,
            cb: ControlBlock::new(conv, config.clone()),
            config,
            socket,
            inbound,
            app,
            user_gone,
            truncated: Arc::clone(&truncated),
        };
        (session, ArqStream::new(user, guard, truncated, conv, peer))
    }

    /// Drive the conversation until both directions are finished, the peer
    /// stops answering, or the inbound queue closes.
    pub(crate) async fn run(self) {
        let Self {
            conv,
            peer,
            config,
            mut cb,
            socket,
            mut inbound,
            app,
            mut user_gone,
            truncated,
        } = self;

        let (mut app_rx, mut app_tx) = tokio::io::split(app);
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut read_buf = vec![0u8; cb.mss()];
        let mut delivering = Bytes::new();
        let mut local_eof = false;
        let mut app_closed = false;
        let mut eof_delivered = false;

        tracing::debug!(conv, %peer, "ARQ session started");

        loop {
            if delivering.is_empty() && !app_closed {
                if let Some(chunk) = cb.recv() {
                    delivering = chunk;
                }
            }
            let can_read = !local_eof && cb.send_capacity() > 0;

            tokio::select! {
                segment = inbound.recv() => match segment {
                    Some(segment) => cb.input(segment, Instant::now()),
                    None => {
                        tracing::debug!(conv, "inbound queue closed");
                        break;
                    }
                },
                result = app_rx.read(&mut read_buf), if can_read => match result {
                    Ok(0) | Err(_) => {
                        local_eof = true;
                        cb.push_fin();
                    }
                    Ok(n) => cb.push(Bytes::copy_from_slice(&read_buf[..n])),
                },
                result = app_tx.write(&delivering), if !delivering.is_empty() => match result {
                    Ok(0) | Err(_) => app_closed = true,
                    Ok(n) => delivering.advance(n),
                },
                _ = &mut user_gone, if !app_closed => app_closed = true,
                _ = ticker.tick() => {}
            }

            // Take everything already queued so a burst cannot overflow
            // the queue while the loop turns
            let now = Instant::now();
            while let Ok(segment) = inbound.try_recv() {
                cb.input(segment, now);
            }

            if app_closed {
                // Nobody reads any more; keep acking but discard
                delivering.clear();
                while cb.recv().is_some() {}
            }

            if !eof_delivered
                && !app_closed
                && cb.is_fin_received()
                && delivering.is_empty()
                && !cb.has_received()
            {
                if let Err(e) = app_tx.shutdown().await {
                    tracing::debug!(conv, error = %e, "delivering end of stream failed");
                }
                eof_delivered = true;
            }

            transmit(&mut cb, socket.as_ref(), peer).await;

            if cb.is_dead() {
                tracing::warn!(
                    conv,
                    %peer,
                    rto = ?cb.rto(),
                    "ARQ peer stopped responding"
                );
                break;
            }
            if local_eof && cb.is_send_complete() && (eof_delivered || app_closed) {
                break;
            }
        }

        if !eof_delivered && !app_closed {
            // Must be visible before the pipe closes below
            truncated.store(true, Ordering::Release);
        }
        tracing::debug!(
            conv,
            %peer,
            retransmits = cb.retransmits(),
            truncated = !eof_delivered && !app_closed,
            "ARQ session finished"
        );
    }
}

async fn transmit(cb: &mut ControlBlock, socket: &dyn DatagramTransport, peer: SocketAddr) {
    for segment in cb.flush(Instant::now()) {
        let wire = match segment.encode() {
            Ok(wire) => wire,
            Err(e) => {
                tracing::debug!(conv = segment.conv, error = %e, "segment not encodable");
                continue;
            }
        };
        if let Err(e) = socket.send_to(&wire, peer).await {
            tracing::trace!(conv = segment.conv, %peer, error = %e, "segment send failed");
        }
    }
}
