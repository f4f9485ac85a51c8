//! ARQ control block.
//!
//! Pure, clock-driven state machine for one conversation: sequencing,
//! acknowledgement, retransmission, flow control and in-order reassembly.
//! It performs no I/O; the session driver feeds it segments and user data
//! and transmits whatever [`ControlBlock::flush`] returns.

use super::ArqConfig;
use super::segment::{Command, Segment};
use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

/// A sequenced segment awaiting acknowledgement.
#[derive(Debug)]
struct InFlight {
    cmd: Command,
    data: Bytes,
    sent_at: Option<Instant>,
    resend_at: Option<Instant>,
    rto: Duration,
    transmits: u32,
    /// Consecutive timeouts without hearing from the peer
    timeouts: u32,
    fast_acks: u32,
    /// Fast retransmit already used since the last timeout
    fast_resent: bool,
}

/// A sequenced segment received ahead of `rcv_nxt`.
#[derive(Debug)]
enum Received {
    Data(Bytes),
    Fin,
}

/// Per-conversation ARQ state.
#[derive(Debug)]
pub(crate) struct ControlBlock {
    conv: u32,
    config: ArqConfig,

    snd_nxt: u32,
    snd_buf: BTreeMap<u32, InFlight>,
    rmt_wnd: u16,
    fin_queued: bool,

    rcv_nxt: u32,
    rcv_buf: BTreeMap<u32, Received>,
    rcv_queue: VecDeque<Bytes>,
    fin_received: bool,

    srtt: Option<Duration>,
    rttvar: Duration,
    rto: Duration,

    ack_list: Vec<u32>,
    last_heard: Option<Instant>,
    window_ask_at: Option<Instant>,
    need_window_tell: bool,
    zero_window_sent: bool,
    dead: bool,
    retransmits: u64,
}

impl ControlBlock {
    pub(crate) fn new(conv: u32, config: ArqConfig) -> Self {
        Self {
            conv,
            rmt_wnd: config.recv_window,
            rto: config.initial_rto,
            config,
            snd_nxt: 0,
            snd_buf: BTreeMap::new(),
            fin_queued: false,
            rcv_nxt: 0,
            rcv_buf: BTreeMap::new(),
            rcv_queue: VecDeque::new(),
            fin_received: false,
            srtt: None,
            rttvar: Duration::ZERO,
            ack_list: Vec::new(),
            last_heard: None,
            window_ask_at: None,
            need_window_tell: false,
            zero_window_sent: false,
            dead: false,
            retransmits: 0,
        }
    }

    /// Largest payload one segment carries.
    pub(crate) fn mss(&self) -> usize {
        self.config.mss()
    }

    fn snd_una(&self) -> u32 {
        self.snd_buf.keys().next().copied().unwrap_or(self.snd_nxt)
    }

    /// How many more sequenced segments may be queued right now.
    pub(crate) fn send_capacity(&self) -> usize {
        if self.fin_queued || self.dead {
            return 0;
        }
        let cwnd = u32::from(self.config.send_window.min(self.rmt_wnd));
        let limit = self.snd_una().saturating_add(cwnd);
        limit.saturating_sub(self.snd_nxt) as usize
    }

    fn enqueue(&mut self, cmd: Command, data: Bytes) {
        if self.snd_nxt == u32::MAX {
            // Sequence space exhausted; the conversation cannot continue.
            self.dead = true;
            return;
        }
        self.snd_buf.insert(
            self.snd_nxt,
            InFlight {
                cmd,
                data,
                sent_at: None,
                resend_at: None,
                rto: self.rto,
                transmits: 0,
                timeouts: 0,
                fast_acks: 0,
                fast_resent: false,
            },
        );
        self.snd_nxt += 1;
    }

    /// Queue user data. `data` must not exceed [`Self::mss`].
    pub(crate) fn push(&mut self, data: Bytes) {
        debug_assert!(data.len() <= self.mss());
        self.enqueue(Command::Push, data);
    }

    /// Queue end of stream after all data pushed so far.
    pub(crate) fn push_fin(&mut self) {
        if !self.fin_queued {
            self.enqueue(Command::Fin, Bytes::new());
            self.fin_queued = true;
        }
    }

    /// Process one segment from the peer.
    pub(crate) fn input(&mut self, segment: Segment, now: Instant) {
        if segment.conv != self.conv {
            return;
        }

        self.last_heard = Some(now);
        // Reordered stale segments must not shrink the window
        if segment.una >= self.snd_una() {
            self.rmt_wnd = segment.wnd;
        }
        if segment.cmd == Command::Ack {
            self.acknowledge(segment.sn, now);
        }
        self.acknowledge_until(segment.una);

        match segment.cmd {
            Command::Ack | Command::WindowTell => {}
            Command::Push => self.receive(segment.sn, Received::Data(segment.payload)),
            Command::Fin => self.receive(segment.sn, Received::Fin),
            Command::WindowAsk => self.need_window_tell = true,
        }
    }

    fn acknowledge_until(&mut self, una: u32) {
        while let Some(entry) = self.snd_buf.first_entry() {
            if *entry.key() >= una {
                break;
            }
            entry.remove();
        }
    }

    fn acknowledge(&mut self, sn: u32, now: Instant) {
        if let Some(segment) = self.snd_buf.remove(&sn) {
            // Karn: only segments sent once give an unambiguous sample
            if let (1, Some(sent_at)) = (segment.transmits, segment.sent_at) {
                self.update_rtt(now.saturating_duration_since(sent_at));
            }
        }

        for (_, segment) in self.snd_buf.range_mut(..sn) {
            if segment.transmits > 0 {
                segment.fast_acks += 1;
            }
        }
    }

    fn update_rtt(&mut self, sample: Duration) {
        match self.srtt {
            None => {
                self.srtt = Some(sample);
                self.rttvar = sample / 2;
            }
            Some(srtt) => {
                let delta = srtt.abs_diff(sample);
                self.rttvar = (self.rttvar * 3 + delta) / 4;
                self.srtt = Some((srtt * 7 + sample) / 8);
            }
        }

        let srtt = self.srtt.unwrap_or(sample);
        let rto = srtt + (self.rttvar * 4).max(self.config.interval);
        self.rto = rto.clamp(self.config.min_rto, self.config.max_rto);
    }

    /// Free receive slots advertised to the peer.
    fn window(&self) -> u16 {
        let used = self.rcv_queue.len().min(usize::from(self.config.recv_window));
        self.config.recv_window - used as u16
    }

    fn receive(&mut self, sn: u32, received: Received) {
        if sn < self.rcv_nxt {
            // Our earlier ack was lost; ack again
            self.ack_list.push(sn);
            return;
        }
        if (sn - self.rcv_nxt) as usize >= usize::from(self.window()) {
            return;
        }

        self.ack_list.push(sn);
        if self.fin_received {
            return;
        }
        self.rcv_buf.entry(sn).or_insert(received);

        while let Some(received) = self.rcv_buf.remove(&self.rcv_nxt) {
            self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            match received {
                Received::Data(data) => {
                    if !data.is_empty() {
                        self.rcv_queue.push_back(data);
                    }
                }
                Received::Fin => {
                    self.fin_received = true;
                    self.rcv_buf.clear();
                    break;
                }
            }
        }
    }

    /// Take the next in-order chunk for the user.
    pub(crate) fn recv(&mut self) -> Option<Bytes> {
        let data = self.rcv_queue.pop_front()?;
        if self.zero_window_sent && self.window() > 0 {
            self.need_window_tell = true;
            self.zero_window_sent = false;
        }
        Some(data)
    }

    /// Whether in-order data is waiting for the user.
    pub(crate) fn has_received(&self) -> bool {
        !self.rcv_queue.is_empty()
    }

    /// Whether the peer's end of stream has been reached in sequence.
    pub(crate) fn is_fin_received(&self) -> bool {
        self.fin_received
    }

    /// Whether our end of stream has been queued and everything is acked.
    pub(crate) fn is_send_complete(&self) -> bool {
        self.fin_queued && self.snd_buf.is_empty()
    }

    /// Whether a segment exceeded the retransmission limit.
    pub(crate) fn is_dead(&self) -> bool {
        self.dead
    }

    /// Current retransmission timeout estimate.
    pub(crate) fn rto(&self) -> Duration {
        self.rto
    }

    /// Total retransmissions so far.
    pub(crate) fn retransmits(&self) -> u64 {
        self.retransmits
    }

    /// Produce every segment due for transmission at `now`.
    pub(crate) fn flush(&mut self, now: Instant) -> Vec<Segment> {
        let wnd = self.window();
        let una = self.rcv_nxt;
        let mut out = Vec::new();

        for sn in self.ack_list.drain(..) {
            out.push(Segment::control(self.conv, Command::Ack, wnd, sn, una));
        }

        if self.rmt_wnd == 0 {
            match self.window_ask_at {
                None => self.window_ask_at = Some(now + self.config.window_ask_interval),
                Some(at) if now >= at => {
                    out.push(Segment::control(self.conv, Command::WindowAsk, wnd, 0, una));
                    self.window_ask_at = Some(now + self.config.window_ask_interval);
                }
                Some(_) => {}
            }
        } else {
            self.window_ask_at = None;
        }

        if self.need_window_tell {
            out.push(Segment::control(self.conv, Command::WindowTell, wnd, 0, una));
            self.need_window_tell = false;
        }

        // First transmissions stay inside the window the peer advertised
        let window_end = self
            .snd_una()
            .saturating_add(u32::from(self.config.send_window.min(self.rmt_wnd)));
        let last_heard = self.last_heard;

        for (&sn, segment) in &mut self.snd_buf {
            let due = if segment.transmits == 0 {
                if sn >= window_end {
                    continue;
                }
                segment.rto = self.rto;
                true
            } else if segment.resend_at.is_some_and(|at| now >= at) {
                let peer_alive = matches!(
                    (last_heard, segment.sent_at),
                    (Some(heard), Some(sent)) if heard >= sent
                );
                segment.timeouts = if peer_alive { 1 } else { segment.timeouts + 1 };
                segment.rto = (segment.rto * 2).min(self.config.max_rto);
                segment.fast_resent = false;
                self.retransmits += 1;
                tracing::trace!(conv = self.conv, sn, rto = ?segment.rto, "retransmit on timeout");
                true
            } else if self.config.fast_resend > 0
                && !segment.fast_resent
                && segment.fast_acks >= self.config.fast_resend
            {
                segment.fast_resent = true;
                self.retransmits += 1;
                tracing::trace!(conv = self.conv, sn, "fast retransmit");
                true
            } else {
                false
            };

            if !due {
                continue;
            }

            segment.transmits += 1;
            segment.fast_acks = 0;
            segment.sent_at = Some(now);
            segment.resend_at = Some(now + segment.rto);
            if segment.timeouts >= self.config.dead_link {
                self.dead = true;
            }

            out.push(Segment {
                conv: self.conv,
                cmd: segment.cmd,
                wnd,
                sn,
                una,
                payload: segment.data.clone(),
            });
        }

        if wnd == 0 && !out.is_empty() {
            self.zero_window_sent = true;
        }

        out
    }
}
