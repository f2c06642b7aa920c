use alloc::vec::Vec;
use bitflags::bitflags;
use core::{cmp, fmt};

use super::Config;
use super::rtt::RttEstimator;
use crate::config::{MAX_ACK_RANGES, MAX_BUFFER_SIZE, REACK_TIMES};
use crate::storage::{StreamBuffer, WriteError};
use crate::time::Instant;
use crate::wire::{AckRepr, Offset};
use crate::{Error, Result};

/// The lifecycle state of a flow.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum State {
    /// The handshake request was sent and not yet answered.
    Request,
    Established,
    /// Closed locally; waiting for the peer to acknowledge the close and
    /// every byte written.
    FinWait,
    /// Closed by the peer; the local side may still read and write.
    CloseWait,
    Closed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            State::Request => write!(f, "REQUEST"),
            State::Established => write!(f, "ESTABLISHED"),
            State::FinWait => write!(f, "FIN-WAIT"),
            State::CloseWait => write!(f, "CLOSE-WAIT"),
            State::Closed => write!(f, "CLOSED"),
        }
    }
}

bitflags! {
    /// Which readiness callbacks a flow reports.
    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    pub struct Notify: u8 {
        const RECV = 0b01;
        const SEND = 0b10;
    }
}

/// What became of an incoming data segment.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum DataOutcome {
    /// New bytes were stored; `in_order` if they extended the readable prefix.
    New { in_order: bool },
    /// Every byte had been received before.
    Duplicate,
    /// The segment did not fit the receive window.
    Dropped,
}

fn alloc_buffer(size: usize) -> Result<StreamBuffer<'static>> {
    if size == 0 || size >= MAX_BUFFER_SIZE {
        return Err(Error::BadParameter);
    }
    let mut storage = Vec::new();
    storage
        .try_reserve_exact(size)
        .map_err(|_| Error::AllocError)?;
    storage.resize(size, 0);
    Ok(StreamBuffer::new(storage))
}

/// One flow.
///
/// The send buffer's cursor is `swin_start`: bytes leave it once the peer
/// acknowledged them. The receive buffer's contiguous end is `rwin_start`.
#[derive(Debug)]
pub(crate) struct Connection {
    pub flow: u32,
    pub map_id: u16,
    pub state: State,
    /// One past the highest offset the peer accepts. Never decreases.
    swin_limit: u64,
    /// Next byte to be transmitted for the first time.
    pub send_offset: u64,
    /// Out-of-order ranges announced in acknowledgments.
    pending_sack: heapless::Vec<(u64, u64), MAX_ACK_RANGES>,
    reack_times: u8,
    /// Last time the peer said anything on this flow; `None` until the
    /// first tick.
    pub last_responsed: Option<Instant>,
    pub next_ack_time: Option<Instant>,
    next_idle_ack: Option<Instant>,
    pub notify: Notify,
    pub dup_acks: u8,
    pub rtt: RttEstimator,
    send_buf: StreamBuffer<'static>,
    recv_buf: StreamBuffer<'static>,
    /// When the handshake request or the close notification is due.
    pub control_at: Option<Instant>,
    /// Offset one past the last byte we will ever write.
    pub local_final: Option<u64>,
    pub close_acked: bool,
    /// Offset one past the last byte the peer will ever write.
    pub peer_final: Option<u64>,
}

impl Connection {
    pub fn new(flow: u32, map_id: u16, state: State, config: &Config) -> Result<Connection> {
        Ok(Connection {
            flow,
            map_id,
            state,
            // Until the peer advertises its window, assume it matches ours.
            swin_limit: config.recv_buffer_size as u64,
            send_offset: 0,
            pending_sack: heapless::Vec::new(),
            reack_times: 0,
            last_responsed: None,
            next_ack_time: None,
            next_idle_ack: None,
            notify: Notify::all(),
            dup_acks: 0,
            rtt: RttEstimator::default(),
            send_buf: alloc_buffer(config.send_buffer_size)?,
            recv_buf: alloc_buffer(config.recv_buffer_size)?,
            control_at: None,
            local_final: None,
            close_acked: false,
            peer_final: None,
        })
    }

    /// First byte not yet acknowledged by the peer.
    pub fn swin_start(&self) -> u64 {
        self.send_buf.cursor()
    }

    pub fn swin_size(&self) -> u64 {
        self.swin_limit.saturating_sub(self.swin_start())
    }

    /// One past the last byte the application wrote.
    pub fn write_offset(&self) -> u64 {
        self.send_buf.contiguous_end()
    }

    /// First byte not yet received contiguously.
    pub fn rwin_start(&self) -> u64 {
        self.recv_buf.contiguous_end()
    }

    pub fn rwin_size(&self) -> u64 {
        self.recv_buf.window_end() - self.rwin_start()
    }

    pub fn writable_bytes(&self) -> usize {
        self.send_buf.writable_bytes()
    }

    pub fn readable_bytes(&self) -> usize {
        self.recv_buf.readable_bytes()
    }

    /// Bytes that may be transmitted for the first time right now.
    pub fn sendable(&self) -> u64 {
        let limit = self.swin_start() + self.swin_size();
        cmp::min(self.write_offset(), limit).saturating_sub(self.send_offset)
    }

    pub fn has_unsent(&self) -> bool {
        self.send_offset < self.write_offset()
    }

    pub fn has_unacked(&self) -> bool {
        self.swin_start() < self.write_offset()
    }

    /// Whether the flow may carry data segments.
    pub fn can_transmit(&self) -> bool {
        matches!(
            self.state,
            State::Established | State::FinWait | State::CloseWait
        )
    }

    /// Raise the peer's window limit; it never shrinks.
    pub fn update_peer_window(&mut self, win_start: u64, win_size: u32) {
        let limit = win_start + win_size as u64;
        if limit > self.swin_limit {
            self.swin_limit = limit;
        }
    }

    /// Drop acknowledged bytes up to `offset` from the send buffer.
    pub fn advance_swin(&mut self, offset: u64) {
        let acked = offset.saturating_sub(self.swin_start());
        let skipped = self.send_buf.skip(acked as usize);
        debug_assert_eq!(skipped as u64, acked);
        if self.send_offset < self.swin_start() {
            self.send_offset = self.swin_start();
        }
    }

    /// Copy bytes starting at the absolute `offset` of the send stream.
    pub fn read_send(&self, offset: u64, buf: &mut [u8]) -> usize {
        self.send_buf.read_at(offset, buf)
    }

    /// Append application bytes to the send stream, all or nothing.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.send_buf.writable_bytes() {
            return Err(Error::NotEnoughSpace);
        }
        let written = self.send_buf.append(data);
        debug_assert_eq!(written, data.len());
        Ok(())
    }

    pub fn recv(&mut self, buf: &mut [u8]) -> usize {
        let nearly_closed = self.window_nearly_closed();
        let size = self.recv_buf.read(buf);
        if size > 0 && nearly_closed {
            self.schedule_ack(Instant::ZERO);
        }
        size
    }

    pub fn peek(&self, buf: &mut [u8]) -> usize {
        self.recv_buf.peek(buf)
    }

    pub fn skip(&mut self, len: usize) -> usize {
        let nearly_closed = self.window_nearly_closed();
        let size = self.recv_buf.skip(len);
        if size > 0 && nearly_closed {
            self.schedule_ack(Instant::ZERO);
        }
        size
    }

    fn window_nearly_closed(&self) -> bool {
        self.rwin_size() < (self.recv_buf.capacity() / 4) as u64
    }

    /// Store an incoming segment and schedule the acknowledgment it calls for.
    pub fn on_data(
        &mut self,
        offset: u64,
        payload: &[u8],
        now: Instant,
        config: &Config,
    ) -> DataOutcome {
        if payload.is_empty() {
            return DataOutcome::Dropped;
        }
        let end = offset + payload.len() as u64;
        if self.peer_final.is_some_and(|fin| end > fin) {
            net_debug!("flow {}: data past final offset", self.flow);
            return DataOutcome::Dropped;
        }

        let prev_end = self.rwin_start();
        match self.recv_buf.write(offset, payload) {
            Ok(0) => {
                self.schedule_ack(now);
                DataOutcome::Duplicate
            }
            Ok(_) => {
                let in_order = offset <= prev_end;
                if in_order && !self.recv_buf.has_holes() {
                    self.schedule_ack(now + config.fast_ack_delay);
                } else {
                    if !in_order {
                        self.add_sack(offset, end);
                    }
                    self.schedule_ack(now);
                }
                DataOutcome::New { in_order }
            }
            Err(WriteError::OutOfRange) if offset < self.recv_buf.cursor() => {
                self.schedule_ack(now);
                DataOutcome::Duplicate
            }
            Err(err) => {
                net_trace!(
                    "flow {}: dropping segment at {}+{}: {}",
                    self.flow,
                    offset,
                    payload.len(),
                    err
                );
                self.schedule_ack(now);
                DataOutcome::Dropped
            }
        }
    }

    fn add_sack(&mut self, start: u64, end: u64) {
        self.reack_times = 0;
        for range in self.pending_sack.iter_mut() {
            if start <= range.1 && end >= range.0 {
                range.0 = cmp::min(range.0, start);
                range.1 = cmp::max(range.1, end);
                return;
            }
        }
        if self.pending_sack.is_full() {
            self.pending_sack.remove(0);
        }
        let _ = self.pending_sack.push((start, end));
    }

    /// Request an acknowledgment no later than `at`.
    pub fn schedule_ack(&mut self, at: Instant) {
        self.next_ack_time = Some(match self.next_ack_time {
            Some(prev) => cmp::min(prev, at),
            None => at,
        });
    }

    pub fn ack_due(&self, now: Instant) -> bool {
        self.next_ack_time.is_some_and(|at| at <= now)
    }

    /// Schedule the periodic acknowledgment of an idle flow if it is due.
    pub fn poll_idle_ack(&mut self, now: Instant, config: &Config) {
        match self.next_idle_ack {
            None => self.next_idle_ack = Some(now + config.normal_ack_delay),
            Some(at) if at <= now => self.schedule_ack(now),
            Some(_) => (),
        }
    }

    /// Build the acknowledgment to emit now, and advance the re-ack state.
    pub fn build_ack(&mut self, now: Instant, config: &Config) -> AckRepr {
        let rwin_start = self.rwin_start();
        self.pending_sack.retain(|&(_, end)| end > rwin_start);

        let mut ranges = heapless::Vec::new();
        for &(start, end) in self.pending_sack.iter() {
            let start = cmp::max(start, rwin_start);
            let _ = ranges.push((Offset::from_stream(start), Offset::from_stream(end)));
        }

        self.next_ack_time = None;
        if !ranges.is_empty() {
            if self.reack_times < REACK_TIMES {
                self.reack_times += 1;
                self.next_ack_time = Some(now + config.reack_delay);
            } else {
                self.pending_sack.clear();
                self.reack_times = 0;
            }
        }
        self.next_idle_ack = Some(now + config.normal_ack_delay);

        AckRepr {
            flow: self.flow,
            win_start: Offset::from_stream(rwin_start),
            win_size: cmp::min(self.rwin_size(), u32::MAX as u64) as u32,
            ranges,
        }
    }

    /// Whether a locally closed flow has nothing left to wait for.
    pub fn fin_wait_done(&self) -> bool {
        self.state == State::FinWait
            && self.close_acked
            && self
                .local_final
                .is_none_or(|fin| self.swin_start() >= fin)
    }

    /// Whether a remotely closed flow has delivered and been delivered
    /// everything.
    pub fn close_wait_done(&self) -> bool {
        self.state == State::CloseWait
            && self
                .peer_final
                .is_some_and(|fin| self.recv_buf.cursor() >= fin)
            && !self.has_unacked()
    }

    pub fn control_due(&self, now: Instant) -> bool {
        self.control_at.is_some_and(|at| at <= now)
    }
}
