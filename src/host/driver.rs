use alloc::vec::Vec;
use core::cmp;
use core::net::SocketAddr;

use super::connection::{Connection, Notify, State};
use super::retrans::retrans_delay;
use super::{Handler, Host};
use crate::config::MAX_DATA_SIZE;
use crate::phy::Device;
use crate::time::{Duration, Instant};
use crate::wire::{Offset, Packet, Repr};
use crate::{Error, Result};

/// Large enough for any message this crate emits.
const DATAGRAM_BUFFER_LEN: usize = 2048;

impl<D: Device, H: Handler> Host<D, H> {
    /// Receive and process every datagram pending on the device.
    ///
    /// Returns the number of datagrams received.
    pub fn io_event(&mut self, now: Instant) -> Result<usize> {
        let mut buffer = [0u8; DATAGRAM_BUFFER_LEN];
        let mut count = 0;
        loop {
            match self.device.receive(&mut buffer) {
                Ok(Some((len, from))) => {
                    count += 1;
                    self.process(now, from, &buffer[..len]);
                }
                Ok(None) => return Ok(count),
                Err(err) => {
                    net_debug!("host: receive failed: {}", err);
                    return Err(err.into());
                }
            }
        }
    }

    /// Process one datagram received from `from`.
    ///
    /// Callers that own the socket themselves feed datagrams through here
    /// instead of `io_event`.
    pub fn process(&mut self, now: Instant, from: SocketAddr, datagram: &[u8]) {
        if self.remote_locked && self.remote_addr != Some(from) {
            net_debug!("host: dropping datagram from foreign {}", from);
            return;
        }
        let repr = match Packet::new_checked(datagram).and_then(|packet| Repr::parse(&packet)) {
            Ok(repr) => repr,
            Err(err) => {
                net_debug!("host: dropping malformed datagram from {}: {}", from, err);
                return;
            }
        };
        net_trace!("host: <- {} {}", from, repr);

        self.stats.packets_recv += 1;
        self.stats.recv_bytes_stat += datagram.len() as u64;
        match repr {
            Repr::Data { .. } => self.stats.recv_bytes_data += datagram.len() as u64,
            Repr::Ack(_) => self.stats.recv_bytes_ack += datagram.len() as u64,
            _ => (),
        }

        if !self.remote_locked {
            self.remote_addr = Some(from);
        }
        if !self.remote_online {
            net_info!("host: remote {} online", from);
        }
        self.remote_online = true;
        self.last_remote_activity = Some(now);

        let flow = repr.flow();
        match repr {
            Repr::Ping { id, timestamp } => {
                let _ = self.post(&Repr::Pong { id, timestamp });
            }
            Repr::Pong { timestamp, .. } => {
                let rtt = (now.total_millis() as u32).wrapping_sub(timestamp);
                let rtt = Duration::from_millis(rtt as u64);
                self.stats.rtt = Some(rtt);
                self.controller.inner_mut().on_rtt(rtt);
            }
            Repr::ConnRequest { flow, map_id } => self.process_request(now, flow, map_id),
            Repr::ConnResponse { flow, accepted } => self.process_response(now, flow, accepted),
            Repr::Data {
                flow,
                offset,
                payload,
            } => self.process_data(now, flow, offset, payload),
            Repr::Ack(ref ack) => self.process_ack(now, ack),
            Repr::Close { flow, final_offset } => self.process_close(now, flow, final_offset),
            Repr::CloseAck { flow } => self.process_close_ack(now, flow),
            Repr::Reset { flow } => {
                if self.connections.contains_key(&flow) {
                    net_debug!("flow {}: reset by peer", flow);
                    self.release(flow);
                }
            }
        }

        if let Some(flow) = flow {
            self.flush_ack(flow, now);
        }
    }

    fn process_request(&mut self, now: Instant, flow: u32, map_id: u16) {
        let accepted = match self.connections.get_mut(&flow) {
            Some(conn) => {
                // Both ends opened the same flow, or our response was lost.
                if conn.state == State::Request {
                    conn.state = State::Established;
                    conn.control_at = None;
                }
                conn.last_responsed = Some(now);
                true
            }
            None => {
                let accepted = self.handler.on_accept(flow, map_id)
                    && match Connection::new(flow, map_id, State::Established, &self.config) {
                        Ok(mut conn) => {
                            conn.last_responsed = Some(now);
                            self.connections.insert(flow, conn);
                            self.stats.connection_num = self.connections.len();
                            true
                        }
                        Err(err) => {
                            net_debug!("flow {}: cannot accept: {}", flow, err);
                            false
                        }
                    };
                net_debug!("flow {}: request for map {}, accepted={}", flow, map_id, accepted);
                if accepted {
                    self.notify_send(flow);
                }
                accepted
            }
        };
        let _ = self.post(&Repr::ConnResponse { flow, accepted });
    }

    fn process_response(&mut self, now: Instant, flow: u32, accepted: bool) {
        let Some(conn) = self.connections.get_mut(&flow) else {
            return;
        };
        conn.last_responsed = Some(now);
        if conn.state != State::Request {
            return;
        }
        if accepted {
            conn.state = State::Established;
            conn.control_at = None;
            net_debug!("flow {}: {} -> {}", flow, State::Request, State::Established);
            self.notify_send(flow);
        } else {
            net_debug!("flow {}: rejected by peer", flow);
            self.release(flow);
        }
    }

    fn process_close(&mut self, now: Instant, flow: u32, final_offset: Offset) {
        let Some(conn) = self.connections.get_mut(&flow) else {
            let _ = self.post(&Repr::Reset { flow });
            return;
        };
        conn.last_responsed = Some(now);
        let final_offset = final_offset.unwrap(conn.rwin_start());
        conn.peer_final.get_or_insert(final_offset);
        match conn.state {
            State::Request | State::Established => {
                net_debug!("flow {}: {} -> {}", flow, conn.state, State::CloseWait);
                conn.state = State::CloseWait;
                conn.control_at = None;
            }
            State::FinWait | State::CloseWait | State::Closed => (),
        }
        let _ = self.post(&Repr::CloseAck { flow });
        self.notify_recv(flow);
    }

    fn process_close_ack(&mut self, now: Instant, flow: u32) {
        let Some(conn) = self.connections.get_mut(&flow) else {
            return;
        };
        conn.last_responsed = Some(now);
        if conn.state == State::FinWait && !conn.close_acked {
            conn.close_acked = true;
            conn.control_at = None;
        }
        if conn.fin_wait_done() {
            self.release(flow);
        }
    }

    /// Drive every timer of the host.
    pub fn time_event(&mut self, now: Instant) {
        self.poll_rate_unit(now);
        self.poll_ping(now);
        self.poll_remote_liveness(now);
        self.poll_connections(now);
        self.poll_retrans(now);
        self.poll_transmit(now);

        let busy = self.is_busy();
        self.controller.inner_mut().update(now, busy);
        let interval = self.next_interval(now, busy);
        self.handler.on_timer(interval);
    }

    fn poll_rate_unit(&mut self, now: Instant) {
        let elapsed = match self.unit.start {
            Some(start) => now.saturating_duration_since(start) >= self.config.flow_ctrl_unit,
            None => true,
        };
        if elapsed {
            self.unit.start = Some(now);
            self.unit.used = 0;
            self.unit.budget = self.unit_budget();
        }
    }

    fn poll_ping(&mut self, now: Instant) {
        if self.remote_addr.is_none() || self.next_ping.is_some_and(|at| at > now) {
            return;
        }
        let repr = Repr::Ping {
            id: self.ping_id,
            timestamp: now.total_millis() as u32,
        };
        self.ping_id = self.ping_id.wrapping_add(1);
        self.next_ping = Some(now + self.config.ping_interval);
        let _ = self.post(&repr);
    }

    fn poll_remote_liveness(&mut self, now: Instant) {
        if !self.remote_online {
            return;
        }
        let last = *self.last_remote_activity.get_or_insert(now);
        if now.saturating_duration_since(last) <= self.config.client_timeout {
            return;
        }
        net_info!(
            "host: remote {:?} silent for {}, offline",
            self.remote_addr,
            now.saturating_duration_since(last)
        );
        self.remote_online = false;
        let flows: Vec<u32> = self.connections.keys().copied().collect();
        for flow in flows {
            self.release(flow);
        }
    }

    fn poll_connections(&mut self, now: Instant) {
        let flows: Vec<u32> = self.connections.keys().copied().collect();
        for flow in flows {
            let Some(conn) = self.connections.get_mut(&flow) else {
                continue;
            };
            let last = *conn.last_responsed.get_or_insert(now);
            if now.saturating_duration_since(last) > self.config.connection_timeout {
                net_debug!("flow {}: timed out in {}", flow, conn.state);
                self.release(flow);
                continue;
            }
            if conn.fin_wait_done() || conn.close_wait_done() {
                net_debug!("flow {}: {} -> {}", flow, conn.state, State::Closed);
                // The peer still waits for whatever we owe it an ack for.
                let ack = conn
                    .next_ack_time
                    .is_some()
                    .then(|| conn.build_ack(now, &self.config));
                if let Some(ack) = ack {
                    let _ = self.post(&Repr::Ack(ack));
                }
                self.release(flow);
                continue;
            }

            let control = if conn.control_due(now) {
                conn.control_at = Some(now + self.config.handshake_retry);
                match conn.state {
                    State::Request => Some(Repr::ConnRequest {
                        flow,
                        map_id: conn.map_id,
                    }),
                    State::FinWait if !conn.close_acked => Some(Repr::Close {
                        flow,
                        final_offset: Offset::from_stream(conn.local_final.unwrap_or(0)),
                    }),
                    _ => {
                        conn.control_at = None;
                        None
                    }
                }
            } else {
                None
            };
            if conn.state != State::Request {
                conn.poll_idle_ack(now, &self.config);
            }
            if let Some(repr) = control {
                let _ = self.post(&repr);
            }
            self.flush_ack(flow, now);
        }
    }

    fn poll_retrans(&mut self, now: Instant) {
        while let Some(entry) = self.retrans.next_expired(now) {
            let Some(conn) = self.connections.get_mut(&entry.flow) else {
                self.retrans.remove(entry.flow, entry.offset);
                continue;
            };
            if entry.turn >= self.config.max_retrans_turn {
                net_debug!(
                    "flow {}: segment at {} unacknowledged after {} retransmissions",
                    entry.flow,
                    entry.offset,
                    entry.turn
                );
                self.release(entry.flow);
                continue;
            }

            let start = cmp::max(entry.offset, conn.swin_start());
            let end = entry.end();
            if start >= end {
                self.retrans.remove(entry.flow, entry.offset);
                continue;
            }
            let len = (end - start) as usize;
            if !self.unit.allows(true) {
                net_trace!("host: retransmission deferred, budget used");
                return;
            }

            let mut payload = [0u8; MAX_DATA_SIZE];
            let size = conn.read_send(start, &mut payload[..cmp::min(len, MAX_DATA_SIZE)]);
            conn.rtt.on_retransmit();
            let rto = conn.rtt.retransmission_timeout();
            let delay = retrans_delay(rto, entry.turn + 1);
            self.retrans.rearm(entry.flow, entry.offset, now, delay);
            if size == 0 {
                continue;
            }

            self.unit.charge(size);
            net_trace!(
                "flow {}: retransmitting {}+{}, turn {}",
                entry.flow,
                start,
                size,
                entry.turn + 1
            );
            let repr = Repr::Data {
                flow: entry.flow,
                offset: Offset::from_stream(start),
                payload: &payload[..size],
            };
            if self.post(&repr).is_ok() {
                self.stats.retrans_packet_post += 1;
            }
        }
    }

    /// Transmit new data, one segment per flow per pass, starting after the
    /// flow the previous tick stopped at.
    fn poll_transmit(&mut self, now: Instant) {
        let flows: Vec<u32> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.can_transmit() && conn.has_unsent())
            .map(|(&flow, _)| flow)
            .collect();
        if flows.is_empty() {
            return;
        }
        let first = flows
            .iter()
            .position(|&flow| flow >= self.rr_next)
            .unwrap_or(0);

        loop {
            let mut progress = false;
            for i in 0..flows.len() {
                let flow = flows[(first + i) % flows.len()];
                if self.unit.is_exhausted() {
                    self.rr_next = flow;
                    return;
                }
                match self.transmit_segment(flow, now) {
                    Ok(sent) => progress |= sent,
                    Err(_) => {
                        self.rr_next = flow;
                        return;
                    }
                }
            }
            if !progress {
                return;
            }
        }
    }

    /// Send the next new segment of `flow`. Returns whether one was sent.
    fn transmit_segment(&mut self, flow: u32, now: Instant) -> Result<bool> {
        let Some(conn) = self.connections.get_mut(&flow) else {
            return Ok(false);
        };
        let len = cmp::min(conn.sendable(), MAX_DATA_SIZE as u64) as usize;
        if len == 0 {
            return Ok(false);
        }
        let offset = conn.send_offset;
        let mut payload = [0u8; MAX_DATA_SIZE];
        let size = conn.read_send(offset, &mut payload[..len]);
        let rto = conn.rtt.retransmission_timeout();

        self.unit.charge(size);
        self.post(&Repr::Data {
            flow,
            offset: Offset::from_stream(offset),
            payload: &payload[..size],
        })?;

        if let Some(conn) = self.connections.get_mut(&flow) {
            conn.send_offset += size as u64;
        }
        self.retrans
            .insert(flow, offset, size, now, now + retrans_delay(rto, 0));
        self.stats.data_packet_post += 1;
        Ok(true)
    }

    fn is_busy(&self) -> bool {
        !self.retrans.is_empty() || self.connections.values().any(|conn| conn.has_unsent())
    }

    fn next_interval(&self, now: Instant, busy: bool) -> Duration {
        let base = if busy {
            self.config.busy_interval
        } else {
            self.config.idle_interval
        };
        let deadlines = self
            .connections
            .values()
            .flat_map(|conn| [conn.next_ack_time, conn.control_at])
            .chain([self.retrans.next_deadline(), self.next_ping])
            .flatten();
        let mut interval = base;
        for deadline in deadlines {
            interval = cmp::min(interval, deadline.saturating_duration_since(now));
        }
        cmp::max(interval, self.config.busy_interval)
    }

    /// Encode `repr` and hand it to the device, addressed to the remote.
    pub(super) fn post(&mut self, repr: &Repr) -> Result<()> {
        let to = self.remote_addr.ok_or(Error::RemoteOffline)?;
        let len = repr.buffer_len();
        let mut buffer = [0u8; DATAGRAM_BUFFER_LEN];
        if len > buffer.len() {
            return Err(Error::BadParameter);
        }
        repr.emit(&mut Packet::new_unchecked(&mut buffer[..len]));

        let result = self.device.transmit(to, &buffer[..len]);
        self.controller.inner_mut().on_post(len, result.is_ok());
        match result {
            Ok(()) => {
                net_trace!("host: -> {} {}", to, repr);
                self.stats.packets_sent += 1;
                self.stats.send_bytes_stat += len as u64;
                match repr {
                    Repr::Data { .. } => self.stats.send_bytes_data += len as u64,
                    Repr::Ack(_) => self.stats.send_bytes_ack += len as u64,
                    _ => (),
                }
                Ok(())
            }
            Err(err) => {
                net_debug!("host: transmit of {} failed: {}", repr, err);
                self.stats.send_error += 1;
                Err(err.into())
            }
        }
    }

    /// Remove `flow` and everything scheduled for it, and tell the handler.
    pub(super) fn release(&mut self, flow: u32) {
        let Some(mut conn) = self.connections.remove(&flow) else {
            return;
        };
        let purged = self.retrans.remove_flow(flow);
        net_debug!(
            "flow {}: {} -> {}, {} segments purged",
            flow,
            conn.state,
            State::Closed,
            purged
        );
        conn.state = State::Closed;
        self.stats.connection_num = self.connections.len();
        self.handler.on_close(flow);
    }

    pub(super) fn notify_send(&mut self, flow: u32) {
        if let Some(conn) = self.connections.get(&flow) {
            if conn.notify.contains(Notify::SEND) && conn.writable_bytes() > 0 {
                self.handler.on_send(flow, conn.writable_bytes());
            }
        }
    }

    pub(super) fn notify_recv(&mut self, flow: u32) {
        if let Some(conn) = self.connections.get(&flow) {
            if conn.notify.contains(Notify::RECV) {
                self.handler.on_receive(flow, conn.readable_bytes());
            }
        }
    }
}
