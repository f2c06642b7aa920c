use core::cmp;

use super::connection::{DataOutcome, State};
use super::retrans::RetransEntry;
use super::{Handler, Host};
use crate::config::FAST_RETRANS_DUP_ACKS;
use crate::phy::Device;
use crate::time::{Duration, Instant};
use crate::wire::{AckRepr, Offset, Repr};

impl<D: Device, H: Handler> Host<D, H> {
    /// Absorb a data segment into the flow's receive buffer.
    pub(super) fn process_data(&mut self, now: Instant, flow: u32, offset: Offset, payload: &[u8]) {
        let Some(conn) = self.connections.get_mut(&flow) else {
            net_debug!("flow {}: data for unknown flow, resetting", flow);
            let _ = self.post(&Repr::Reset { flow });
            return;
        };
        conn.last_responsed = Some(now);
        let established = conn.state == State::Request;
        if established {
            // The handshake response was lost; the peer's data proves it accepted.
            net_debug!("flow {}: {} -> {} by data", flow, State::Request, State::Established);
            conn.state = State::Established;
            conn.control_at = None;
        }

        let offset = offset.unwrap(conn.rwin_start());
        let readable = conn.readable_bytes();
        match conn.on_data(offset, payload, now, &self.config) {
            DataOutcome::New { in_order } => {
                net_trace!(
                    "flow {}: received {}+{}, in order={}",
                    flow,
                    offset,
                    payload.len(),
                    in_order
                );
                if conn.readable_bytes() > readable {
                    self.notify_recv(flow);
                }
            }
            DataOutcome::Duplicate => {
                net_trace!("flow {}: duplicate segment at {}", flow, offset);
                self.stats.repeat_packet_recv += 1;
            }
            DataOutcome::Dropped => (),
        }
        if established {
            self.notify_send(flow);
        }
    }

    /// Apply an acknowledgment to the flow's send window and the
    /// retransmission table.
    pub(super) fn process_ack(&mut self, now: Instant, ack: &AckRepr) {
        let flow = ack.flow;
        let Some(conn) = self.connections.get_mut(&flow) else {
            net_debug!("flow {}: ack for unknown flow, resetting", flow);
            let _ = self.post(&Repr::Reset { flow });
            return;
        };
        conn.last_responsed = Some(now);

        let swin_start = conn.swin_start();
        let win_start = ack.win_start.unwrap(swin_start);
        if win_start > conn.send_offset {
            net_debug!(
                "flow {}: ack at {} beyond sent data at {}, dropped",
                flow,
                win_start,
                conn.send_offset
            );
            return;
        }
        conn.update_peer_window(win_start, ack.win_size);

        let mut rtt_sample: Option<Duration> = None;
        let mut sample = |entry: &RetransEntry| {
            // Karn: only segments sent once give an unambiguous sample.
            if entry.turn == 0 {
                rtt_sample = Some(now.saturating_duration_since(entry.first_sent));
            }
        };

        let mut acked = 0;
        if win_start < swin_start {
            net_trace!("flow {}: stale ack at {} below {}", flow, win_start, swin_start);
            self.stats.repeat_packet_recv += 1;
        } else if win_start > swin_start {
            acked += self.retrans.remove_covered(flow, 0, win_start, &mut sample);
            conn.advance_swin(win_start);
            conn.dup_acks = 0;
        }

        let swin_start = conn.swin_start();
        let mut selective = false;
        for &(start, end) in ack.ranges.iter() {
            let start = cmp::max(start.unwrap(swin_start), swin_start);
            let end = cmp::min(end.unwrap(swin_start), conn.send_offset);
            if start < end {
                selective = true;
                acked += self.retrans.remove_covered(flow, start, end, &mut sample);
            }
        }

        match self.retrans.first_of_flow(flow) {
            None => conn.dup_acks = 0,
            Some(head) if selective && head.offset <= swin_start => {
                conn.dup_acks = conn.dup_acks.saturating_add(1);
                if conn.dup_acks >= FAST_RETRANS_DUP_ACKS {
                    net_debug!("flow {}: fast retransmit at {}", flow, head.offset);
                    let offset = head.offset;
                    self.retrans.reschedule_now(flow, offset, now);
                    conn.dup_acks = 0;
                }
            }
            Some(_) => (),
        }

        if let Some(rtt) = rtt_sample {
            conn.rtt.sample(rtt.total_millis() as u32);
            self.controller.inner_mut().on_rtt(rtt);
        }
        net_trace!(
            "flow {}: ack {} (+{} ranges), {} segments acknowledged",
            flow,
            win_start,
            ack.ranges.len(),
            acked
        );

        let freed = win_start > swin_start || acked > 0;
        if conn.fin_wait_done() {
            self.release(flow);
        } else if freed {
            self.notify_send(flow);
        }
    }

    /// Emit the flow's acknowledgment if one is due.
    pub(super) fn flush_ack(&mut self, flow: u32, now: Instant) {
        let Some(conn) = self.connections.get_mut(&flow) else {
            return;
        };
        if !conn.ack_due(now) {
            return;
        }
        let ack = conn.build_ack(now, &self.config);
        let _ = self.post(&Repr::Ack(ack));
    }
}
