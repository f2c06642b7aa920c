/*! The transport engine.

A [`Host`] owns one datagram [`Device`], the table of flows multiplexed over
it, and the retransmission table shared by every flow. It is driven by two
event handlers:

 * [`Host::io_event`] whenever the device may have datagrams to receive;
 * [`Host::time_event`] at the cadence the host requests through
   [`Handler::on_timer`].

Every other operation acts on a single flow and never blocks. Application
callbacks are delivered through the [`Handler`] passed at construction.

```rust
use std::net::SocketAddr;
use rdtp::phy::Loopback;
use rdtp::time::Instant;
use rdtp::{Config, Host};

let local = SocketAddr::from(([127, 0, 0, 1], 2000));
let remote = SocketAddr::from(([127, 0, 0, 1], 3000));
let mut host = Host::new(Loopback::new(local), (), Config::default()).unwrap();
host.set_remote_addr(remote);
host.connect(7, 0).unwrap();
host.time_event(Instant::from_millis(0));
assert_eq!(host.device().tx_len(), 2); // handshake request and ping
```
*/

use alloc::collections::BTreeMap;
use core::net::SocketAddr;

use crate::config::{MAX_BUFFER_SIZE, MAX_DATA_SIZE, RETRANS_RESERVE_DIV};
use crate::phy::Device;
use crate::time::{Duration, Instant};
use crate::{Error, Result};

mod ack;
mod connection;
mod driver;
mod rate;
mod retrans;
mod rtt;

pub use self::connection::{Notify, State};
pub use self::rate::CongestionControl;

use self::connection::Connection;
use self::rate::AnyController;
use self::retrans::RetransQueue;

/// Runtime parameters of a [`Host`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Size of each flow's send buffer, in bytes.
    pub send_buffer_size: usize,
    /// Size of each flow's receive buffer, in bytes.
    pub recv_buffer_size: usize,
    /// Upper bound of the send-rate ceiling, in bytes per second.
    pub max_send_rate: u32,
    /// Lower bound of the send-rate ceiling, in bytes per second.
    pub min_send_rate: u32,
    /// A flow the peer has not spoken on for this long is closed.
    pub connection_timeout: Duration,
    /// A remote endpoint silent for this long is declared offline.
    pub client_timeout: Duration,
    pub ping_interval: Duration,
    /// Length of one send-budget unit.
    pub flow_ctrl_unit: Duration,
    /// Delay of the acknowledgment for in-order data.
    pub fast_ack_delay: Duration,
    /// Delay between re-announcements of selective ranges.
    pub reack_delay: Duration,
    /// Interval of the acknowledgments of idle flows.
    pub normal_ack_delay: Duration,
    /// Tick interval requested while nothing is pending.
    pub idle_interval: Duration,
    /// Tick interval requested while data is pending.
    pub busy_interval: Duration,
    /// Interval between repetitions of an unanswered handshake request or
    /// close notification.
    pub handshake_retry: Duration,
    /// Rate measurement window while data is pending.
    pub ctrl_busy_window: Duration,
    /// Rate measurement window while nothing is pending.
    pub ctrl_idle_window: Duration,
    /// A segment that expires after this many retransmissions closes its flow.
    pub max_retrans_turn: u32,
    pub congestion_control: CongestionControl,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            send_buffer_size: 256 * 1024,
            recv_buffer_size: 256 * 1024,
            max_send_rate: 8 * 1024 * 1024,
            min_send_rate: 64 * 1024,
            connection_timeout: Duration::from_millis(60_000),
            client_timeout: Duration::from_millis(300_000),
            ping_interval: Duration::from_millis(2_000),
            flow_ctrl_unit: Duration::from_millis(10),
            fast_ack_delay: Duration::from_millis(20),
            reack_delay: Duration::from_millis(40),
            normal_ack_delay: Duration::from_millis(1_000),
            idle_interval: Duration::from_millis(1_000),
            busy_interval: Duration::from_millis(1),
            handshake_retry: Duration::from_millis(1_000),
            ctrl_busy_window: Duration::from_millis(1_000),
            ctrl_idle_window: Duration::from_millis(5_000),
            max_retrans_turn: 10,
            congestion_control: CongestionControl::default(),
        }
    }
}

impl Config {
    fn check(&self) -> Result<()> {
        let buffers_ok = (1..MAX_BUFFER_SIZE).contains(&self.send_buffer_size)
            && (1..MAX_BUFFER_SIZE).contains(&self.recv_buffer_size);
        let rates_ok = self.max_send_rate > 0 && self.min_send_rate <= self.max_send_rate;
        let timers_ok = self.flow_ctrl_unit > Duration::ZERO
            && self.busy_interval > Duration::ZERO
            && self.busy_interval <= self.idle_interval;
        if buffers_ok && rates_ok && timers_ok && self.max_retrans_turn > 0 {
            Ok(())
        } else {
            Err(Error::BadParameter)
        }
    }
}

/// Application callbacks.
///
/// Every method has a default, so an implementation only overrides what it
/// cares about. The unit type accepts every flow and ignores everything else.
#[allow(unused_variables)]
pub trait Handler {
    /// The peer asked to open `flow`; return whether to accept it.
    fn on_accept(&mut self, flow: u32, map_id: u16) -> bool {
        true
    }

    /// `flow` reached `CLOSED` and was released. Called exactly once per flow.
    fn on_close(&mut self, flow: u32) {}

    /// New bytes became readable on `flow`.
    fn on_receive(&mut self, flow: u32, readable: usize) {}

    /// Space became writable on `flow`.
    fn on_send(&mut self, flow: u32, writable: usize) {}

    /// The host wants its next `time_event` after `interval`.
    fn on_timer(&mut self, interval: Duration) {}
}

impl Handler for () {}

/// Aggregate statistics of a [`Host`].
///
/// `*_stat` byte counters cover every datagram, `*_data` and `*_ack` only
/// data segments and acknowledgments.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub send_bytes_stat: u64,
    pub recv_bytes_stat: u64,
    pub send_bytes_data: u64,
    pub recv_bytes_data: u64,
    pub send_bytes_ack: u64,
    pub recv_bytes_ack: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    /// Data segments transmitted for the first time.
    pub data_packet_post: u64,
    pub retrans_packet_post: u64,
    /// Duplicate data segments and stale acknowledgments received.
    pub repeat_packet_recv: u64,
    /// Datagrams the device refused.
    pub send_error: u64,
    pub connection_num: usize,
    /// Round-trip time to the remote endpoint, from the last ping.
    pub rtt: Option<Duration>,
}

/// The send budget of the current flow-control unit.
#[derive(Debug, Default)]
struct RateUnit {
    start: Option<Instant>,
    budget: u32,
    used: u32,
}

impl RateUnit {
    /// Whether another segment may go out. A segment may overrun the
    /// budget, as long as some was left; retransmissions may dip into a
    /// reserve on top of it.
    fn allows(&self, retransmission: bool) -> bool {
        let mut limit = self.budget;
        if retransmission {
            limit = limit.saturating_add(self.budget / RETRANS_RESERVE_DIV);
        }
        self.used < limit
    }

    fn charge(&mut self, len: usize) {
        self.used = self.used.saturating_add(len as u32);
    }

    fn is_exhausted(&self) -> bool {
        !self.allows(false)
    }
}

/// The transport engine.
#[derive(Debug)]
pub struct Host<D: Device, H: Handler> {
    device: D,
    handler: H,
    config: Config,
    stats: Stats,
    connections: BTreeMap<u32, Connection>,
    retrans: RetransQueue,
    controller: AnyController,
    unit: RateUnit,
    remote_addr: Option<SocketAddr>,
    remote_locked: bool,
    remote_online: bool,
    /// Last datagram from the remote endpoint; `None` until the first tick.
    last_remote_activity: Option<Instant>,
    ping_id: u32,
    next_ping: Option<Instant>,
    /// Flow the next round-robin transmission pass starts at.
    rr_next: u32,
}

impl<D: Device, H: Handler> Host<D, H> {
    /// Create a host transmitting through `device`.
    pub fn new(device: D, handler: H, config: Config) -> Result<Host<D, H>> {
        config.check()?;
        let controller = AnyController::new(&config);
        let mut host = Host {
            device,
            handler,
            config,
            stats: Stats::default(),
            connections: BTreeMap::new(),
            retrans: RetransQueue::new(),
            controller,
            unit: RateUnit::default(),
            remote_addr: None,
            remote_locked: false,
            remote_online: false,
            last_remote_activity: None,
            ping_id: 0,
            next_ping: None,
            rr_next: 0,
        };
        host.unit.budget = host.unit_budget();
        Ok(host)
    }

    /// Release every flow and return the device and the handler.
    pub fn shutdown(mut self) -> (D, H) {
        let flows: alloc::vec::Vec<u32> = self.connections.keys().copied().collect();
        for flow in flows {
            self.release(flow);
        }
        (self.device, self.handler)
    }

    /// Open `flow` towards the remote endpoint.
    ///
    /// The handshake request goes out on the next `time_event`.
    pub fn connect(&mut self, flow: u32, map_id: u16) -> Result<()> {
        if self.remote_addr.is_none() || !self.remote_online {
            return Err(Error::RemoteOffline);
        }
        if self.connections.contains_key(&flow) {
            return Err(Error::RecordExists);
        }
        let mut conn = Connection::new(flow, map_id, State::Request, &self.config)?;
        conn.control_at = Some(Instant::ZERO);
        self.connections.insert(flow, conn);
        self.stats.connection_num = self.connections.len();
        net_debug!("flow {}: connecting, map {}", flow, map_id);
        Ok(())
    }

    /// Close `flow`.
    ///
    /// A flow still in the handshake is released at once, as is a flow the
    /// peer closed already. An established flow keeps delivering its buffered
    /// bytes and is released once the peer acknowledged them and the close.
    pub fn close(&mut self, flow: u32) -> Result<()> {
        let conn = self
            .connections
            .get_mut(&flow)
            .ok_or(Error::RecordNotFound)?;
        match conn.state {
            State::Request => {
                if self.remote_addr.is_some() {
                    let _ = self.post(&crate::wire::Repr::Reset { flow });
                }
                self.release(flow);
            }
            State::Established => {
                conn.state = State::FinWait;
                conn.local_final = Some(conn.write_offset());
                conn.control_at = Some(Instant::ZERO);
                net_debug!("flow {}: {} -> {}", flow, State::Established, State::FinWait);
            }
            State::CloseWait => self.release(flow),
            State::FinWait | State::Closed => (),
        }
        Ok(())
    }

    fn connection(&self, flow: u32) -> Result<&Connection> {
        self.connections.get(&flow).ok_or(Error::RecordNotFound)
    }

    fn connection_mut(&mut self, flow: u32) -> Result<&mut Connection> {
        self.connections.get_mut(&flow).ok_or(Error::RecordNotFound)
    }

    /// Queue `data` for transmission on `flow`.
    ///
    /// Either every byte is queued or none is: `NotEnoughSpace` if `data`
    /// exceeds [`writable_bytes`](#method.writable_bytes) of the buffer.
    pub fn send(&mut self, flow: u32, data: &[u8]) -> Result<()> {
        let conn = self.connection_mut(flow)?;
        match conn.state {
            State::Request | State::Established | State::CloseWait => conn.write(data),
            State::FinWait | State::Closed => Err(Error::InvalidState),
        }
    }

    /// Dequeue received bytes of `flow` into `buf`.
    pub fn recv(&mut self, flow: u32, buf: &mut [u8]) -> Result<usize> {
        Ok(self.connection_mut(flow)?.recv(buf))
    }

    /// Copy received bytes of `flow` into `buf` without dequeuing them.
    pub fn peek(&self, flow: u32, buf: &mut [u8]) -> Result<usize> {
        Ok(self.connection(flow)?.peek(buf))
    }

    /// Discard up to `len` received bytes of `flow`.
    pub fn skip(&mut self, flow: u32, len: usize) -> Result<usize> {
        Ok(self.connection_mut(flow)?.skip(len))
    }

    /// Bytes `send` accepts on `flow` right now.
    ///
    /// Zero while the host has used up its send budget, so that callers
    /// hold back until the next unit.
    pub fn writable_bytes(&self, flow: u32) -> Result<usize> {
        let conn = self.connection(flow)?;
        if self.unit.is_exhausted() {
            return Ok(0);
        }
        Ok(conn.writable_bytes())
    }

    pub fn readable_bytes(&self, flow: u32) -> Result<usize> {
        Ok(self.connection(flow)?.readable_bytes())
    }

    /// Set the remote endpoint every datagram is sent to.
    ///
    /// The endpoint is considered online until it stays silent for
    /// `client_timeout`.
    pub fn set_remote_addr(&mut self, addr: SocketAddr) {
        self.remote_addr = Some(addr);
        self.remote_online = true;
        self.last_remote_activity = None;
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// When locked, datagrams from any other source are dropped and the
    /// remote address is no longer learned from incoming datagrams.
    pub fn set_remote_locked(&mut self, locked: bool) {
        self.remote_locked = locked;
    }

    pub fn is_remote_online(&self) -> bool {
        self.remote_online
    }

    pub fn set_notify_recv(&mut self, flow: u32, enabled: bool) -> Result<()> {
        self.connection_mut(flow)?.notify.set(Notify::RECV, enabled);
        Ok(())
    }

    pub fn set_notify_send(&mut self, flow: u32, enabled: bool) -> Result<()> {
        self.connection_mut(flow)?.notify.set(Notify::SEND, enabled);
        Ok(())
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn state(&self, flow: u32) -> Result<State> {
        Ok(self.connection(flow)?.state)
    }

    pub fn map_id(&self, flow: u32) -> Result<u16> {
        Ok(self.connection(flow)?.map_id)
    }

    /// Smoothed round-trip time of `flow`, once an acknowledgment was timed.
    pub fn rtt(&self, flow: u32) -> Result<Option<Duration>> {
        Ok(self.connection(flow)?.rtt.srtt())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of segments waiting for acknowledgment, across every flow.
    pub fn retrans_count(&self) -> usize {
        self.retrans.len()
    }

    /// The current send-rate ceiling, in bytes per second.
    pub fn send_rate_limit(&self) -> u32 {
        self.controller.inner().rate()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Bytes the ceiling allows within one flow-control unit.
    fn unit_budget(&self) -> u32 {
        let budget = self.send_rate_limit() as u64 * self.config.flow_ctrl_unit.total_millis() / 1000;
        budget.clamp(MAX_DATA_SIZE as u64, u32::MAX as u64) as u32
    }
}
