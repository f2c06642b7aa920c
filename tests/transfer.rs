use std::net::SocketAddr;

use rdtp::phy::{FaultInjector, Loopback};
use rdtp::time::{Duration, Instant};
use rdtp::{Config, Error, Handler, Host, State};

#[derive(Debug, Default)]
struct Events {
    reject: bool,
    closed: Vec<u32>,
    readable: usize,
}

impl Handler for Events {
    fn on_accept(&mut self, _flow: u32, _map_id: u16) -> bool {
        !self.reject
    }

    fn on_close(&mut self, flow: u32) {
        self.closed.push(flow);
    }

    fn on_receive(&mut self, _flow: u32, readable: usize) {
        self.readable = readable;
    }
}

type Node = Host<FaultInjector<Loopback>, Events>;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn node(port: u16, peer: u16, seed: u32, config: Config) -> Node {
    let device = FaultInjector::new(Loopback::new(addr(port)), seed);
    let mut host = Host::new(device, Events::default(), config).unwrap();
    host.set_remote_addr(addr(peer));
    host
}

fn pair(config: Config) -> (Node, Node) {
    (
        node(1000, 2000, 0x1234, config.clone()),
        node(2000, 1000, 0xbeef, config),
    )
}

fn step(a: &mut Node, b: &mut Node, now: Instant) {
    a.time_event(now);
    b.time_event(now);
    for _ in 0..16 {
        let moved = a.device_mut().inner_mut().deliver_to(b.device_mut().inner_mut())
            + b.device_mut().inner_mut().deliver_to(a.device_mut().inner_mut());
        if moved == 0 {
            break;
        }
        a.io_event(now).unwrap();
        b.io_event(now).unwrap();
    }
}

/// Push `data` from `a` to `b` on flow 7, stepping the clock by 10 ms.
fn transfer(a: &mut Node, b: &mut Node, data: &[u8], deadline: i64) -> Vec<u8> {
    let mut sent = 0;
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    let mut now = 0;
    while received.len() < data.len() && now < deadline {
        if a.state(7) == Ok(State::Established) && sent < data.len() {
            let len = a.writable_bytes(7).unwrap().min(data.len() - sent).min(4096);
            if len > 0 {
                a.send(7, &data[sent..sent + len]).unwrap();
                sent += len;
            }
        }
        step(a, b, Instant::from_millis(now));
        if let Ok(size) = b.recv(7, &mut buf) {
            received.extend_from_slice(&buf[..size]);
        }
        now += 10;
    }
    received
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
}

#[test]
fn test_ordered_delivery() {
    init_logger();
    let (mut a, mut b) = pair(Config::default());
    a.connect(7, 42).unwrap();
    assert_eq!(a.state(7), Ok(State::Request));

    let data = pattern(100 * 1024);
    let received = transfer(&mut a, &mut b, &data, 10_000);
    assert_eq!(received, data);
    assert_eq!(b.map_id(7), Ok(42));
    assert_eq!(a.stats().retrans_packet_post, 0);
    assert_eq!(b.stats().repeat_packet_recv, 0);
    assert!(a.stats().send_bytes_data >= data.len() as u64);
    assert_eq!(a.stats().connection_num, 1);
}

#[test]
fn test_lossy_delivery() {
    init_logger();
    let (mut a, mut b) = pair(Config::default());
    a.device_mut().set_drop_chance(100);
    b.device_mut().set_drop_chance(100);
    a.connect(7, 0).unwrap();

    let data = pattern(128 * 1024);
    let received = transfer(&mut a, &mut b, &data, 120_000);
    assert_eq!(received, data);
    assert!(a.stats().retrans_packet_post > 0);
}

#[test]
fn test_graceful_close() {
    init_logger();
    let (mut a, mut b) = pair(Config::default());
    a.connect(7, 0).unwrap();
    let data = pattern(5000);

    let mut now = 0;
    step(&mut a, &mut b, Instant::from_millis(now));
    assert_eq!(a.state(7), Ok(State::Established));
    a.send(7, &data).unwrap();
    a.close(7).unwrap();
    assert_eq!(a.state(7), Ok(State::FinWait));
    assert_eq!(a.send(7, b"late"), Err(Error::InvalidState));

    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    while now < 10_000 && (a.connection_count() > 0 || b.connection_count() > 0) {
        now += 10;
        step(&mut a, &mut b, Instant::from_millis(now));
        if let Ok(size) = b.recv(7, &mut buf) {
            received.extend_from_slice(&buf[..size]);
        }
    }
    assert_eq!(received, data);
    assert_eq!(a.handler().closed, [7]);
    assert_eq!(b.handler().closed, [7]);
    assert_eq!(b.state(7), Err(Error::RecordNotFound));
}

#[test]
fn test_rejected_connection() {
    init_logger();
    let (mut a, mut b) = pair(Config::default());
    b.handler_mut().reject = true;
    a.connect(7, 0).unwrap();
    step(&mut a, &mut b, Instant::from_millis(0));

    assert_eq!(a.state(7), Err(Error::RecordNotFound));
    assert_eq!(a.handler().closed, [7]);
    assert_eq!(b.connection_count(), 0);
    assert!(b.handler().closed.is_empty());
}

#[test]
fn test_stale_peer_is_reset() {
    init_logger();
    let (mut a, mut b) = pair(Config::default());
    a.connect(7, 0).unwrap();
    step(&mut a, &mut b, Instant::from_millis(0));
    assert_eq!(b.state(7), Ok(State::Established));

    // The peer restarted and lost every flow.
    let mut b = node(2000, 1000, 1, Config::default());
    a.send(7, b"anyone there?").unwrap();
    step(&mut a, &mut b, Instant::from_millis(10));

    assert_eq!(a.state(7), Err(Error::RecordNotFound));
    assert_eq!(a.handler().closed, [7]);
    assert_eq!(b.connection_count(), 0);
}

#[test]
fn test_client_timeout() {
    init_logger();
    let config = Config {
        client_timeout: Duration::from_millis(5_000),
        ..Config::default()
    };
    let (mut a, mut b) = pair(config);
    a.connect(7, 0).unwrap();
    a.connect(8, 0).unwrap();
    step(&mut a, &mut b, Instant::from_millis(0));
    assert_eq!(a.connection_count(), 2);

    // The peer goes silent.
    let mut now = 0;
    while now <= 5_000 {
        a.time_event(Instant::from_millis(now));
        now += 100;
    }
    assert!(a.is_remote_online());
    a.time_event(Instant::from_millis(5_001));
    assert!(!a.is_remote_online());
    assert_eq!(a.connection_count(), 0);
    assert_eq!(a.handler().closed, [7, 8]);
    assert_eq!(a.connect(9, 0), Err(Error::RemoteOffline));

    // Hearing from it again brings it back.
    b.time_event(Instant::from_millis(6_000));
    step(&mut a, &mut b, Instant::from_millis(6_000));
    assert!(a.is_remote_online());
    assert_eq!(a.connect(9, 0), Ok(()));
}

#[test]
fn test_stream_errors() {
    init_logger();
    let config = Config {
        send_buffer_size: 4096,
        recv_buffer_size: 4096,
        ..Config::default()
    };
    let (mut a, _) = pair(config.clone());
    let mut buf = [0u8; 16];

    assert_eq!(a.send(1, b"x"), Err(Error::RecordNotFound));
    assert_eq!(a.recv(1, &mut buf), Err(Error::RecordNotFound));
    assert_eq!(a.close(1), Err(Error::RecordNotFound));

    a.connect(1, 0).unwrap();
    assert_eq!(a.connect(1, 0), Err(Error::RecordExists));
    assert_eq!(a.send(1, &[0; 5000]), Err(Error::NotEnoughSpace));
    assert_eq!(a.writable_bytes(1), Ok(4096));
    assert_eq!(a.send(1, &[0; 4096]), Ok(()));
    assert_eq!(a.writable_bytes(1), Ok(0));
    assert_eq!(a.readable_bytes(1), Ok(0));
    assert_eq!(a.peek(1, &mut buf), Ok(0));

    let bad = Config {
        recv_buffer_size: 0,
        ..config
    };
    let device = FaultInjector::new(Loopback::new(addr(3000)), 1);
    assert_eq!(
        Host::new(device, Events::default(), bad).err(),
        Some(Error::BadParameter)
    );
}

#[test]
fn test_locked_remote() {
    init_logger();
    let (mut a, mut b) = pair(Config::default());
    let mut stranger = node(3000, 1000, 5, Config::default());
    a.set_remote_locked(true);

    stranger.time_event(Instant::from_millis(0));
    stranger
        .device_mut()
        .inner_mut()
        .deliver_to(a.device_mut().inner_mut());
    assert_eq!(a.io_event(Instant::from_millis(0)), Ok(1));
    assert_eq!(a.stats().packets_recv, 0);
    assert_eq!(a.remote_addr(), Some(addr(2000)));

    step(&mut a, &mut b, Instant::from_millis(0));
    assert!(a.stats().packets_recv > 0);
}
