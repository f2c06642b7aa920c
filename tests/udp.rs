#![cfg(feature = "std")]

use std::net::UdpSocket;
use std::thread;

use rdtp::time::{Duration, Instant};
use rdtp::{Config, Host, State};

fn socket() -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.set_nonblocking(true).unwrap();
    socket
}

#[test]
fn test_transfer_over_udp() {
    let _ = env_logger::builder().is_test(true).try_init();

    let (sa, sb) = (socket(), socket());
    let (addr_a, addr_b) = (sa.local_addr().unwrap(), sb.local_addr().unwrap());
    let mut a = Host::new(sa, (), Config::default()).unwrap();
    let mut b = Host::new(sb, (), Config::default()).unwrap();
    a.set_remote_addr(addr_b);
    b.set_remote_addr(addr_a);
    a.set_remote_locked(true);

    a.connect(1, 0).unwrap();
    let data: Vec<u8> = (0..32 * 1024).map(|i| (i % 241) as u8).collect();
    let mut sent = 0;
    let mut received = Vec::new();
    let mut buf = [0u8; 2048];

    let start = Instant::now();
    while received.len() < data.len() && Instant::now() - start < Duration::from_secs(10) {
        let now = Instant::now();
        if a.state(1) == Ok(State::Established) && sent < data.len() {
            let len = a.writable_bytes(1).unwrap().min(data.len() - sent).min(4096);
            if len > 0 {
                a.send(1, &data[sent..sent + len]).unwrap();
                sent += len;
            }
        }
        a.time_event(now);
        b.time_event(now);
        thread::sleep(std::time::Duration::from_millis(1));
        a.io_event(now).unwrap();
        b.io_event(now).unwrap();
        if let Ok(size) = b.recv(1, &mut buf) {
            received.extend_from_slice(&buf[..size]);
        }
    }
    assert_eq!(received, data);
    assert_eq!(b.remote_addr(), Some(addr_a));
}
