use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::cmp;
use core::net::SocketAddr;

use super::{Device, TransmitError};

/// A software loopback device.
///
/// Transmitted datagrams are queued until the owner moves them elsewhere,
/// usually into the receive queue of another loopback with
/// [`Loopback::deliver_to`].
#[derive(Debug)]
pub struct Loopback {
    addr: SocketAddr,
    tx_queue: VecDeque<(SocketAddr, Vec<u8>)>,
    rx_queue: VecDeque<(SocketAddr, Vec<u8>)>,
    tx_limit: Option<usize>,
}

impl Loopback {
    /// Create a loopback device bound to the local address `addr`.
    pub fn new(addr: SocketAddr) -> Loopback {
        Loopback {
            addr,
            tx_queue: VecDeque::new(),
            rx_queue: VecDeque::new(),
            tx_limit: None,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Limit the number of queued outgoing datagrams; further transmits
    /// fail with `Exhausted`.
    pub fn set_tx_limit(&mut self, limit: Option<usize>) {
        self.tx_limit = limit;
    }

    pub fn tx_len(&self) -> usize {
        self.tx_queue.len()
    }

    pub fn rx_len(&self) -> usize {
        self.rx_queue.len()
    }

    /// Take the oldest transmitted datagram and its destination.
    pub fn dequeue_tx(&mut self) -> Option<(SocketAddr, Vec<u8>)> {
        self.tx_queue.pop_front()
    }

    /// Queue a datagram as if it had arrived from `from`.
    pub fn enqueue_rx(&mut self, from: SocketAddr, datagram: Vec<u8>) {
        self.rx_queue.push_back((from, datagram))
    }

    /// Move every transmitted datagram addressed to `other` into its receive
    /// queue, and return how many were moved. Datagrams to other
    /// destinations are discarded.
    pub fn deliver_to(&mut self, other: &mut Loopback) -> usize {
        let mut count = 0;
        while let Some((to, datagram)) = self.tx_queue.pop_front() {
            if to == other.addr {
                other.enqueue_rx(self.addr, datagram);
                count += 1;
            } else {
                net_trace!("loopback: dropping datagram to {}", to);
            }
        }
        count
    }
}

impl Device for Loopback {
    fn transmit(&mut self, to: SocketAddr, datagram: &[u8]) -> Result<(), TransmitError> {
        if self.tx_limit.is_some_and(|limit| self.tx_queue.len() >= limit) {
            return Err(TransmitError::Exhausted);
        }
        self.tx_queue.push_back((to, datagram.to_vec()));
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, TransmitError> {
        match self.rx_queue.pop_front() {
            Some((from, datagram)) => {
                let len = cmp::min(buf.len(), datagram.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                Ok(Some((len, from)))
            }
            None => Ok(None),
        }
    }
}
