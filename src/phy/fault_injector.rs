use core::net::SocketAddr;

use super::{Device, TransmitError};

// We use our own RNG to stay compatible with #![no_std].
// The use of the RNG below has a slight bias, but it doesn't matter.
fn xorshift32(state: &mut u32) -> u32 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;
    *state = x;
    x
}

#[derive(Debug, Clone, Copy, Default)]
struct Config {
    drop_permille: u16,
    fail_permille: u16,
    rx_drop_permille: u16,
}

/// A fault injector device.
///
/// A fault injector is a device that alters datagrams that traverse through
/// it in a way that makes testing loss recovery easier. It can:
///
///   * silently drop a share of transmitted datagrams (reported as sent);
///   * fail a share of transmissions with `TransmitError::Exhausted`;
///   * drop a share of received datagrams.
///
/// Shares are given in per mille. The sequence of faults is deterministic
/// for a given seed.
#[derive(Debug)]
pub struct FaultInjector<D: Device> {
    inner: D,
    state: u32,
    config: Config,
}

impl<D: Device> FaultInjector<D> {
    /// Create a fault injector device, using the given random number
    /// generator seed.
    pub fn new(inner: D, seed: u32) -> FaultInjector<D> {
        FaultInjector {
            inner,
            // xorshift is stuck at zero.
            state: if seed == 0 { 0x2545_f491 } else { seed },
            config: Config::default(),
        }
    }

    /// Return the underlying device, consuming the fault injector.
    pub fn into_inner(self) -> D {
        self.inner
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut D {
        &mut self.inner
    }

    /// Set the share of transmitted datagrams silently lost, in per mille.
    ///
    /// # Panics
    /// This function panics if the value is larger than 1000.
    pub fn set_drop_chance(&mut self, permille: u16) {
        assert!(permille <= 1000);
        self.config.drop_permille = permille
    }

    /// Set the share of transmissions that fail, in per mille.
    ///
    /// # Panics
    /// This function panics if the value is larger than 1000.
    pub fn set_fail_chance(&mut self, permille: u16) {
        assert!(permille <= 1000);
        self.config.fail_permille = permille
    }

    /// Set the share of received datagrams dropped, in per mille.
    ///
    /// # Panics
    /// This function panics if the value is larger than 1000.
    pub fn set_rx_drop_chance(&mut self, permille: u16) {
        assert!(permille <= 1000);
        self.config.rx_drop_permille = permille
    }

    fn roll(&mut self, permille: u16) -> bool {
        permille > 0 && (xorshift32(&mut self.state) % 1000) < permille as u32
    }
}

impl<D: Device> Device for FaultInjector<D> {
    fn transmit(&mut self, to: SocketAddr, datagram: &[u8]) -> Result<(), TransmitError> {
        if self.roll(self.config.fail_permille) {
            net_trace!("fault injector: failing transmit to {}", to);
            return Err(TransmitError::Exhausted);
        }
        if self.roll(self.config.drop_permille) {
            net_trace!("fault injector: dropping datagram to {}", to);
            return Ok(());
        }
        self.inner.transmit(to, datagram)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, TransmitError> {
        loop {
            match self.inner.receive(buf)? {
                Some((_, from)) if self.roll(self.config.rx_drop_permille) => {
                    net_trace!("fault injector: dropping datagram from {}", from);
                }
                other => return Ok(other),
            }
        }
    }
}
