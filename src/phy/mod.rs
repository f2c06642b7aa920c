/*! Access to the datagram substrate.

The `phy` module deals with the *datagram devices*. It provides a trait
for transmitting and receiving datagrams, [Device](trait.Device.html),
and implementations of it:

  * the [_loopback_](struct.Loopback.html), for zero dependency testing;
  * _middleware_ [FaultInjector](struct.FaultInjector.html), to exercise
    loss recovery;
  * with the `std` feature, `std::net::UdpSocket`, to transmit and receive
    datagrams on the host OS.

A device never blocks: when nothing can be received right now,
`receive` returns `Ok(None)`.
*/

use core::fmt;
use core::net::SocketAddr;

mod fault_injector;
mod loopback;
#[cfg(feature = "std")]
mod udp;

pub use self::fault_injector::FaultInjector;
pub use self::loopback::Loopback;

/// Error returned by a [`Device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitError {
    /// The device cannot queue another datagram right now.
    Exhausted,
    /// The underlying transport failed.
    Io,
}

impl fmt::Display for TransmitError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            TransmitError::Exhausted => write!(f, "device exhausted"),
            TransmitError::Io => write!(f, "device i/o error"),
        }
    }
}

impl core::error::Error for TransmitError {}

/// An interface for sending and receiving datagrams.
pub trait Device {
    /// Hand one datagram to the transport, addressed to `to`.
    fn transmit(&mut self, to: SocketAddr, datagram: &[u8]) -> Result<(), TransmitError>;

    /// Receive one datagram into `buf`.
    ///
    /// Returns the datagram length and its source, or `None` if nothing is
    /// pending. Datagrams longer than `buf` are truncated.
    fn receive(&mut self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, TransmitError>;
}

impl<D: Device + ?Sized> Device for &mut D {
    fn transmit(&mut self, to: SocketAddr, datagram: &[u8]) -> Result<(), TransmitError> {
        (**self).transmit(to, datagram)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, TransmitError> {
        (**self).receive(buf)
    }
}
