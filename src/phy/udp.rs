use std::io;
use std::net::{SocketAddr, UdpSocket};

use super::{Device, TransmitError};

/// A UDP socket used as a datagram device.
///
/// The socket should be put into non-blocking mode with
/// `UdpSocket::set_nonblocking(true)`; otherwise `receive` blocks until a
/// datagram arrives.
impl Device for UdpSocket {
    fn transmit(&mut self, to: SocketAddr, datagram: &[u8]) -> Result<(), TransmitError> {
        match self.send_to(datagram, to) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Err(TransmitError::Exhausted),
            Err(err) => {
                net_debug!("udp: send to {} failed: {}", to, err);
                Err(TransmitError::Io)
            }
        }
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, TransmitError> {
        match self.recv_from(buf) {
            Ok((len, from)) => Ok(Some((len, from))),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            // An ICMP port unreachable surfaces here on some platforms.
            Err(err) if err.kind() == io::ErrorKind::ConnectionReset => Ok(None),
            Err(err) => {
                net_debug!("udp: receive failed: {}", err);
                Err(TransmitError::Io)
            }
        }
    }
}
