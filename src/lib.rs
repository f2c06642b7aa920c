#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_code)]

//! The _rdtp_ library is a reliable, ordered byte-stream transport that runs
//! many logical connections ("flows") over one unreliable datagram endpoint.
//!
//! # Crate organization
//!
//! The crate is laid out in the same layers a packet travels through:
//!
//!  * The [storage](storage/index.html) module provides the ring buffer, the
//!    reassembler and the offset-addressed stream buffer every flow owns.
//!  * The [wire](wire/index.html) module maps typed message records to and
//!    from datagram payloads.
//!  * The [phy](phy/index.html) module defines the datagram device the engine
//!    transmits through, plus in-memory devices for testing.
//!  * The [host](host/index.html) module is the engine itself: connection
//!    table, retransmission scheduler, acknowledgment processing and rate
//!    control, driven through two event handlers.
//!
//! The engine never blocks and never spawns work. The caller invokes
//! [`Host::io_event`] whenever the device is readable and [`Host::time_event`]
//! at the cadence requested through [`host::Handler::on_timer`].
//!
//! [`Host::io_event`]: host/struct.Host.html#method.io_event
//! [`Host::time_event`]: host/struct.Host.html#method.time_event

extern crate alloc;

#[macro_use]
mod macros;

pub mod config;
pub mod host;
pub mod phy;
pub mod storage;
pub mod time;
pub mod wire;

use core::fmt;

pub use self::host::{Config, Handler, Host, State, Stats};

/// The error type returned by every fallible [`Host`] operation.
///
/// Each variant maps onto a stable numeric code, see [`Error::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No connection with the given flow id exists.
    RecordNotFound,
    /// A connection with the given flow id already exists.
    RecordExists,
    /// The datagram device refused to transmit.
    SocketError,
    /// A buffer could not be allocated.
    AllocError,
    /// An argument was out of its valid domain.
    BadParameter,
    /// The buffer has no room for the requested bytes.
    NotEnoughSpace,
    /// The offset lies outside of the current window.
    OffsetOutOfRange,
    /// The flow's state does not allow this operation.
    InvalidState,
    /// The host has used up its send budget for the current interval.
    SendThrottled,
    /// The remote endpoint is unknown or stopped answering.
    RemoteOffline,
}

impl Error {
    /// Return the numeric code of this error.
    pub const fn code(&self) -> i32 {
        match self {
            Error::RecordNotFound => -100,
            Error::RecordExists => -101,
            Error::SocketError => -102,
            Error::AllocError => -103,
            Error::BadParameter => -104,
            Error::NotEnoughSpace => -105,
            Error::OffsetOutOfRange => -106,
            Error::InvalidState => -107,
            Error::SendThrottled => -200,
            Error::RemoteOffline => -300,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::RecordNotFound => write!(f, "record not found"),
            Error::RecordExists => write!(f, "record already exists"),
            Error::SocketError => write!(f, "socket error"),
            Error::AllocError => write!(f, "allocation failed"),
            Error::BadParameter => write!(f, "bad parameter"),
            Error::NotEnoughSpace => write!(f, "not enough space"),
            Error::OffsetOutOfRange => write!(f, "offset out of range"),
            Error::InvalidState => write!(f, "invalid state"),
            Error::SendThrottled => write!(f, "send throttled"),
            Error::RemoteOffline => write!(f, "remote offline"),
        }
    }
}

impl core::error::Error for Error {}

impl From<storage::WriteError> for Error {
    fn from(err: storage::WriteError) -> Self {
        match err {
            storage::WriteError::OutOfRange => Error::OffsetOutOfRange,
            storage::WriteError::NotEnoughSpace => Error::NotEnoughSpace,
        }
    }
}

impl From<phy::TransmitError> for Error {
    fn from(_: phy::TransmitError) -> Self {
        Error::SocketError
    }
}

pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::RecordNotFound.code(), -100);
        assert_eq!(Error::OffsetOutOfRange.code(), -106);
        assert_eq!(Error::SendThrottled.code(), -200);
        assert_eq!(Error::RemoteOffline.code(), -300);
    }

    #[test]
    fn test_storage_error_conversion() {
        assert_eq!(
            Error::from(storage::WriteError::OutOfRange),
            Error::OffsetOutOfRange
        );
        assert_eq!(
            Error::from(storage::WriteError::NotEnoughSpace),
            Error::NotEnoughSpace
        );
    }
}
