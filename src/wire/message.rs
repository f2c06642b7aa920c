use byteorder::{ByteOrder, NetworkEndian};
use core::fmt;

use super::{Error, Offset, Result};
use crate::config::MAX_ACK_RANGES;

/// Protocol version carried in every datagram.
pub const VERSION: u8 = 1;

enum_with_unknown! {
    /// Message kind.
    pub enum Kind(u8) {
        Ping = 1,
        Pong = 2,
        ConnRequest = 3,
        ConnResponse = 4,
        Data = 5,
        Ack = 6,
        Close = 7,
        CloseAck = 8,
        Reset = 9
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Kind::Ping => write!(f, "ping"),
            Kind::Pong => write!(f, "pong"),
            Kind::ConnRequest => write!(f, "connect request"),
            Kind::ConnResponse => write!(f, "connect response"),
            Kind::Data => write!(f, "data"),
            Kind::Ack => write!(f, "ack"),
            Kind::Close => write!(f, "close"),
            Kind::CloseAck => write!(f, "close ack"),
            Kind::Reset => write!(f, "reset"),
            Kind::Unknown(id) => write!(f, "0x{id:02x}"),
        }
    }
}

/// A read/write wrapper around a message buffer.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

mod field {
    #![allow(non_snake_case)]

    use crate::wire::field::*;

    pub const VERSION: usize = 0;
    pub const KIND: usize = 1;
    /// Flow id, or ping id for ping/pong.
    pub const FLOW: Field = 2..6;
    pub const HEADER_END: usize = FLOW.end;

    pub const TIMESTAMP: Field = 6..10;
    pub const MAP_ID: Field = 6..8;
    pub const STATUS: usize = 6;

    pub const OFFSET: Field = 6..10;
    pub const DATA_LEN: Field = 10..12;
    pub const PAYLOAD: Rest = 12..;

    pub const WIN_START: Field = 6..10;
    pub const WIN_SIZE: Field = 10..14;
    pub const RANGE_COUNT: usize = 14;
    pub const RANGES: usize = 15;
    pub const RANGE_LEN: usize = 8;

    pub const FINAL_OFFSET: Field = 6..10;

    pub const fn RANGE(index: usize) -> Field {
        let start = RANGES + index * RANGE_LEN;
        start..start + RANGE_LEN
    }
}

pub const HEADER_LEN: usize = field::HEADER_END;

impl<T: AsRef<[u8]>> Packet<T> {
    /// Imbue a raw octet buffer with message structure.
    pub const fn new_unchecked(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    /// Shorthand for a combination of [new_unchecked] and [check_len].
    ///
    /// [new_unchecked]: #method.new_unchecked
    /// [check_len]: #method.check_len
    pub fn new_checked(buffer: T) -> Result<Packet<T>> {
        let packet = Self::new_unchecked(buffer);
        packet.check_len()?;
        Ok(packet)
    }

    /// Ensure that no accessor method will panic if called.
    /// Returns `Err(Error)` if the buffer is too short for its kind,
    /// or the kind is unknown.
    pub fn check_len(&self) -> Result<()> {
        let len = self.buffer.as_ref().len();
        if len < HEADER_LEN {
            return Err(Error);
        }
        let body_end = match self.kind() {
            Kind::Ping | Kind::Pong => field::TIMESTAMP.end,
            Kind::ConnRequest => field::MAP_ID.end,
            Kind::ConnResponse => field::STATUS + 1,
            Kind::Data => field::DATA_LEN.end,
            Kind::Ack => field::RANGES,
            Kind::Close => field::FINAL_OFFSET.end,
            Kind::CloseAck | Kind::Reset => HEADER_LEN,
            Kind::Unknown(_) => return Err(Error),
        };
        if len < body_end {
            return Err(Error);
        }
        let total = match self.kind() {
            Kind::Data => field::PAYLOAD.start + self.data_len() as usize,
            Kind::Ack => field::RANGE(self.range_count() as usize).start,
            _ => body_end,
        };
        if len < total { Err(Error) } else { Ok(()) }
    }

    /// Consume the packet, returning the underlying buffer.
    pub fn into_inner(self) -> T {
        self.buffer
    }

    #[inline]
    pub fn version(&self) -> u8 {
        self.buffer.as_ref()[field::VERSION]
    }

    #[inline]
    pub fn kind(&self) -> Kind {
        Kind::from(self.buffer.as_ref()[field::KIND])
    }

    /// Return the flow id field (the ping id for ping and pong).
    #[inline]
    pub fn flow(&self) -> u32 {
        NetworkEndian::read_u32(&self.buffer.as_ref()[field::FLOW])
    }

    #[inline]
    pub fn timestamp(&self) -> u32 {
        NetworkEndian::read_u32(&self.buffer.as_ref()[field::TIMESTAMP])
    }

    #[inline]
    pub fn map_id(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::MAP_ID])
    }

    #[inline]
    pub fn status(&self) -> u8 {
        self.buffer.as_ref()[field::STATUS]
    }

    #[inline]
    pub fn offset(&self) -> Offset {
        Offset(NetworkEndian::read_u32(&self.buffer.as_ref()[field::OFFSET]))
    }

    #[inline]
    pub fn data_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::DATA_LEN])
    }

    #[inline]
    pub fn win_start(&self) -> Offset {
        Offset(NetworkEndian::read_u32(&self.buffer.as_ref()[field::WIN_START]))
    }

    #[inline]
    pub fn win_size(&self) -> u32 {
        NetworkEndian::read_u32(&self.buffer.as_ref()[field::WIN_SIZE])
    }

    #[inline]
    pub fn range_count(&self) -> u8 {
        self.buffer.as_ref()[field::RANGE_COUNT]
    }

    /// Return the `index`-th selective range as `(start, end)`.
    pub fn range(&self, index: usize) -> (Offset, Offset) {
        let data = &self.buffer.as_ref()[field::RANGE(index)];
        (
            Offset(NetworkEndian::read_u32(&data[..4])),
            Offset(NetworkEndian::read_u32(&data[4..])),
        )
    }

    #[inline]
    pub fn final_offset(&self) -> Offset {
        Offset(NetworkEndian::read_u32(&self.buffer.as_ref()[field::FINAL_OFFSET]))
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Packet<&'a T> {
    /// Return a pointer to the data payload.
    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        let data = self.buffer.as_ref();
        let len = NetworkEndian::read_u16(&data[field::DATA_LEN]) as usize;
        &data[field::PAYLOAD][..len]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    #[inline]
    pub fn set_version(&mut self, value: u8) {
        self.buffer.as_mut()[field::VERSION] = value
    }

    #[inline]
    pub fn set_kind(&mut self, value: Kind) {
        self.buffer.as_mut()[field::KIND] = value.into()
    }

    #[inline]
    pub fn set_flow(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::FLOW], value)
    }

    #[inline]
    pub fn set_timestamp(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::TIMESTAMP], value)
    }

    #[inline]
    pub fn set_map_id(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::MAP_ID], value)
    }

    #[inline]
    pub fn set_status(&mut self, value: u8) {
        self.buffer.as_mut()[field::STATUS] = value
    }

    #[inline]
    pub fn set_offset(&mut self, value: Offset) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::OFFSET], value.0)
    }

    #[inline]
    pub fn set_data_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::DATA_LEN], value)
    }

    #[inline]
    pub fn set_win_start(&mut self, value: Offset) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::WIN_START], value.0)
    }

    #[inline]
    pub fn set_win_size(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::WIN_SIZE], value)
    }

    #[inline]
    pub fn set_range_count(&mut self, value: u8) {
        self.buffer.as_mut()[field::RANGE_COUNT] = value
    }

    pub fn set_range(&mut self, index: usize, (start, end): (Offset, Offset)) {
        let data = &mut self.buffer.as_mut()[field::RANGE(index)];
        NetworkEndian::write_u32(&mut data[..4], start.0);
        NetworkEndian::write_u32(&mut data[4..], end.0);
    }

    #[inline]
    pub fn set_final_offset(&mut self, value: Offset) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::FINAL_OFFSET], value.0)
    }

    /// Return a mutable pointer to the data payload.
    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let len = self.data_len() as usize;
        &mut self.buffer.as_mut()[field::PAYLOAD][..len]
    }
}

/// A high-level representation of an acknowledgment.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct AckRepr {
    pub flow: u32,
    /// First byte not yet received contiguously.
    pub win_start: Offset,
    /// Bytes the receiver can still accept past `win_start`.
    pub win_size: u32,
    /// Byte ranges `(start, end)` received past `win_start`.
    pub ranges: heapless::Vec<(Offset, Offset), MAX_ACK_RANGES>,
}

/// A high-level representation of a message.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Repr<'a> {
    Ping { id: u32, timestamp: u32 },
    Pong { id: u32, timestamp: u32 },
    ConnRequest { flow: u32, map_id: u16 },
    ConnResponse { flow: u32, accepted: bool },
    Data { flow: u32, offset: Offset, payload: &'a [u8] },
    Ack(AckRepr),
    Close { flow: u32, final_offset: Offset },
    CloseAck { flow: u32 },
    Reset { flow: u32 },
}

impl<'a> Repr<'a> {
    /// Parse a message and return a high-level representation.
    pub fn parse<T>(packet: &Packet<&'a T>) -> Result<Repr<'a>>
    where
        T: AsRef<[u8]> + ?Sized,
    {
        packet.check_len()?;
        if packet.version() != VERSION {
            return Err(Error);
        }

        let flow = packet.flow();
        let repr = match packet.kind() {
            Kind::Ping => Repr::Ping {
                id: flow,
                timestamp: packet.timestamp(),
            },
            Kind::Pong => Repr::Pong {
                id: flow,
                timestamp: packet.timestamp(),
            },
            Kind::ConnRequest => Repr::ConnRequest {
                flow,
                map_id: packet.map_id(),
            },
            Kind::ConnResponse => Repr::ConnResponse {
                flow,
                accepted: packet.status() == 0,
            },
            Kind::Data => Repr::Data {
                flow,
                offset: packet.offset(),
                payload: packet.payload(),
            },
            Kind::Ack => {
                let count = packet.range_count() as usize;
                if count > MAX_ACK_RANGES {
                    return Err(Error);
                }
                let mut ranges = heapless::Vec::new();
                for index in 0..count {
                    ranges.push(packet.range(index)).map_err(|_| Error)?;
                }
                Repr::Ack(AckRepr {
                    flow,
                    win_start: packet.win_start(),
                    win_size: packet.win_size(),
                    ranges,
                })
            }
            Kind::Close => Repr::Close {
                flow,
                final_offset: packet.final_offset(),
            },
            Kind::CloseAck => Repr::CloseAck { flow },
            Kind::Reset => Repr::Reset { flow },
            Kind::Unknown(_) => return Err(Error),
        };
        Ok(repr)
    }

    /// Return the kind of this message.
    pub fn kind(&self) -> Kind {
        match self {
            Repr::Ping { .. } => Kind::Ping,
            Repr::Pong { .. } => Kind::Pong,
            Repr::ConnRequest { .. } => Kind::ConnRequest,
            Repr::ConnResponse { .. } => Kind::ConnResponse,
            Repr::Data { .. } => Kind::Data,
            Repr::Ack(_) => Kind::Ack,
            Repr::Close { .. } => Kind::Close,
            Repr::CloseAck { .. } => Kind::CloseAck,
            Repr::Reset { .. } => Kind::Reset,
        }
    }

    /// Return the flow this message belongs to, if any.
    pub fn flow(&self) -> Option<u32> {
        match *self {
            Repr::Ping { .. } | Repr::Pong { .. } => None,
            Repr::ConnRequest { flow, .. }
            | Repr::ConnResponse { flow, .. }
            | Repr::Data { flow, .. }
            | Repr::Close { flow, .. }
            | Repr::CloseAck { flow }
            | Repr::Reset { flow } => Some(flow),
            Repr::Ack(ref ack) => Some(ack.flow),
        }
    }

    /// Return the length of a buffer required to hold the emitted message.
    pub fn buffer_len(&self) -> usize {
        match self {
            Repr::Ping { .. } | Repr::Pong { .. } => field::TIMESTAMP.end,
            Repr::ConnRequest { .. } => field::MAP_ID.end,
            Repr::ConnResponse { .. } => field::STATUS + 1,
            Repr::Data { payload, .. } => field::PAYLOAD.start + payload.len(),
            Repr::Ack(ack) => field::RANGE(ack.ranges.len()).start,
            Repr::Close { .. } => field::FINAL_OFFSET.end,
            Repr::CloseAck { .. } | Repr::Reset { .. } => HEADER_LEN,
        }
    }

    /// Emit a high-level representation into a message buffer.
    ///
    /// The buffer must be at least `buffer_len()` octets long, and a data
    /// payload must not exceed `u16::MAX` octets.
    pub fn emit<T>(&self, packet: &mut Packet<T>)
    where
        T: AsRef<[u8]> + AsMut<[u8]>,
    {
        packet.set_version(VERSION);
        packet.set_kind(self.kind());
        match *self {
            Repr::Ping { id, timestamp } | Repr::Pong { id, timestamp } => {
                packet.set_flow(id);
                packet.set_timestamp(timestamp);
            }
            Repr::ConnRequest { flow, map_id } => {
                packet.set_flow(flow);
                packet.set_map_id(map_id);
            }
            Repr::ConnResponse { flow, accepted } => {
                packet.set_flow(flow);
                packet.set_status(if accepted { 0 } else { 1 });
            }
            Repr::Data {
                flow,
                offset,
                payload,
            } => {
                packet.set_flow(flow);
                packet.set_offset(offset);
                packet.set_data_len(payload.len() as u16);
                packet.payload_mut().copy_from_slice(payload);
            }
            Repr::Ack(ref ack) => {
                packet.set_flow(ack.flow);
                packet.set_win_start(ack.win_start);
                packet.set_win_size(ack.win_size);
                packet.set_range_count(ack.ranges.len() as u8);
                for (index, &range) in ack.ranges.iter().enumerate() {
                    packet.set_range(index, range);
                }
            }
            Repr::Close { flow, final_offset } => {
                packet.set_flow(flow);
                packet.set_final_offset(final_offset);
            }
            Repr::CloseAck { flow } | Repr::Reset { flow } => packet.set_flow(flow),
        }
    }
}

impl fmt::Display for Repr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Repr::Ping { id, .. } | Repr::Pong { id, .. } => {
                write!(f, "{} id={}", self.kind(), id)
            }
            Repr::ConnRequest { flow, map_id } => {
                write!(f, "{} flow={} map={}", self.kind(), flow, map_id)
            }
            Repr::ConnResponse { flow, accepted } => {
                write!(f, "{} flow={} accepted={}", self.kind(), flow, accepted)
            }
            Repr::Data {
                flow,
                offset,
                payload,
            } => write!(
                f,
                "{} flow={} offset={} len={}",
                self.kind(),
                flow,
                offset,
                payload.len()
            ),
            Repr::Ack(ack) => write!(
                f,
                "{} flow={} win={}+{} sack={}",
                self.kind(),
                ack.flow,
                ack.win_start,
                ack.win_size,
                ack.ranges.len()
            ),
            Repr::Close { flow, final_offset } => {
                write!(f, "{} flow={} final={}", self.kind(), flow, final_offset)
            }
            Repr::CloseAck { flow } | Repr::Reset { flow } => {
                write!(f, "{} flow={}", self.kind(), flow)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    static DATA_BYTES: [u8; 15] = [
        0x01, 0x05, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x04, 0x00, 0x00, 0x03, 0xaa, 0xbb, 0xcc,
    ];

    static ACK_BYTES: [u8; 31] = [
        0x01, 0x06, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x02,
        0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x0c, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x10,
        0x10,
    ];

    fn ack_repr() -> AckRepr {
        let mut ranges = heapless::Vec::new();
        ranges.push((Offset(2048), Offset(3072))).unwrap();
        ranges.push((Offset(4096), Offset(4096 + 16))).unwrap();
        AckRepr {
            flow: 7,
            win_start: Offset(0),
            win_size: 65536,
            ranges,
        }
    }

    #[test]
    fn test_parse_data() {
        let packet = Packet::new_checked(&DATA_BYTES[..]).unwrap();
        assert_eq!(packet.kind(), Kind::Data);
        assert_eq!(
            Repr::parse(&packet).unwrap(),
            Repr::Data {
                flow: 7,
                offset: Offset(1024),
                payload: &[0xaa, 0xbb, 0xcc],
            }
        );
    }

    #[test]
    fn test_emit_data() {
        let repr = Repr::Data {
            flow: 7,
            offset: Offset(1024),
            payload: &[0xaa, 0xbb, 0xcc],
        };
        let mut bytes = vec![0u8; repr.buffer_len()];
        repr.emit(&mut Packet::new_unchecked(&mut bytes));
        assert_eq!(&bytes[..], &DATA_BYTES[..]);
    }

    #[test]
    fn test_parse_ack() {
        let packet = Packet::new_checked(&ACK_BYTES[..]).unwrap();
        assert_eq!(packet.range_count(), 2);
        assert_eq!(Repr::parse(&packet).unwrap(), Repr::Ack(ack_repr()));
    }

    #[test]
    fn test_parse_ack_trailing_bytes() {
        let mut bytes = ACK_BYTES.to_vec();
        bytes.push(0xff);
        let packet = Packet::new_checked(&bytes[..]).unwrap();
        assert_eq!(Repr::parse(&packet).unwrap(), Repr::Ack(ack_repr()));
    }

    #[test]
    fn test_emit_ack() {
        let repr = Repr::Ack(ack_repr());
        assert_eq!(repr.buffer_len(), 31);
        let mut bytes = vec![0u8; repr.buffer_len()];
        repr.emit(&mut Packet::new_unchecked(&mut bytes));
        assert_eq!(&bytes[..], &ACK_BYTES[..]);
    }

    #[test]
    fn test_truncated() {
        assert_eq!(Packet::new_checked(&DATA_BYTES[..14]), Err(Error));
        assert_eq!(Packet::new_checked(&ACK_BYTES[..20]), Err(Error));
        assert_eq!(Packet::new_checked(&[0x01u8, 0x07][..]), Err(Error));
    }

    #[test]
    fn test_unknown_kind_and_version() {
        let mut bytes = DATA_BYTES;
        bytes[1] = 0x42;
        assert_eq!(Packet::new_checked(&bytes[..]), Err(Error));

        let mut bytes = DATA_BYTES;
        bytes[0] = 9;
        let packet = Packet::new_checked(&bytes[..]).unwrap();
        assert_eq!(Repr::parse(&packet), Err(Error));
    }

    #[test]
    fn test_too_many_ranges() {
        let mut bytes = vec![0u8; field::RANGE(MAX_ACK_RANGES + 1).start];
        bytes[0] = VERSION;
        bytes[1] = Kind::Ack.into();
        bytes[field::RANGE_COUNT] = (MAX_ACK_RANGES + 1) as u8;
        let packet = Packet::new_checked(&bytes[..]).unwrap();
        assert_eq!(Repr::parse(&packet), Err(Error));
    }

    #[test]
    fn test_control_messages() {
        let reprs = [
            Repr::Ping {
                id: 3,
                timestamp: 99,
            },
            Repr::ConnRequest { flow: 9, map_id: 2 },
            Repr::ConnResponse {
                flow: 9,
                accepted: false,
            },
            Repr::Close {
                flow: 9,
                final_offset: Offset(70000),
            },
            Repr::Reset { flow: 11 },
        ];
        for repr in reprs.iter() {
            let mut bytes = vec![0u8; repr.buffer_len()];
            repr.emit(&mut Packet::new_unchecked(&mut bytes));
            let packet = Packet::new_checked(&bytes[..]).unwrap();
            assert_eq!(&Repr::parse(&packet).unwrap(), repr);
        }
    }
}
