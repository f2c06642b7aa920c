use core::{cmp, fmt};

/// A stream offset as carried on the wire.
///
/// Streams are addressed with 64-bit offsets internally, but only the low
/// 32 bits travel in a datagram. Comparison is modular (serial number
/// arithmetic), and [`Offset::unwrap`] recovers the full offset relative to
/// a nearby 64-bit reference.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
pub struct Offset(pub u32);

impl Offset {
    /// Truncate a stream offset to its wire representation.
    pub const fn from_stream(offset: u64) -> Offset {
        Offset(offset as u32)
    }

    /// Signed distance from `other` to `self`, modulo 2^32.
    pub const fn distance_from(self, other: Offset) -> i32 {
        self.0.wrapping_sub(other.0) as i32
    }

    /// Return the 64-bit offset closest to `reference` whose low 32 bits
    /// equal `self`.
    ///
    /// Offsets that would lie before the start of the stream saturate at zero.
    pub fn unwrap(self, reference: u64) -> u64 {
        let delta = self.distance_from(Offset::from_stream(reference));
        if delta >= 0 {
            reference.saturating_add(delta as u64)
        } else {
            reference.saturating_sub(delta.unsigned_abs() as u64)
        }
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl cmp::PartialOrd for Offset {
    fn partial_cmp(&self, other: &Offset) -> Option<cmp::Ordering> {
        self.distance_from(*other).partial_cmp(&0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_unwrap_near_reference() {
        assert_eq!(Offset(1500).unwrap(1000), 1500);
        assert_eq!(Offset(500).unwrap(1000), 500);
        assert_eq!(Offset(0).unwrap(0), 0);
    }

    #[test]
    fn test_unwrap_across_boundary() {
        let reference = (1u64 << 32) - 100;
        assert_eq!(Offset(50).unwrap(reference), (1 << 32) + 50);
        let reference = (1u64 << 32) + 20;
        assert_eq!(Offset(u32::MAX - 9).unwrap(reference), (1 << 32) - 10);
    }

    #[test]
    fn test_unwrap_saturates_at_zero() {
        assert_eq!(Offset(u32::MAX).unwrap(5), 0);
    }

    #[test]
    fn test_modular_ordering() {
        assert!(Offset(10) > Offset(5));
        assert!(Offset(3) > Offset(u32::MAX - 3));
        assert!(Offset(u32::MAX) < Offset(0));
    }
}
