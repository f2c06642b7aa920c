/*! Low-level message access and construction.

The `wire` module deals with the message *representation*. It provides two
levels of functionality.

 * First, it provides functions to extract fields from sequences of octets,
   and to insert fields into sequences of octets. This happens through the
   [Packet] structure.
 * Second, it provides a compact, high-level representation of message data
   that can be parsed from and emitted into a sequence of octets. This
   happens through the [Repr] enum.

The `Packet` structure guarantees that, if `Packet::check_len()` returned
`Ok(())`, then no accessor method will panic. When parsing untrusted input,
it is *necessary* to use `Packet::new_checked()`. When emitting output, the
buffer must be exactly `Repr::buffer_len()` octets long.

Stream offsets travel as their low 32 bits, see [Offset].

# Examples

```rust
use rdtp::wire::{Offset, Packet, Repr};

let repr = Repr::Data { flow: 7, offset: Offset(1024), payload: b"abc" };
let mut buffer = vec![0; repr.buffer_len()];
repr.emit(&mut Packet::new_unchecked(&mut buffer));

let packet = Packet::new_checked(&buffer).expect("truncated message");
assert_eq!(Repr::parse(&packet).expect("malformed message"), repr);
```
*/

use core::fmt;

mod field {
    pub type Field = ::core::ops::Range<usize>;
    pub type Rest = ::core::ops::RangeFrom<usize>;
}

mod message;
mod offset;

pub use self::message::{AckRepr, HEADER_LEN, Kind, Packet, Repr, VERSION};
pub use self::offset::Offset;

/// Parsing a message failed.
///
/// Either it is malformed, or it is not supported by this implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error;

impl core::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wire::Error")
    }
}

pub type Result<T> = core::result::Result<T, Error>;
