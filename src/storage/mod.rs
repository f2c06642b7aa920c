/*! Specialized containers.

The `storage` module provides the containers every flow uses to hold its
bytes: a fixed-capacity ring buffer, a reassembler that tracks which ranges
of a window have arrived, and a stream buffer combining both into a byte
stream addressed by absolute offset.
*/

mod assembler;
mod ring_buffer;
mod stream_buffer;

pub use self::assembler::{Assembler, TooManyHolesError};
pub use self::ring_buffer::RingBuffer;
pub use self::stream_buffer::{StreamBuffer, WriteError};
