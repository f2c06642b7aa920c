//! Compile-time limits and protocol constants.
//!
//! Timing parameters that a deployment may want to tune live in
//! [`host::Config`](../host/struct.Config.html) instead.

/// Largest payload carried by one data segment.
pub const MAX_DATA_SIZE: usize = 1024;

/// Number of discontiguous regions a stream buffer can track while
/// reassembling out-of-order segments.
pub const ASSEMBLER_MAX_SEGMENT_COUNT: usize = 32;

/// Largest number of selective ranges carried by one acknowledgment.
pub const MAX_ACK_RANGES: usize = 16;

/// How many times a selective range is re-announced before it is dropped
/// from the pending list.
pub const REACK_TIMES: u8 = 2;

/// Number of selective acknowledgments leaving the head of the send window
/// outstanding before it is retransmitted ahead of its deadline.
pub const FAST_RETRANS_DUP_ACKS: u8 = 3;

/// Exponent cap of the retransmission backoff: `delay = rto << min(turn, cap)`.
pub const RETRANS_BACKOFF_CAP: u32 = 6;

/// Upper bound of any retransmission delay, in milliseconds.
pub const RETRANS_MAX_DELAY: u64 = 30_000;

/// Retransmissions may exceed the per-interval send budget by
/// `budget / RETRANS_RESERVE_DIV` bytes.
pub const RETRANS_RESERVE_DIV: u32 = 4;

/// Below this success ratio (per mille) the send-rate ceiling shrinks.
pub const CTRL_DROP_THRESHOLD: u32 = 900;

/// At or above this success ratio (per mille) the send-rate ceiling grows.
pub const CTRL_GROW_THRESHOLD: u32 = 990;

/// Smallest growth step of the send-rate ceiling, in bytes per second.
pub const CTRL_MIN_STEP: u32 = 64 * 1024;

/// Stream buffers must stay below this size so that 32-bit wire offsets
/// can be unwrapped unambiguously.
pub const MAX_BUFFER_SIZE: usize = 1 << 30;
