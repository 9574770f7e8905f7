//! Error types for the rdt-sim system.
//!
//! Only fatal conditions are represented here. Recoverable corruption
//! (a checksum that does not verify, a parity matrix that cannot be
//! corrected, a garbled acknowledgment) is handled inside the state machines
//! and never reaches the caller unless a retry ceiling is configured and
//! exceeded.

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for all operations in the system.
///
/// Each variant corresponds to a specific failure domain:
/// - Bit I/O: converting between bytes and bit sequences
/// - Header: a malformed or out-of-range packet header (protocol bug)
/// - Packet: fragmentation limits
/// - Reassembly: inconsistent fragments of one message
/// - Channel: the peer went away, a wait expired, or retries ran out
#[derive(Debug, Error)]
pub enum Error {
    /// Bit I/O operation failed (e.g., unaligned bit sequence)
    #[error("bit I/O error: {0}")]
    BitIo(#[from] BitIoError),

    /// Packet header could not be parsed
    #[error("malformed header: {0}")]
    Header(#[from] HeaderError),

    /// Fragmentation error
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    /// Reassembly error (e.g., fragments disagree on the total)
    #[error("reassembly error: {0}")]
    Reassembly(#[from] ReassemblyError),

    /// The channel was closed by the peer or locally
    #[error("channel closed")]
    ChannelClosed,

    /// No traffic arrived within the configured idle timeout
    #[error("timed out after {0:?} without receiving a packet")]
    Timeout(Duration),

    /// A fragment was retransmitted more often than the configured ceiling
    #[error("fragment {seq} not acknowledged after {attempts} transmissions")]
    RetriesExhausted { seq: u16, attempts: u32 },

    /// Retransmission requested with no fragment awaiting acknowledgment
    #[error("no fragment awaiting acknowledgment")]
    NothingUnacked,

    /// Socket or other I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Bit-level conversion errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BitIoError {
    /// Bit sequence length is not a multiple of 8
    #[error("bit sequence of length {0} is not byte aligned")]
    Unaligned(usize),

    /// Attempted to read past the end of the buffer
    #[error("unexpected end of bit stream")]
    UnexpectedEof,

    /// A bit string contained something other than '0' or '1'
    #[error("invalid bit character {0:?}")]
    InvalidBitChar(char),
}

/// Header parse errors. All of them are fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    /// Packet has no newline separating header from payload
    #[error("missing header/payload separator")]
    MissingSeparator,

    /// Header is not valid ASCII text
    #[error("header is not valid text")]
    NotText,

    /// Header does not start with the HEADER tag
    #[error("missing HEADER tag")]
    MissingTag,

    /// A required field is absent
    #[error("missing field {0}")]
    MissingField(&'static str),

    /// A field appears more than once
    #[error("duplicate field {0}")]
    DuplicateField(String),

    /// A token is not a known TAG:value pair
    #[error("unknown field {0:?}")]
    UnknownField(String),

    /// A field value has the wrong width or alphabet
    #[error("invalid value {value:?} for field {field}")]
    InvalidValue { field: &'static str, value: String },

    /// A numeric field is outside its permitted range
    #[error("field {field} value {value} outside 0..={max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        max: u32,
    },
}

/// Fragmentation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Per-packet payload length must be at least one byte
    #[error("packet data length must be non-zero")]
    ZeroDataLen,

    /// Message needs more fragments than the header can number
    #[error("message needs {needed} fragments, limit is {max}")]
    TooManyFragments { needed: usize, max: usize },
}

/// Reassembly errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReassemblyError {
    /// Fragments of the same message disagree on the total count
    #[error("total fragment count mismatch: expected {expected}, got {actual}")]
    TotalMismatch { expected: u16, actual: u16 },

    /// Sequence number outside 1..=total
    #[error("sequence number {seq} outside 1..={total}")]
    SeqOutOfRange { seq: u16, total: u16 },

    /// Not every fragment 1..=total is present
    #[error("incomplete message: have {have} of {total} fragments")]
    Incomplete { have: usize, total: u16 },
}

/// Type alias for Result with our Error type
pub type Result<T> = std::result::Result<T, Error>;
