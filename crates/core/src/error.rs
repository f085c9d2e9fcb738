//! Error types for the scatter/gather driver.
//!
//! All operations return structured errors rather than panicking or handing
//! back negative sentinels. Callers decide whether a failure is fatal.

use crate::packet::Operation;
use thiserror::Error;

/// Top-level error type for all driver operations.
///
/// Each variant corresponds to a specific failure domain:
/// - Packet: a request could not be encoded or a response failed validation
/// - Transport: the post primitive did not complete
/// - Handle: unknown handle, or an operation on a closed handle
/// - Position: seek/read/write outside the data held by the file
/// - Alignment: intra-block offset or length outside the supported slots
/// - Init: the endpoint initialization exchange failed
#[derive(Debug, Error)]
pub enum Error {
    /// Packet encode/decode validation failed
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    /// The transport could not complete the exchange
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Bad or closed file handle
    #[error("handle error: {0}")]
    Handle(#[from] HandleError),

    /// Position outside the file contents
    #[error("position error: {0}")]
    Position(#[from] PositionError),

    /// Offset within the block is not a slot boundary, or the range does not fit
    #[error("unaligned access: offset {offset} in block, length {len}")]
    Alignment { offset: usize, len: usize },

    /// Lazy endpoint initialization failed
    #[error("endpoint initialization failed: {0}")]
    Init(#[source] Box<Error>),

    /// The service answered with a different operation than requested
    #[error("unexpected response: sent {expected}, got {actual}")]
    UnexpectedResponse {
        expected: Operation,
        actual: Operation,
    },

    /// The driver has been shut down
    #[error("driver has been shut down")]
    Shutdown,
}

/// Packet validation errors.
///
/// The variants mirror the protocol status codes; see [`PacketError::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("bad local node id")]
    BadLocalId,

    #[error("bad remote node id")]
    BadRemoteId,

    #[error("bad block id")]
    BadBlockId,

    #[error("bad operation code")]
    BadOperation,

    #[error("bad sender sequence number")]
    BadSenderSequence,

    #[error("bad receiver sequence number")]
    BadReceiverSequence,

    /// Data indicator disagrees with the payload
    #[error("bad block data")]
    BadBlockData,

    /// Buffer length disagrees with the data indicator
    #[error("bad block length")]
    BadBlockLength,

    /// Magic value mismatch or missing buffer
    #[error("bad packet data")]
    BadPacket,
}

impl PacketError {
    /// Numeric status code used by the protocol (0 is reserved for success).
    pub fn code(&self) -> u8 {
        match self {
            PacketError::BadLocalId => 1,
            PacketError::BadRemoteId => 2,
            PacketError::BadBlockId => 3,
            PacketError::BadOperation => 4,
            PacketError::BadSenderSequence => 5,
            PacketError::BadReceiverSequence => 6,
            PacketError::BadBlockData => 7,
            PacketError::BadBlockLength => 8,
            PacketError::BadPacket => 9,
        }
    }
}

/// Failures of the post primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The exchange was lost before reaching the service
    #[error("request dropped")]
    Dropped,

    /// The service refused the request
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The endpoint is not reachable
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// File handle errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandleError {
    #[error("invalid file handle {0}")]
    Invalid(usize),

    #[error("file handle {0} is closed")]
    Closed(usize),
}

/// Positioning errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PositionError {
    /// Seek target at or beyond the end of the data
    #[error("seek to {offset} past end of file (size {size})")]
    SeekPastEnd { offset: usize, size: usize },

    /// Read with the position at or beyond the end of the data
    #[error("read at {position} past end of file (size {size})")]
    ReadPastEnd { position: usize, size: usize },

    /// Write starting beyond the end of the data (sparse files are unsupported)
    #[error("write at {position} beyond end of file (size {size})")]
    WriteBeyondEnd { position: usize, size: usize },
}

/// Type alias for Result with our Error type
pub type Result<T> = std::result::Result<T, Error>;
