//! Packet format for the scatter/gather block protocol.
//!
//! Every exchange with the block service is one request packet and one
//! response packet. Packets have a fixed layout with a magic value at both
//! ends; the only variable part is an optional block payload, announced by
//! the data indicator byte.
//!
//! # Packet Format
//!
//! ```text
//! +----------------------+
//! | Magic (4 bytes)      |  0x0000FEFE
//! +----------------------+
//! | local_node (8)       |  u64 sender's node id
//! +----------------------+
//! | remote_node (8)      |  u64 receiver's node id
//! +----------------------+
//! | block_id (8)         |  u64 block within the remote node
//! +----------------------+
//! | operation (4)        |  u32 opcode (0..=5)
//! +----------------------+
//! | sender_seq (2)       |  u16
//! +----------------------+
//! | receiver_seq (2)     |  u16
//! +----------------------+
//! | indicator (1)        |  0 = no payload, 1 = payload follows
//! +----------------------+
//! | payload              |  BLOCK_SIZE bytes, only when indicator = 1
//! | (optional)           |
//! +----------------------+
//! | Magic (4 bytes)      |  same value as the head
//! +----------------------+
//! ```
//!
//! All integers are little-endian. Fields are written one by one, so the
//! layout never depends on struct padding.
//!
//! # Validation
//!
//! Encode and decode apply the same field checks in the same order: local
//! id, remote id, block id, operation, sender sequence, receiver sequence.
//! Decode additionally checks both magic values, the indicator, and that the
//! buffer length is exactly the one implied by the indicator.

use crate::error::PacketError;
use std::fmt;

/// Size of a data block in bytes
pub const BLOCK_SIZE: usize = 1024;

/// Magic value framing both ends of a packet
pub const MAGIC: u32 = 0xfefe;

/// Size of one magic field in bytes
pub const MAGIC_SIZE: usize = 4;

/// Size of the fixed header (head magic through data indicator)
pub const HEADER_SIZE: usize = 37;

/// Size of the trailer (tail magic)
pub const TRAILER_SIZE: usize = MAGIC_SIZE;

/// Length of a packet without a payload
pub const BASE_PACKET_SIZE: usize = HEADER_SIZE + TRAILER_SIZE;

/// Length of a packet carrying a block payload
pub const DATA_PACKET_SIZE: usize = BASE_PACKET_SIZE + BLOCK_SIZE;

/// Node id used when the target node is not known yet
pub const NODE_UNKNOWN: NodeId = 0xFFFF_FFFF;

/// Block id used when the block has not been allocated yet
pub const BLOCK_UNKNOWN: BlockId = 0xFFFF_FFFF;

/// Receiver sequence used when no conversation exists yet
pub const SEQ_UNKNOWN: SeqNum = 0xFFFF;

/// First sender sequence number used by a fresh endpoint
pub const INITIAL_SEQ: SeqNum = 10000;

/// Identifier of a protocol endpoint
pub type NodeId = u64;

/// Identifier of a block within a node
pub type BlockId = u64;

/// Per-conversation sequence number (0 = no prior contact)
pub type SeqNum = u16;

/// One block of file data
pub type Block = [u8; BLOCK_SIZE];

/// Allocate a zero-filled block on the heap.
pub fn zeroed_block() -> Box<Block> {
    Box::new([0u8; BLOCK_SIZE])
}

/// Protocol operations.
///
/// The discriminants are the wire opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Operation {
    InitEndpoint = 0,
    StopEndpoint = 1,
    CreateBlock = 2,
    UpdateBlock = 3,
    ObtainBlock = 4,
    DeleteBlock = 5,
}

impl Operation {
    /// Wire opcode for this operation.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Map a wire opcode back to an operation.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Operation::InitEndpoint),
            1 => Some(Operation::StopEndpoint),
            2 => Some(Operation::CreateBlock),
            3 => Some(Operation::UpdateBlock),
            4 => Some(Operation::ObtainBlock),
            5 => Some(Operation::DeleteBlock),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Operation::InitEndpoint => "INIT_ENDPOINT",
            Operation::StopEndpoint => "STOP_ENDPOINT",
            Operation::CreateBlock => "CREATE_BLOCK",
            Operation::UpdateBlock => "UPDATE_BLOCK",
            Operation::ObtainBlock => "OBTAIN_BLOCK",
            Operation::DeleteBlock => "DELETE_BLOCK",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u32> for Operation {
    type Error = PacketError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        Operation::from_code(code).ok_or(PacketError::BadOperation)
    }
}

/// A decoded protocol packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Node that sent the packet
    pub local_node: NodeId,

    /// Node the packet is addressed to
    pub remote_node: NodeId,

    /// Block the operation refers to
    pub block_id: BlockId,

    /// Requested (or acknowledged) operation
    pub operation: Operation,

    /// Sender's sequence number
    pub sender_seq: SeqNum,

    /// Receiver's sequence number
    pub receiver_seq: SeqNum,

    /// Block payload, if any
    pub data: Option<Box<Block>>,
}

impl Packet {
    /// Create a packet without a payload.
    pub fn new(
        local_node: NodeId,
        remote_node: NodeId,
        block_id: BlockId,
        operation: Operation,
        sender_seq: SeqNum,
        receiver_seq: SeqNum,
    ) -> Self {
        Self {
            local_node,
            remote_node,
            block_id,
            operation,
            sender_seq,
            receiver_seq,
            data: None,
        }
    }

    /// Attach a block payload.
    pub fn with_data(mut self, data: Box<Block>) -> Self {
        self.data = Some(data);
        self
    }

    /// Length of this packet on the wire.
    pub fn encoded_len(&self) -> usize {
        if self.data.is_some() {
            DATA_PACKET_SIZE
        } else {
            BASE_PACKET_SIZE
        }
    }

    /// Serialize this packet into bytes for transmission.
    ///
    /// # Errors
    /// The first field failing validation, in layout order.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        validate_fields(
            self.local_node,
            self.remote_node,
            self.block_id,
            self.operation.code(),
            self.sender_seq,
            self.receiver_seq,
        )?;

        let mut bytes = Vec::with_capacity(self.encoded_len());

        // Write header
        bytes.extend_from_slice(&MAGIC.to_le_bytes());
        bytes.extend_from_slice(&self.local_node.to_le_bytes());
        bytes.extend_from_slice(&self.remote_node.to_le_bytes());
        bytes.extend_from_slice(&self.block_id.to_le_bytes());
        bytes.extend_from_slice(&self.operation.code().to_le_bytes());
        bytes.extend_from_slice(&self.sender_seq.to_le_bytes());
        bytes.extend_from_slice(&self.receiver_seq.to_le_bytes());

        match &self.data {
            Some(block) => {
                bytes.push(1);
                bytes.extend_from_slice(&block[..]);
            }
            None => bytes.push(0),
        }

        // Write trailer
        bytes.extend_from_slice(&MAGIC.to_le_bytes());

        Ok(bytes)
    }

    /// Deserialize a packet from bytes.
    ///
    /// # Errors
    /// - `BadPacket` if the buffer cannot hold a magic value, or either magic mismatches
    /// - `BadBlockLength` if the header is truncated or the length disagrees with the indicator
    /// - `BadBlockData` if the indicator is neither 0 nor 1
    /// - the field errors shared with [`Packet::encode`]
    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < MAGIC_SIZE {
            return Err(PacketError::BadPacket);
        }

        let mut reader = FieldReader::new(bytes);
        if reader.u32() != MAGIC {
            return Err(PacketError::BadPacket);
        }

        if bytes.len() < HEADER_SIZE {
            return Err(PacketError::BadBlockLength);
        }

        // Parse header
        let local_node = reader.u64();
        let remote_node = reader.u64();
        let block_id = reader.u64();
        let op_code = reader.u32();
        let sender_seq = reader.u16();
        let receiver_seq = reader.u16();
        let indicator = reader.u8();

        let operation = validate_fields(
            local_node,
            remote_node,
            block_id,
            op_code,
            sender_seq,
            receiver_seq,
        )?;

        let has_data = match indicator {
            0 => false,
            1 => true,
            _ => return Err(PacketError::BadBlockData),
        };

        let expected_len = if has_data {
            DATA_PACKET_SIZE
        } else {
            BASE_PACKET_SIZE
        };
        if bytes.len() != expected_len {
            return Err(PacketError::BadBlockLength);
        }

        let data = if has_data {
            let mut block = zeroed_block();
            block.copy_from_slice(reader.slice(BLOCK_SIZE));
            Some(block)
        } else {
            None
        };

        if reader.u32() != MAGIC {
            return Err(PacketError::BadPacket);
        }

        Ok(Self {
            local_node,
            remote_node,
            block_id,
            operation,
            sender_seq,
            receiver_seq,
            data,
        })
    }
}

/// Field checks shared by encode and decode, in precedence order.
fn validate_fields(
    local_node: NodeId,
    remote_node: NodeId,
    block_id: BlockId,
    op_code: u32,
    sender_seq: SeqNum,
    receiver_seq: SeqNum,
) -> Result<Operation, PacketError> {
    if local_node == 0 {
        return Err(PacketError::BadLocalId);
    }
    if remote_node == 0 {
        return Err(PacketError::BadRemoteId);
    }
    if block_id == 0 {
        return Err(PacketError::BadBlockId);
    }
    let operation = Operation::try_from(op_code)?;
    if sender_seq == 0 {
        return Err(PacketError::BadSenderSequence);
    }
    if receiver_seq == 0 {
        return Err(PacketError::BadReceiverSequence);
    }
    Ok(operation)
}

/// Sequential little-endian reader over a length-checked buffer.
struct FieldReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn slice(&mut self, len: usize) -> &'a [u8] {
        let out = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        out
    }

    fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(self.slice(N));
        out
    }

    fn u8(&mut self) -> u8 {
        self.array::<1>()[0]
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.array())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.array())
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.array())
    }
}
