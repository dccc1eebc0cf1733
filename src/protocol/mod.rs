//! Framed link protocol shared by the serial line and the server session
//!
//! Wire format: `[opcode: 1 byte][payload per policy][0x00 iff policy != None]`.
//! The same bytes travel over the serial link and inside the transport
//! session, so one codec serves every hop.

pub mod codec;
pub mod frame;
pub mod handshake;
pub mod opcode;
pub mod settings;

pub use codec::{CodecStats, PacketCodec, PAYLOAD_CAPACITY};
pub use frame::Frame;
pub use handshake::{parse_header_block, SessionMetadata, DEFAULT_HEADER_PREFIX};
pub use opcode::{
    Opcode, PayloadPolicy, CONFIG_PAYLOAD_SIZE, MAX_DELIMITED_PAYLOAD, MAX_FIXED_PAYLOAD,
    TERMINATOR,
};
pub use settings::SensorConfig;

use thiserror::Error;

/// Framing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Malformed {opcode} frame: expected terminator, got 0x{found:02x}")]
    Malformed { opcode: Opcode, found: u8 },

    #[error("{opcode} payload exceeds the {capacity}-byte frame bound")]
    CapacityExceeded { opcode: Opcode, capacity: usize },

    #[error("{opcode} payload must be {expected} bytes, got {actual}")]
    PayloadLength {
        opcode: Opcode,
        expected: usize,
        actual: usize,
    },

    #[error("{opcode} payload contains the terminator byte")]
    TerminatorInPayload { opcode: Opcode },
}

impl ProtocolError {
    /// A peer overran the frame bound. The link can no longer be trusted and
    /// the node must restart from empty state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::CapacityExceeded { .. })
    }
}
