//! Opcode table and payload policies for the framed link protocol
//!
//! Every frame starts with a one-byte opcode. The opcode alone decides how many
//! payload bytes follow and whether a terminator byte closes the frame, so the
//! values below are fixed for interoperability with deployed nodes.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Byte that closes every frame whose policy carries a payload
pub const TERMINATOR: u8 = 0x00;

/// Size of the `Config` payload carried by the config opcodes
pub const CONFIG_PAYLOAD_SIZE: usize = 16;

/// Largest fixed payload of any known opcode
pub const MAX_FIXED_PAYLOAD: usize = CONFIG_PAYLOAD_SIZE;

/// Upper bound on a terminator-delimited payload (log messages)
pub const MAX_DELIMITED_PAYLOAD: usize = 128;

/// One-byte frame tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    /// Sentinel for "no frame in progress", never sent on the wire
    Empty = 0,
    Ping = 101,
    Pong = 102,
    SubmitTelemetry = 110,
    ClientSubmitConfig = 111,
    ServerSetClientConfig = 112,
    ServerGetClientConfig = 113,
    ClientGetServerConfig = 114,
    LogMessage = 120,
    DebugReset = 121,
    DebugRestart = 122,
    DebugDisconnectSession = 123,
}

/// How many payload bytes follow an opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadPolicy {
    /// Header only; the frame is complete as soon as the opcode arrives
    None,
    /// Exactly `n` payload bytes followed by the terminator
    Fixed(usize),
    /// Any number of non-terminator bytes, closed by the terminator
    DelimitedByTerminator,
}

impl PayloadPolicy {
    /// Whether frames under this policy end with [`TERMINATOR`]
    pub fn has_terminator(&self) -> bool {
        !matches!(self, PayloadPolicy::None)
    }
}

impl Opcode {
    /// Parse a header byte. Unknown values and the `Empty` sentinel yield `None`
    /// so the decoder can treat them as resynchronization noise.
    pub fn from_header(byte: u8) -> Option<Self> {
        match Opcode::try_from(byte) {
            Ok(Opcode::Empty) | Err(_) => None,
            Ok(opcode) => Some(opcode),
        }
    }

    pub fn policy(&self) -> PayloadPolicy {
        match self {
            Opcode::Empty
            | Opcode::Ping
            | Opcode::Pong
            | Opcode::ServerGetClientConfig
            | Opcode::ClientGetServerConfig
            | Opcode::DebugReset
            | Opcode::DebugRestart
            | Opcode::DebugDisconnectSession => PayloadPolicy::None,
            Opcode::SubmitTelemetry => PayloadPolicy::Fixed(1),
            Opcode::ClientSubmitConfig | Opcode::ServerSetClientConfig => {
                PayloadPolicy::Fixed(CONFIG_PAYLOAD_SIZE)
            }
            Opcode::LogMessage => PayloadPolicy::DelimitedByTerminator,
        }
    }

    /// Debug commands are executed by the bridge and never relayed
    pub fn is_debug_command(&self) -> bool {
        matches!(
            self,
            Opcode::DebugReset | Opcode::DebugRestart | Opcode::DebugDisconnectSession
        )
    }

    pub fn as_byte(&self) -> u8 {
        (*self).into()
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, self.as_byte())
    }
}
