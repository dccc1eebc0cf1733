//! Incremental one-byte-at-a-time frame decoder
//!
//! The decoder is either idle or accumulating the payload of one frame. Opcode
//! bytes are the only frame delimiter, so an unknown byte seen while idle is
//! dropped as resynchronization noise. Payload storage is allocated once at
//! the protocol's payload bound and never grows.
//!
//! ```
//! use soilbridge::protocol::{Opcode, PacketCodec};
//!
//! let mut codec = PacketCodec::new();
//! assert_eq!(codec.feed(110).unwrap(), None);
//! assert_eq!(codec.feed(42).unwrap(), None);
//! let frame = codec.feed(0x00).unwrap().unwrap();
//! assert_eq!(frame.opcode(), Opcode::SubmitTelemetry);
//! assert_eq!(frame.payload().as_ref(), &[42]);
//! ```

use super::frame::Frame;
use super::opcode::{Opcode, PayloadPolicy, MAX_DELIMITED_PAYLOAD, MAX_FIXED_PAYLOAD, TERMINATOR};
use super::ProtocolError;
use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

/// Payload storage bound shared by fixed and delimited opcodes
pub const PAYLOAD_CAPACITY: usize = if MAX_DELIMITED_PAYLOAD > MAX_FIXED_PAYLOAD {
    MAX_DELIMITED_PAYLOAD
} else {
    MAX_FIXED_PAYLOAD
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Idle,
    Accumulating(Opcode),
}

/// Running counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecStats {
    pub frames: u64,
    pub malformed: u64,
    pub noise_bytes: u64,
    pub overflows: u64,
}

/// Stateful decoder for one inbound byte stream
#[derive(Debug)]
pub struct PacketCodec {
    state: DecodeState,
    payload: BytesMut,
    stats: CodecStats,
}

impl PacketCodec {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Idle,
            payload: BytesMut::with_capacity(PAYLOAD_CAPACITY),
            stats: CodecStats::default(),
        }
    }

    /// Feed one byte.
    ///
    /// Returns `Ok(Some(frame))` when the byte completes a frame, `Ok(None)`
    /// when more bytes are needed (or the byte was noise), and `Err` when the
    /// frame in progress was discarded. After an error the decoder is idle.
    pub fn feed(&mut self, byte: u8) -> Result<Option<Frame>, ProtocolError> {
        match self.state {
            DecodeState::Idle => self.start_frame(byte),
            DecodeState::Accumulating(opcode) => match opcode.policy() {
                PayloadPolicy::Fixed(size) => self.accumulate_fixed(opcode, size, byte),
                PayloadPolicy::DelimitedByTerminator => self.accumulate_delimited(opcode, byte),
                // Header-only opcodes complete in start_frame
                PayloadPolicy::None => {
                    self.reset();
                    self.start_frame(byte)
                }
            },
        }
    }

    /// Feed a chunk, collecting every outcome in arrival order
    pub fn feed_all(&mut self, bytes: &[u8]) -> Vec<Result<Frame, ProtocolError>> {
        bytes
            .iter()
            .filter_map(|byte| self.feed(*byte).transpose())
            .collect()
    }

    /// Drop any partially received frame
    pub fn reset(&mut self) {
        self.state = DecodeState::Idle;
        self.payload.clear();
    }

    pub fn is_idle(&self) -> bool {
        self.state == DecodeState::Idle
    }

    /// Opcode of the frame currently being accumulated
    pub fn pending_opcode(&self) -> Option<Opcode> {
        match self.state {
            DecodeState::Idle => None,
            DecodeState::Accumulating(opcode) => Some(opcode),
        }
    }

    pub fn stats(&self) -> CodecStats {
        self.stats
    }

    fn start_frame(&mut self, byte: u8) -> Result<Option<Frame>, ProtocolError> {
        let Some(opcode) = Opcode::from_header(byte) else {
            trace!(byte, "Ignoring non-opcode byte while idle");
            self.stats.noise_bytes += 1;
            return Ok(None);
        };

        if opcode.policy() == PayloadPolicy::None {
            self.stats.frames += 1;
            return Ok(Some(Frame::from_parts(opcode, Bytes::new())));
        }

        self.payload.clear();
        self.state = DecodeState::Accumulating(opcode);
        Ok(None)
    }

    fn accumulate_fixed(
        &mut self,
        opcode: Opcode,
        size: usize,
        byte: u8,
    ) -> Result<Option<Frame>, ProtocolError> {
        if self.payload.len() < size {
            self.payload.put_u8(byte);
            return Ok(None);
        }
        self.finish(opcode, byte)
    }

    fn accumulate_delimited(
        &mut self,
        opcode: Opcode,
        byte: u8,
    ) -> Result<Option<Frame>, ProtocolError> {
        if byte == TERMINATOR {
            return self.finish(opcode, byte);
        }
        if self.payload.len() == MAX_DELIMITED_PAYLOAD {
            self.reset();
            self.stats.overflows += 1;
            return Err(ProtocolError::CapacityExceeded {
                opcode,
                capacity: MAX_DELIMITED_PAYLOAD,
            });
        }
        self.payload.put_u8(byte);
        Ok(None)
    }

    fn finish(&mut self, opcode: Opcode, byte: u8) -> Result<Option<Frame>, ProtocolError> {
        // Copy out so the pre-sized buffer keeps its capacity
        let payload = Bytes::copy_from_slice(&self.payload);
        self.reset();

        if byte != TERMINATOR {
            self.stats.malformed += 1;
            return Err(ProtocolError::Malformed {
                opcode,
                found: byte,
            });
        }

        self.stats.frames += 1;
        Ok(Some(Frame::from_parts(opcode, payload)))
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}
