//! Wire layout of the runtime sensor configuration
//!
//! Four `u32` fields in the fixed order `[offset, low, high, interval_ms]`,
//! each in the platform's native byte order. Both ends of a link must agree
//! on endianness; the protocol does not carry it.

use super::opcode::{Opcode, CONFIG_PAYLOAD_SIZE};
use super::ProtocolError;
use serde::{Deserialize, Serialize};

/// Calibration and control parameters replicated from the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Raw reading treated as fully wet
    pub offset: u32,
    /// Start watering below this moisture percentage
    pub low: u32,
    /// Stop watering at or above this moisture percentage
    pub high: u32,
    /// Idle sampling and telemetry period in milliseconds
    pub interval_ms: u32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            offset: 250,
            low: 30,
            high: 70,
            interval_ms: 1000,
        }
    }
}

impl SensorConfig {
    pub fn to_bytes(&self) -> [u8; CONFIG_PAYLOAD_SIZE] {
        let mut out = [0u8; CONFIG_PAYLOAD_SIZE];
        let fields = [self.offset, self.low, self.high, self.interval_ms];
        for (chunk, value) in out.chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&value.to_ne_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8; CONFIG_PAYLOAD_SIZE]) -> Self {
        let field = |i: usize| {
            let mut word = [0u8; 4];
            word.copy_from_slice(&bytes[i * 4..i * 4 + 4]);
            u32::from_ne_bytes(word)
        };

        Self {
            offset: field(0),
            low: field(1),
            high: field(2),
            interval_ms: field(3),
        }
    }

    /// Decode a frame payload, rejecting anything that is not exactly 16 bytes
    pub fn from_payload(opcode: Opcode, payload: &[u8]) -> Result<Self, ProtocolError> {
        let bytes: &[u8; CONFIG_PAYLOAD_SIZE] =
            payload
                .try_into()
                .map_err(|_| ProtocolError::PayloadLength {
                    opcode,
                    expected: CONFIG_PAYLOAD_SIZE,
                    actual: payload.len(),
                })?;
        Ok(Self::from_bytes(bytes))
    }

    /// Whether the hysteresis band `[low, high)` is non-degenerate
    pub fn has_dead_zone(&self) -> bool {
        self.high > self.low
    }
}
