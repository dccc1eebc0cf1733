//! Frame type and encoder
//!
//! A frame is `[opcode][payload per policy][terminator iff policy != None]`.
//! Frames handed out by this module always satisfy their opcode's policy;
//! constructors validate instead of trusting the caller.

use super::opcode::{Opcode, PayloadPolicy, MAX_DELIMITED_PAYLOAD, TERMINATOR};
use super::settings::SensorConfig;
use super::ProtocolError;
use bytes::{BufMut, Bytes, BytesMut};

/// One complete protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    opcode: Opcode,
    payload: Bytes,
}

impl Frame {
    /// Build a frame, checking the payload against the opcode's policy
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Result<Self, ProtocolError> {
        let payload = payload.into();
        match opcode.policy() {
            PayloadPolicy::None if !payload.is_empty() => {
                return Err(ProtocolError::PayloadLength {
                    opcode,
                    expected: 0,
                    actual: payload.len(),
                });
            }
            PayloadPolicy::Fixed(n) if payload.len() != n => {
                return Err(ProtocolError::PayloadLength {
                    opcode,
                    expected: n,
                    actual: payload.len(),
                });
            }
            PayloadPolicy::DelimitedByTerminator => {
                if payload.len() > MAX_DELIMITED_PAYLOAD {
                    return Err(ProtocolError::CapacityExceeded {
                        opcode,
                        capacity: MAX_DELIMITED_PAYLOAD,
                    });
                }
                if payload.contains(&TERMINATOR) {
                    return Err(ProtocolError::TerminatorInPayload { opcode });
                }
            }
            _ => {}
        }

        Ok(Self { opcode, payload })
    }

    /// Header-only frame for zero-payload opcodes (PING, debug commands, ...)
    pub fn header_only(opcode: Opcode) -> Result<Self, ProtocolError> {
        Self::new(opcode, Bytes::new())
    }

    pub fn ping() -> Self {
        Self {
            opcode: Opcode::Ping,
            payload: Bytes::new(),
        }
    }

    pub fn pong() -> Self {
        Self {
            opcode: Opcode::Pong,
            payload: Bytes::new(),
        }
    }

    /// Moisture percentage submission
    pub fn telemetry(moisture: u8) -> Self {
        Self {
            opcode: Opcode::SubmitTelemetry,
            payload: Bytes::copy_from_slice(&[moisture]),
        }
    }

    /// Config frame for either config-carrying opcode
    pub fn config(opcode: Opcode, config: &SensorConfig) -> Result<Self, ProtocolError> {
        Self::new(opcode, Bytes::copy_from_slice(&config.to_bytes()))
    }

    /// Log line for the peer's diagnostic sink.
    ///
    /// Terminator bytes are dropped, the text is cut to the delimited payload
    /// bound and always ends with a newline.
    pub fn log(message: &str) -> Self {
        let mut payload = BytesMut::with_capacity(MAX_DELIMITED_PAYLOAD);
        let body: Vec<u8> = message
            .bytes()
            .filter(|b| *b != TERMINATOR && *b != b'\n')
            .take(MAX_DELIMITED_PAYLOAD - 1)
            .collect();
        payload.put_slice(&body);
        payload.put_u8(b'\n');

        Self {
            opcode: Opcode::LogMessage,
            payload: payload.freeze(),
        }
    }

    /// Decoder-side constructor; the codec has already enforced the policy
    pub(crate) fn from_parts(opcode: Opcode, payload: Bytes) -> Self {
        Self { opcode, payload }
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Number of bytes this frame occupies on the wire
    pub fn encoded_len(&self) -> usize {
        let terminator = usize::from(self.opcode.policy().has_terminator());
        1 + self.payload.len() + terminator
    }

    /// Append the wire encoding to `dst`
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u8(self.opcode.as_byte());
        dst.put_slice(&self.payload);
        if self.opcode.policy().has_terminator() {
            dst.put_u8(TERMINATOR);
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut dst);
        dst.freeze()
    }

    /// Payload decoded as a config, for the config-carrying opcodes
    pub fn sensor_config(&self) -> Result<SensorConfig, ProtocolError> {
        SensorConfig::from_payload(self.opcode, &self.payload)
    }

    /// Payload of a log frame as text, trailing newline removed
    pub fn log_text(&self) -> String {
        String::from_utf8_lossy(&self.payload)
            .trim_end_matches('\n')
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_header_only() {
        assert_eq!(Frame::ping().encode().as_ref(), &[101]);
        assert_eq!(
            Frame::header_only(Opcode::DebugRestart).unwrap().encode().as_ref(),
            &[122]
        );
    }

    #[test]
    fn test_encode_fixed_appends_terminator() {
        assert_eq!(Frame::telemetry(42).encode().as_ref(), &[110, 42, 0]);
    }

    #[test]
    fn test_encode_config_frame() {
        let config = SensorConfig {
            offset: 250,
            low: 30,
            high: 70,
            interval_ms: 1000,
        };
        let frame = Frame::config(Opcode::ClientSubmitConfig, &config).unwrap();
        let wire = frame.encode();

        assert_eq!(wire.len(), 18);
        assert_eq!(wire[0], 111);
        assert_eq!(&wire[1..17], &config.to_bytes());
        assert_eq!(wire[17], TERMINATOR);
        assert_eq!(frame.encoded_len(), 18);
    }

    #[test]
    fn test_new_rejects_policy_violations() {
        assert!(matches!(
            Frame::new(Opcode::Ping, vec![1u8]),
            Err(ProtocolError::PayloadLength { expected: 0, .. })
        ));
        assert!(matches!(
            Frame::new(Opcode::SubmitTelemetry, vec![1u8, 2]),
            Err(ProtocolError::PayloadLength { expected: 1, .. })
        ));
        assert!(matches!(
            Frame::new(Opcode::LogMessage, vec![b'a', 0, b'b']),
            Err(ProtocolError::TerminatorInPayload { .. })
        ));
        assert!(matches!(
            Frame::new(Opcode::LogMessage, vec![b'a'; MAX_DELIMITED_PAYLOAD + 1]),
            Err(ProtocolError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn test_log_frame_is_sanitized() {
        let frame = Frame::log("wifi\0 up\nnow");
        assert_eq!(frame.payload().as_ref(), b"wifi upnow\n");
        assert_eq!(frame.log_text(), "wifi upnow");

        let long = "x".repeat(500);
        let frame = Frame::log(&long);
        assert_eq!(frame.payload().len(), MAX_DELIMITED_PAYLOAD);
        assert!(Frame::new(Opcode::LogMessage, frame.payload().clone()).is_ok());
    }
}
