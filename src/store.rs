//! In-memory holder of the replicated sensor configuration
//!
//! The value is replaced wholesale, never field by field, and only from a
//! fully decoded payload. Nothing is persisted: a restarted node falls back to
//! its compiled-in defaults until the server confirms a configuration again.

use crate::protocol::{Frame, ProtocolError, SensorConfig};
use tracing::{debug, warn};

/// Owner of the node's current [`SensorConfig`]
#[derive(Debug, Clone)]
pub struct ConfigStore {
    current: SensorConfig,
    confirmed: bool,
    revision: u64,
}

impl ConfigStore {
    pub fn new(defaults: SensorConfig) -> Self {
        Self {
            current: defaults,
            confirmed: false,
            revision: 0,
        }
    }

    pub fn get(&self) -> SensorConfig {
        self.current
    }

    /// Replace the whole configuration
    pub fn replace(&mut self, config: SensorConfig) {
        if !config.has_dead_zone() {
            warn!(
                low = config.low,
                high = config.high,
                "Configured hysteresis band is empty; controller will not hold state"
            );
        }
        self.current = config;
        self.revision += 1;
        debug!(revision = self.revision, ?config, "Configuration replaced");
    }

    /// True once a configuration has been confirmed by the server
    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    pub fn mark_confirmed(&mut self) {
        self.confirmed = true;
    }

    /// Number of replacements since start
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Decode a config-set frame and, only if the payload is complete,
    /// replace the value and mark it confirmed
    pub fn apply_frame(&mut self, frame: &Frame) -> Result<SensorConfig, ProtocolError> {
        let config = frame.sensor_config()?;
        self.replace(config);
        self.mark_confirmed();
        Ok(config)
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(SensorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Opcode;

    fn sample() -> SensorConfig {
        SensorConfig {
            offset: 300,
            low: 20,
            high: 60,
            interval_ms: 5000,
        }
    }

    #[test]
    fn test_starts_with_unconfirmed_defaults() {
        let store = ConfigStore::default();
        assert_eq!(store.get(), SensorConfig::default());
        assert!(!store.is_confirmed());
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn test_replace_does_not_confirm() {
        let mut store = ConfigStore::default();
        store.replace(sample());
        assert_eq!(store.get(), sample());
        assert!(!store.is_confirmed());
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn test_apply_frame_confirms() {
        let mut store = ConfigStore::default();
        let frame = Frame::config(Opcode::ServerSetClientConfig, &sample()).unwrap();
        let applied = store.apply_frame(&frame).unwrap();
        assert_eq!(applied, sample());
        assert_eq!(store.get(), sample());
        assert!(store.is_confirmed());
    }

    #[test]
    fn test_apply_frame_rejects_wrong_payload() {
        let mut store = ConfigStore::default();
        let frame = Frame::telemetry(10);
        assert!(store.apply_frame(&frame).is_err());
        assert_eq!(store.get(), SensorConfig::default());
        assert!(!store.is_confirmed());
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn test_inverted_band_is_stored_verbatim() {
        let mut store = ConfigStore::default();
        let inverted = SensorConfig {
            low: 80,
            high: 20,
            ..sample()
        };
        store.replace(inverted);
        assert_eq!(store.get(), inverted);
    }
}
