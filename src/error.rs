//! Crate-level error type
//!
//! Layer errors keep their own enums; `NodeError` is what a node run returns.
//! Only a framing capacity violation is fatal: every other failure is logged
//! and retried on a later tick by the loop that hit it.

use crate::config::ConfigError;
use crate::protocol::ProtocolError;
use crate::transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serial link closed")]
    SerialClosed,
}

impl NodeError {
    /// True when the only safe recovery is a cold restart
    pub fn requires_cold_reset(&self) -> bool {
        matches!(self, NodeError::Protocol(e) if e.is_fatal())
    }
}

/// Result type for node operations
pub type NodeResult<T> = Result<T, NodeError>;
