//! Soilbridge
//!
//! A soil-moisture sensor node and the Wi-Fi bridge that links it to a
//! server. Both speak one framed binary protocol: the sensor over a serial
//! line, the bridge over that line and a TCP or WebSocket session upstream.
//!
//! # Overview
//!
//! - [`protocol`]: opcodes, frames, the streaming packet codec and the
//!   session handshake
//! - [`store`]: the replicated sensor configuration
//! - [`controller`]: the hysteresis pump controller
//! - [`connection`]: attachment and session state machines with heartbeat
//! - [`transport`]: TCP, WebSocket and serial links
//! - [`router`]: per-opcode dispatch for both roles
//! - [`node`]: the cooperative bridge and sensor run loops
//!
//! # Quick Start
//!
//! ```rust
//! use soilbridge::protocol::{Frame, Opcode, PacketCodec};
//!
//! let mut codec = PacketCodec::new();
//! let frames = codec.feed_all(&[101, 110, 42, 0]);
//! assert_eq!(frames[0].as_ref().unwrap().opcode(), Opcode::Ping);
//! assert_eq!(frames[1].as_ref().unwrap(), &Frame::telemetry(42));
//! ```

pub mod config;
pub mod connection;
pub mod controller;
pub mod error;
pub mod node;
pub mod observability;
pub mod protocol;
pub mod router;
pub mod store;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, NodeConfig};
pub use error::{NodeError, NodeResult};
pub use node::{BridgeNode, NodeExit, SensorNode};
pub use protocol::*;
pub use router::{Role, Router};
pub use store::ConfigStore;
