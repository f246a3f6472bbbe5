//! OCPP 1.6-JSON central-system protocol implementation.
//!
//! # Architecture
//! - WebSocket transport, subprotocol `ocpp1.6`
//! - JSON array framing (Call / CallResult message pattern)
//! - Closed action set with typed payloads
//! - Message correlation via echoed message ids

pub mod engine;
pub mod frame;
pub mod messages;

pub use engine::{Engine, EngineHooks, PermissiveHooks};
pub use frame::{decode, MessageType, OcppMessage, Request, Response};
