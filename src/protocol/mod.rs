//! Client-facing wire protocol of the bridge
//!
//! This module implements the JSON envelopes spoken with browser clients,
//! the MQTT topic filter matcher, and the smart-home payload convention.

pub mod messages;
pub mod payload;
pub mod topics;

pub use messages::*;
pub use payload::*;
pub use topics::*;
