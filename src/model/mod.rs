//! Data models for the signaling relay
//!
//! Wire envelopes, the negotiation payloads they carry, the per-connection
//! session state shared with the relay, and the demo peer's payload.

pub mod description;
pub mod payload;
pub mod session;
pub mod signal;
