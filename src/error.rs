//! Error types for the signaling relay.
//!
//! Every error here is local to one connection: none of them is allowed to
//! abort another session or the listener.

use thiserror::Error;

/// Errors produced while decoding or encoding signaling envelopes.
#[derive(Debug, Error)]
pub enum SignalError {
    /// The outer `{type, data}` envelope could not be parsed.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[source] serde_json::Error),

    /// The inner payload of a recognized `type` could not be parsed.
    #[error("malformed {kind} payload: {reason}")]
    MalformedPayload { kind: String, reason: String },

    /// Serializing an in-memory value failed. This is an internal fault.
    #[error("failed to encode signal: {0}")]
    Encode(#[source] serde_json::Error),
}

/// A peer-connection engine operation failed.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine operation `{op}` failed: {reason}")]
    OperationFailed { op: &'static str, reason: String },

    /// The engine driver is gone (its thread exited or the handle was closed).
    #[error("engine driver is not running")]
    DriverGone,
}

impl EngineError {
    pub fn failed(op: &'static str, reason: impl ToString) -> Self {
        EngineError::OperationFailed {
            op,
            reason: reason.to_string(),
        }
    }
}

/// Sending on a direct channel failed.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("direct channel `{0}` is closed")]
    Closed(String),
}

/// Errors on the duplex signaling channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The inbound request could not be upgraded to a websocket.
    #[error("upgrade failed: {0}")]
    UpgradeFailed(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The other side of the channel went away.
    #[error("duplex channel closed")]
    Closed,
}
