//! Peer-connection engine seam
//!
//! The relay never speaks ICE, DTLS or SCTP itself. It drives an engine
//! through [`PeerEngine`] and receives the engine's asynchronous
//! notifications as [`EngineEvent`]s on a per-session queue.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{ChannelError, EngineError};
use crate::model::description::{CandidateInit, SessionDescription};
use crate::model::session::SessionId;

pub mod client;
pub mod driver;

#[cfg(test)]
pub mod fake;

/// An opaque application message on a direct channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub binary: bool,
    pub data: Vec<u8>,
}

impl ChannelMessage {
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        ChannelMessage {
            binary: true,
            data: data.into(),
        }
    }

    pub fn text(data: impl Into<String>) -> Self {
        ChannelMessage {
            binary: false,
            data: data.into().into_bytes(),
        }
    }
}

/// Notifications pushed by an engine, in the order they happened.
#[derive(Debug)]
pub enum EngineEvent {
    /// A locally gathered candidate to trickle to the remote client.
    LocalCandidate(CandidateInit),
    /// The remote side opened a direct channel.
    DirectChannel(Arc<dyn DirectChannel>),
    /// Inbound message on the attached direct channel.
    ChannelMessage(ChannelMessage),
    /// The direct channel (or the whole peer connection) went away.
    ChannelClosed,
}

pub type EventSender = mpsc::UnboundedSender<EngineEvent>;

/// Creates one engine per accepted connection.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(
        &self,
        session: SessionId,
        events: EventSender,
    ) -> Result<Box<dyn PeerEngine>, EngineError>;
}

/// Handle to a single peer connection.
#[async_trait]
pub trait PeerEngine: Send {
    async fn set_remote_description(&mut self, desc: SessionDescription)
        -> Result<(), EngineError>;

    async fn create_answer(&mut self) -> Result<SessionDescription, EngineError>;

    async fn set_local_description(&mut self, desc: SessionDescription)
        -> Result<(), EngineError>;

    /// Candidates may arrive before the remote description. The engine
    /// buffers them; callers never hold candidates back.
    async fn add_remote_candidate(&mut self, candidate: CandidateInit) -> Result<(), EngineError>;

    /// Release the connection. No events are delivered afterwards.
    async fn close(&mut self);
}

/// A direct channel established by the remote peer.
///
/// `send` is a non-blocking handoff: it is called while the pairing
/// registry is locked.
pub trait DirectChannel: Send + Sync + fmt::Debug {
    fn label(&self) -> &str;

    fn send(&self, message: &ChannelMessage) -> Result<(), ChannelError>;

    fn close(&self);
}
