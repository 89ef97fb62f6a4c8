//! Recording engine used by the tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ChannelMessage, DirectChannel, EngineEvent, EngineFactory, EventSender, PeerEngine};
use crate::error::{ChannelError, EngineError};
use crate::model::description::{CandidateInit, SessionDescription};
use crate::model::session::SessionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SetRemote(SessionDescription),
    CreateAnswer,
    SetLocal(SessionDescription),
    AddCandidate(CandidateInit),
    Close,
}

/// What the test sees of an engine the loop created.
#[derive(Debug, Clone)]
pub struct FakeEngineHandle {
    pub session: SessionId,
    pub events: EventSender,
    pub calls: Arc<Mutex<Vec<Call>>>,
}

impl FakeEngineHandle {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Simulate the remote side opening a direct channel.
    pub fn open_channel(&self, label: &str) -> mpsc::UnboundedReceiver<ChannelMessage> {
        let (channel, rx) = FakeChannel::new(label);
        self.events.send(EngineEvent::DirectChannel(channel)).unwrap();
        rx
    }

    /// Simulate the direct channel (or the whole connection) going away.
    pub fn close_channel(&self) {
        self.events.send(EngineEvent::ChannelClosed).unwrap();
    }

    /// Simulate a message arriving on this engine's direct channel.
    pub fn deliver(&self, message: ChannelMessage) {
        self.events
            .send(EngineEvent::ChannelMessage(message))
            .unwrap();
    }
}

pub struct FakeEngineFactory {
    created: mpsc::UnboundedSender<FakeEngineHandle>,
    fail_on: Option<&'static str>,
}

impl FakeEngineFactory {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeEngineHandle>) {
        Self::failing_on(None)
    }

    /// Every engine fails the named operation.
    pub fn failing_on(
        op: Option<&'static str>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<FakeEngineHandle>) {
        let (created, rx) = mpsc::unbounded_channel();
        (
            Arc::new(FakeEngineFactory {
                created,
                fail_on: op,
            }),
            rx,
        )
    }
}

#[async_trait]
impl EngineFactory for FakeEngineFactory {
    async fn create(
        &self,
        session: SessionId,
        events: EventSender,
    ) -> Result<Box<dyn PeerEngine>, EngineError> {
        let calls = Arc::new(Mutex::new(vec![]));
        let _ = self.created.send(FakeEngineHandle {
            session,
            events: events.clone(),
            calls: calls.clone(),
        });
        Ok(Box::new(FakeEngine {
            session,
            events,
            calls,
            remote: None,
            fail_on: self.fail_on,
        }))
    }
}

struct FakeEngine {
    session: SessionId,
    events: EventSender,
    calls: Arc<Mutex<Vec<Call>>>,
    remote: Option<SessionDescription>,
    fail_on: Option<&'static str>,
}

impl FakeEngine {
    fn record(&self, op: &'static str, call: Call) -> Result<(), EngineError> {
        self.calls.lock().unwrap().push(call);
        if self.fail_on == Some(op) {
            return Err(EngineError::failed(op, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerEngine for FakeEngine {
    async fn set_remote_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<(), EngineError> {
        self.record("set_remote_description", Call::SetRemote(desc.clone()))?;
        self.remote = Some(desc);
        Ok(())
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, EngineError> {
        self.record("create_answer", Call::CreateAnswer)?;
        let remote = self
            .remote
            .as_ref()
            .ok_or_else(|| EngineError::failed("create_answer", "no remote description"))?;
        Ok(SessionDescription::answer(format!("answer-to:{}", remote.sdp)))
    }

    async fn set_local_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<(), EngineError> {
        self.record("set_local_description", Call::SetLocal(desc))?;
        let candidate = CandidateInit::new(format!("candidate:fake {}", self.session));
        let _ = self.events.send(EngineEvent::LocalCandidate(candidate));
        Ok(())
    }

    async fn add_remote_candidate(&mut self, candidate: CandidateInit) -> Result<(), EngineError> {
        self.record("add_remote_candidate", Call::AddCandidate(candidate))
    }

    async fn close(&mut self) {
        let _ = self.record("close", Call::Close);
    }
}

/// Direct channel whose sends land on a test receiver.
#[derive(Debug)]
pub struct FakeChannel {
    label: String,
    sent: mpsc::UnboundedSender<ChannelMessage>,
    closed: Mutex<bool>,
}

impl FakeChannel {
    pub fn new(label: &str) -> (Arc<FakeChannel>, mpsc::UnboundedReceiver<ChannelMessage>) {
        let (sent, rx) = mpsc::unbounded_channel();
        (
            Arc::new(FakeChannel {
                label: label.to_string(),
                sent,
                closed: Mutex::new(false),
            }),
            rx,
        )
    }
}

impl DirectChannel for FakeChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn send(&self, message: &ChannelMessage) -> Result<(), ChannelError> {
        if *self.closed.lock().unwrap() {
            return Err(ChannelError::Closed(self.label.clone()));
        }
        self.sent
            .send(message.clone())
            .map_err(|_| ChannelError::Closed(self.label.clone()))
    }

    fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }
}
