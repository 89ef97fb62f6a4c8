//! Per-connection signaling loop
//!
//! One loop runs per accepted connection. It races two sources of work,
//! envelopes read from the client and events pushed by the engine, and is
//! the only writer on the connection's duplex channel.
//!
//! States: `Idle -> Negotiating -> Active -> Closed`.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::engine::{DirectChannel, EngineEvent, EngineFactory, PeerEngine};
use crate::error::{EngineError, SignalError, TransportError};
use crate::matchmaker::{Matchmaker, Pairing};
use crate::model::description::{CandidateInit, SessionDescription};
use crate::model::session::{PeerSession, SessionId};
use crate::model::signal::{Signal, SignalKind};
use crate::relay;
use crate::transport::{SignalSink, SignalSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Registered, engine created, no offer yet.
    Idle,
    /// Answer sent; waiting for the remote side to open a direct channel.
    Negotiating,
    /// Direct channel attached; relay is live.
    Active,
    Closed,
}

/// Why a loop stopped.
#[derive(Debug)]
enum CloseReason {
    RemoteClosed,
    Transport(TransportError),
    MalformedEnvelope(SignalError),
    Negotiation(EngineError),
}

impl CloseReason {
    /// Whether the duplex channel may still be written to.
    fn channel_usable(&self) -> bool {
        matches!(
            self,
            CloseReason::MalformedEnvelope(_) | CloseReason::Negotiation(_)
        )
    }
}

type Step = Result<(), CloseReason>;

/// Serve one connection until it closes.
pub async fn run_session<R, W>(
    mut reader: R,
    writer: W,
    factory: Arc<dyn EngineFactory>,
    matchmaker: Arc<Matchmaker>,
) where
    R: SignalSource,
    W: SignalSink,
{
    let session = PeerSession::new();
    let id = session.id();
    let (events_tx, mut events) = mpsc::unbounded_channel();

    let engine = match factory.create(id, events_tx).await {
        Ok(engine) => engine,
        Err(e) => {
            warn!("Session({}) could not create an engine: {}", id, e);
            return;
        }
    };

    if let Pairing::Paired(partner) = matchmaker.enqueue(session.clone()) {
        debug!("Session({}) starts paired with Session({})", id, partner);
    }

    let mut pump = SignalingLoop {
        session,
        engine,
        writer,
        matchmaker,
        state: SessionState::Idle,
    };

    let reason = loop {
        let step = tokio::select! {
            incoming = reader.read_message() => pump.on_incoming(incoming).await,
            Some(event) = events.recv() => pump.on_event(event).await,
        };

        if let Err(reason) = step {
            break reason;
        }
    };

    pump.shutdown(reason).await;
}

struct SignalingLoop<W> {
    session: Arc<PeerSession>,
    engine: Box<dyn PeerEngine>,
    writer: W,
    matchmaker: Arc<Matchmaker>,
    state: SessionState,
}

impl<W: SignalSink> SignalingLoop<W> {
    fn id(&self) -> SessionId {
        self.session.id()
    }

    async fn on_incoming(&mut self, incoming: Option<Result<Vec<u8>, TransportError>>) -> Step {
        let raw = match incoming {
            None => return Err(CloseReason::RemoteClosed),
            Some(Err(e)) => return Err(CloseReason::Transport(e)),
            Some(Ok(raw)) => raw,
        };

        let signal = Signal::decode(&raw).map_err(CloseReason::MalformedEnvelope)?;

        match signal.kind() {
            SignalKind::Offer => self.on_offer(&signal).await,
            SignalKind::Ice => self.on_remote_candidate(&signal).await,
            kind => {
                debug!("Session({}) ignoring '{}' signal", self.id(), kind.as_str());
                Ok(())
            }
        }
    }

    async fn on_offer(&mut self, signal: &Signal) -> Step {
        if self.state != SessionState::Idle {
            warn!(
                "Session({}) ignoring offer in state {:?}: renegotiation is not supported",
                self.id(),
                self.state
            );
            return Ok(());
        }

        let offer: SessionDescription = match signal.payload() {
            Ok(offer) => offer,
            Err(e) => {
                warn!("Session({}) skipping signal: {}", self.id(), e);
                return Ok(());
            }
        };

        info!("Session({}) received offer", self.id());
        let answer = self
            .negotiate(offer)
            .await
            .map_err(CloseReason::Negotiation)?;

        self.state = SessionState::Negotiating;
        self.send(SignalKind::Answer, &answer).await?;
        info!("Session({}) sent answer", self.id());
        Ok(())
    }

    async fn negotiate(
        &mut self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, EngineError> {
        self.engine.set_remote_description(offer).await?;
        let answer = self.engine.create_answer().await?;
        self.engine.set_local_description(answer.clone()).await?;
        Ok(answer)
    }

    async fn on_remote_candidate(&mut self, signal: &Signal) -> Step {
        let candidate: CandidateInit = match signal.payload() {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!("Session({}) skipping signal: {}", self.id(), e);
                return Ok(());
            }
        };

        // A single bad candidate does not doom ICE; keep going.
        if let Err(e) = self.engine.add_remote_candidate(candidate).await {
            warn!("Session({}) remote candidate rejected: {}", self.id(), e);
        }
        Ok(())
    }

    async fn on_event(&mut self, event: EngineEvent) -> Step {
        match event {
            EngineEvent::LocalCandidate(candidate) => {
                debug!("Session({}) local candidate: {}", self.id(), candidate.candidate);
                self.send(SignalKind::Ice, &candidate).await
            }
            EngineEvent::DirectChannel(channel) => {
                self.attach(channel);
                Ok(())
            }
            EngineEvent::ChannelMessage(message) => {
                relay::forward(&self.matchmaker, self.id(), &message);
                Ok(())
            }
            EngineEvent::ChannelClosed => {
                if let Some(channel) = self.session.tear_down() {
                    info!("Session({}) direct channel '{}' closed", self.id(), channel.label());
                    channel.close();
                }
                Ok(())
            }
        }
    }

    fn attach(&mut self, channel: Arc<dyn DirectChannel>) {
        let label = channel.label().to_string();
        match self.session.attach(channel) {
            Ok(()) => {
                info!("Session({}) direct channel '{}' open", self.id(), label);
                self.state = SessionState::Active;
            }
            Err(extra) => {
                warn!(
                    "Session({}) already has a direct channel, closing '{}'",
                    self.id(),
                    label
                );
                extra.close();
            }
        }
    }

    /// Encode and write one envelope.
    async fn send<T: serde::Serialize>(&mut self, kind: SignalKind<'_>, data: &T) -> Step {
        let encoded = Signal::new(kind, data).and_then(|signal| signal.encode());
        let bytes = match encoded {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Session({}) dropping '{}' signal: {}", self.id(), kind.as_str(), e);
                return Ok(());
            }
        };

        self.writer
            .write_message(bytes)
            .await
            .map_err(CloseReason::Transport)
    }

    async fn shutdown(mut self, reason: CloseReason) {
        match &reason {
            CloseReason::RemoteClosed => info!("Session({}) disconnected", self.id()),
            CloseReason::Transport(e) => warn!("Session({}) transport failed: {}", self.id(), e),
            CloseReason::MalformedEnvelope(e) => {
                warn!("Session({}) closing on bad envelope: {}", self.id(), e)
            }
            CloseReason::Negotiation(e) => {
                warn!("Session({}) negotiation failed: {}", self.id(), e)
            }
        }

        self.state = SessionState::Closed;
        self.matchmaker.remove(self.id());

        if let Some(channel) = self.session.tear_down() {
            channel.close();
        }
        self.engine.close().await;

        if reason.channel_usable() {
            self.writer.close().await;
        }
        debug!("Session({}) reached {:?}", self.id(), self.state);
    }
}
