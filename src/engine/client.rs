use std::net::UdpSocket;
use std::sync::{mpsc, Arc};
use std::time::Instant;

use str0m::change::{SdpAnswer, SdpOffer};
use str0m::channel::{ChannelData, ChannelId};
use str0m::{Candidate, Event, IceConnectionState, Input, Output, Rtc, RtcError};
use tracing::{debug, info, warn};

use super::driver::{DriverCommand, RtcChannel};
use super::{ChannelMessage, EngineEvent, EventSender};
use crate::model::description::CandidateInit;
use crate::model::session::SessionId;
use crate::util::candidate_line;

/// One str0m peer connection, owned by the driver thread.
#[derive(Debug)]
pub struct EngineClient {
    pub id: SessionId,
    pub rtc: Rtc,
    events: EventSender,
    commands: mpsc::Sender<DriverCommand>,
    local_candidates: Vec<Candidate>,
    /// Remote candidates that arrived before the offer.
    early_candidates: Vec<Candidate>,
    has_remote: bool,
    /// Answer produced while accepting the offer, until `create_answer` takes it.
    answer: Option<SdpAnswer>,
    /// The answer that was handed out, waiting to be confirmed as local.
    local_sdp: Option<String>,
    cid: Option<ChannelId>,
}

impl EngineClient {
    pub fn new(
        id: SessionId,
        host: Candidate,
        events: EventSender,
        commands: mpsc::Sender<DriverCommand>,
    ) -> EngineClient {
        let mut rtc = Rtc::builder().build();
        let local_candidates = vec![host.clone()];
        let _ = rtc.add_local_candidate(host);

        EngineClient {
            id,
            rtc,
            events,
            commands,
            local_candidates,
            early_candidates: vec![],
            has_remote: false,
            answer: None,
            local_sdp: None,
            cid: None,
        }
    }

    pub fn accepts(&self, input: &Input) -> bool {
        self.rtc.accepts(input)
    }

    pub fn handle_input(&mut self, input: Input) {
        if !self.rtc.is_alive() {
            return;
        }

        if let Err(e) = self.rtc.handle_input(input) {
            warn!("Engine({}) disconnected: {:?}", *self.id, e);
            self.rtc.disconnect();
        }
    }

    /// str0m applies the remote offer and produces the local answer in one
    /// step. The answer is kept for `take_answer`.
    pub fn accept_offer(&mut self, offer: SdpOffer) -> Result<(), RtcError> {
        let answer = self.rtc.sdp_api().accept_offer(offer)?;
        self.answer = Some(answer);
        self.has_remote = true;

        for candidate in self.early_candidates.drain(..) {
            self.rtc.add_remote_candidate(candidate);
        }
        Ok(())
    }

    pub fn take_answer(&mut self) -> Option<String> {
        let sdp = self.answer.take()?.to_sdp_string();
        self.local_sdp = Some(sdp.clone());
        Some(sdp)
    }

    /// Confirm the answer as the local description and start trickling the
    /// local candidates.
    pub fn confirm_local(&mut self, sdp: &str) -> Result<(), String> {
        match self.local_sdp.take() {
            Some(expected) if expected == sdp => {}
            Some(expected) => {
                self.local_sdp = Some(expected);
                return Err("description differs from the produced answer".to_string());
            }
            None => return Err("no answer has been created".to_string()),
        }

        for candidate in &self.local_candidates {
            let init = CandidateInit::new(candidate_line(candidate));
            let _ = self.events.send(EngineEvent::LocalCandidate(init));
        }
        Ok(())
    }

    pub fn add_remote_candidate(&mut self, candidate: Candidate) {
        if self.has_remote {
            self.rtc.add_remote_candidate(candidate);
        } else {
            self.early_candidates.push(candidate);
        }
    }

    /// Write a relayed message on the attached channel.
    pub fn write(&mut self, message: &ChannelMessage) {
        let Some(mut channel) = self.cid.and_then(|id| self.rtc.channel(id)) else {
            debug!("Engine({}) has no open channel, dropping write", *self.id);
            return;
        };

        if let Err(e) = channel.write(message.binary, &message.data) {
            warn!("Engine({}) channel write failed: {:?}", *self.id, e);
        }
    }

    pub fn forget_channel(&mut self) {
        self.cid = None;
    }

    pub fn notify_closed(&self) {
        let _ = self.events.send(EngineEvent::ChannelClosed);
    }

    /// Poll all output until str0m asks to be woken up again, transmitting
    /// on `socket` along the way.
    pub fn poll_until_timeout(&mut self, socket: &UdpSocket) -> Instant {
        loop {
            if !self.rtc.is_alive() {
                // Cleaned up on the next turn of the driver loop.
                return Instant::now();
            }

            match self.rtc.poll_output() {
                Ok(Output::Timeout(t)) => return t,
                Ok(Output::Transmit(transmit)) => {
                    if let Err(e) = socket.send_to(&transmit.contents, transmit.destination) {
                        debug!("Engine({}) UDP send failed: {}", *self.id, e);
                    }
                }
                Ok(Output::Event(event)) => self.handle_event(event),
                Err(e) => {
                    warn!("Engine({}) poll_output failed: {:?}", *self.id, e);
                    self.rtc.disconnect();
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::IceConnectionStateChange(state) => {
                info!("Engine({}): ICE state = {:?}", *self.id, state);
                if state == IceConnectionState::Disconnected {
                    // No ICE restarts; a lost path ends the peer connection.
                    self.rtc.disconnect();
                }
            }
            Event::ChannelOpen(cid, label) => self.handle_channel_open(cid, label),
            Event::ChannelData(data) => self.handle_channel_data(data),
            Event::ChannelClose(cid) => {
                if self.cid == Some(cid) {
                    info!("Engine({}) channel {:?} closed", *self.id, cid);
                    self.cid = None;
                    self.notify_closed();
                }
            }
            other => debug!("Engine({}): event {:?}", *self.id, other),
        }
    }

    fn handle_channel_open(&mut self, cid: ChannelId, label: String) {
        if self.cid.is_some() {
            warn!(
                "Engine({}) ignoring extra channel '{}' ({:?})",
                *self.id, label, cid
            );
            return;
        }

        info!("Engine({}) channel '{}' open ({:?})", *self.id, label, cid);
        self.cid = Some(cid);

        let channel = RtcChannel::new(self.id, label, self.commands.clone());
        let _ = self
            .events
            .send(EngineEvent::DirectChannel(Arc::new(channel)));
    }

    fn handle_channel_data(&mut self, data: ChannelData) {
        if self.cid != Some(data.id) {
            return;
        }

        let _ = self
            .events
            .send(EngineEvent::ChannelMessage(ChannelMessage {
                binary: data.binary,
                data: data.data,
            }));
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use tokio::sync::mpsc::{error::TryRecvError, unbounded_channel, UnboundedReceiver};

    use super::*;

    fn host(addr: &str) -> Candidate {
        Candidate::host(addr.parse::<SocketAddr>().unwrap(), "udp").unwrap()
    }

    fn client() -> (EngineClient, UnboundedReceiver<EngineEvent>) {
        let (events, rx) = unbounded_channel();
        let (commands, _) = mpsc::channel();
        let client = EngineClient::new(SessionId::next(), host("10.0.0.1:5000"), events, commands);
        (client, rx)
    }

    /// An offer from a browser-like peer that wants one data channel.
    fn remote_offer(channels: usize) -> (SdpOffer, Vec<ChannelId>) {
        let mut remote = Rtc::builder().build();
        let _ = remote.add_local_candidate(host("10.0.0.2:6000"));

        let mut change = remote.sdp_api();
        let ids = (0..channels)
            .map(|i| change.add_channel(format!("rps-{i}")))
            .collect();
        let (offer, _pending) = change.apply().unwrap();
        (offer, ids)
    }

    #[test]
    fn early_candidates_wait_for_the_offer() {
        let (mut client, _events) = client();

        client.add_remote_candidate(host("10.0.0.2:6000"));
        assert_eq!(client.early_candidates.len(), 1);
        assert!(!client.has_remote);

        let (offer, _) = remote_offer(1);
        client.accept_offer(offer).unwrap();
        assert!(client.early_candidates.is_empty());
        assert!(client.has_remote);

        client.add_remote_candidate(host("10.0.0.3:6000"));
        assert!(client.early_candidates.is_empty());
    }

    #[test]
    fn answer_is_confirmed_before_candidates_trickle() {
        let (mut client, mut events) = client();
        assert!(client.take_answer().is_none());
        assert!(client.confirm_local("v=0").is_err());

        let (offer, _) = remote_offer(1);
        client.accept_offer(offer).unwrap();
        let sdp = client.take_answer().unwrap();
        assert!(client.take_answer().is_none());

        assert!(client.confirm_local("different").is_err());
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

        client.confirm_local(&sdp).unwrap();
        match events.try_recv() {
            Ok(EngineEvent::LocalCandidate(init)) => {
                assert!(init.candidate.starts_with("candidate:"));
                assert!(init.candidate.contains("10.0.0.1 5000 typ host"));
                assert_eq!(init.sdp_m_line_index, Some(0));
            }
            other => panic!("expected a local candidate, got {other:?}"),
        }
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn only_the_first_channel_is_reported() {
        let (mut client, mut events) = client();
        let (_, ids) = remote_offer(2);

        client.handle_event(Event::ChannelOpen(ids[0], "rps".to_string()));
        match events.try_recv() {
            Ok(EngineEvent::DirectChannel(channel)) => assert_eq!(channel.label(), "rps"),
            other => panic!("expected a direct channel, got {other:?}"),
        }

        client.handle_event(Event::ChannelOpen(ids[1], "extra".to_string()));
        assert!(events.try_recv().is_err());
        assert_eq!(client.cid, Some(ids[0]));

        // Closing a channel that was never attached changes nothing.
        client.handle_event(Event::ChannelClose(ids[1]));
        assert!(events.try_recv().is_err());

        client.handle_event(Event::ChannelClose(ids[0]));
        assert!(matches!(events.try_recv(), Ok(EngineEvent::ChannelClosed)));
        assert_eq!(client.cid, None);
    }
}
