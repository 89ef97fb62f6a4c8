//! Demo peer
//!
//! A native stand-in for a browser player. It connects to the signaling
//! server, negotiates a data channel with the server's engine, sends its
//! move once the channel opens and prints whatever its opponent sends.

use std::net::SocketAddr;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use str0m::{
    change::{SdpAnswer, SdpPendingOffer},
    channel::ChannelId,
    net::{Protocol, Receive},
    Candidate, Event, IceConnectionState, Input, Output, Rtc,
};
use tokio::net::{TcpStream, UdpSocket};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::PeerConfig;
use crate::model::{
    description::{CandidateInit, SessionDescription},
    payload::Payload,
    signal::{Signal, SignalKind},
};
use crate::util::{candidate_line, parse_candidate, select_host_address};

const CHANNEL: &str = "rps";

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Whether the main loop keeps going.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct Peer {
    rtc: Rtc,
    cid: ChannelId,
    pending: Option<SdpPendingOffer>,
    play: String,
}

/// Main entry point for the demo peer.
///
/// 1. Binds a UDP socket on the host address and adds it as a host candidate
/// 2. Connects to the signaling server
/// 3. Creates the data channel and sends the offer plus its candidate
/// 4. Applies the server's answer and trickled candidates
/// 5. Sends its move when the channel opens, prints the opponent's
pub async fn run(config: PeerConfig) -> Result<()> {
    let host_addr = select_host_address()?;
    let socket = UdpSocket::bind(SocketAddr::new(host_addr, 0))
        .await
        .context("binding a UDP port")?;
    let local_addr = socket.local_addr()?;
    info!("Bound UDP port: {}", local_addr);

    let (ws, _) = tokio_tungstenite::connect_async(config.url.as_str())
        .await
        .with_context(|| format!("connecting to {}", config.url))?;
    let (mut ws_tx, mut ws_rx) = ws.split();
    info!("Connected to signaling server {}", config.url);

    let mut rtc = Rtc::builder().build();
    let candidate = Candidate::host(local_addr, "udp")
        .map_err(|e| anyhow!("host candidate for {}: {:?}", local_addr, e))?;
    let _ = rtc.add_local_candidate(candidate.clone());

    let mut change = rtc.sdp_api();
    let cid = change.add_channel(CHANNEL.to_string());
    let (offer, pending) = change
        .apply()
        .ok_or_else(|| anyhow!("failed to apply sdp change"))?;

    send_signal(
        &mut ws_tx,
        SignalKind::Offer,
        &SessionDescription::offer(offer.to_sdp_string()),
    )
    .await?;
    send_signal(
        &mut ws_tx,
        SignalKind::Ice,
        &CandidateInit::new(candidate_line(&candidate)),
    )
    .await?;
    info!("Sent offer, requested channel '{}' ({:?})", CHANNEL, cid);

    let mut peer = Peer {
        rtc,
        cid,
        pending: Some(pending),
        play: config.play,
    };
    let mut buf = vec![0; 2000];

    loop {
        let timeout = match peer.drain_output(&socket).await? {
            Some(timeout) => timeout,
            None => break,
        };

        tokio::select! {
            msg = ws_rx.next() => {
                let raw = match msg {
                    Some(Ok(Message::Text(text))) => text.into_bytes(),
                    Some(Ok(Message::Binary(data))) => data,
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Signaling server closed the connection");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e.into()),
                };
                peer.handle_signal(&raw)?;
            }

            recv = socket.recv_from(&mut buf) => {
                let (n, source) = recv?;
                let contents = (&buf[..n])
                    .try_into()
                    .map_err(|e| anyhow!("unparseable datagram: {:?}", e))?;
                let input = Input::Receive(
                    Instant::now(),
                    Receive {
                        proto: Protocol::Udp,
                        source,
                        destination: local_addr,
                        contents,
                    },
                );
                peer.rtc.handle_input(input)?;
            }

            _ = tokio::time::sleep_until(timeout.into()) => {
                peer.rtc.handle_input(Input::Timeout(Instant::now()))?;
            }
        }
    }

    Ok(())
}

async fn send_signal<T: serde::Serialize>(
    ws_tx: &mut WsSink,
    kind: SignalKind<'_>,
    data: &T,
) -> Result<()> {
    let text = String::from_utf8(Signal::new(kind, data)?.encode()?)?;
    ws_tx.send(Message::Text(text)).await?;
    Ok(())
}

/// Browser players send their move as plain text; native peers send a
/// `Payload`.
fn describe_opponent(data: &[u8]) -> String {
    match Payload::decode(data) {
        Ok(payload) => format!(
            "Opponent played {} (sent {}, latency {})",
            payload.data(),
            payload.timestamp(),
            payload.latency()
        ),
        Err(_) => format!("Opponent sent {}", String::from_utf8_lossy(data)),
    }
}

impl Peer {
    /// Transmit and handle events until str0m asks for a timeout. `None`
    /// once the connection is over.
    async fn drain_output(&mut self, socket: &UdpSocket) -> Result<Option<Instant>> {
        loop {
            if !self.rtc.is_alive() {
                return Ok(None);
            }

            match self.rtc.poll_output()? {
                Output::Timeout(t) => return Ok(Some(t)),
                Output::Transmit(transmit) => {
                    socket
                        .send_to(&transmit.contents, transmit.destination)
                        .await?;
                }
                Output::Event(event) => {
                    if self.handle_event(event)? == Flow::Stop {
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn handle_signal(&mut self, raw: &[u8]) -> Result<()> {
        let signal = Signal::decode(raw)?;

        match signal.kind() {
            SignalKind::Answer => {
                let desc: SessionDescription = signal.payload()?;
                let answer = SdpAnswer::from_sdp_string(&desc.sdp)
                    .map_err(|e| anyhow!("bad answer: {:?}", e))?;
                let Some(pending) = self.pending.take() else {
                    bail!("answer received twice");
                };
                self.rtc.sdp_api().accept_answer(pending, answer)?;
                info!("Answer accepted, waiting for ICE and the channel to open");
            }
            SignalKind::Ice => {
                let candidate: CandidateInit = signal.payload()?;
                if candidate.is_end_of_candidates() {
                    return Ok(());
                }
                match parse_candidate(&candidate.candidate) {
                    Ok(c) => self.rtc.add_remote_candidate(c),
                    Err(e) => warn!("Ignoring remote candidate: {}", e),
                }
            }
            other => debug!("Ignoring '{}' signal", other.as_str()),
        }
        Ok(())
    }

    fn handle_event(&mut self, event: Event) -> Result<Flow> {
        match event {
            Event::IceConnectionStateChange(state) => {
                info!("ICE Connection State: {:?}", state);
                if state == IceConnectionState::Disconnected {
                    return Ok(Flow::Stop);
                }
            }
            Event::ChannelOpen(id, label) if id == self.cid => {
                info!("Channel '{}' open, playing {}", label, self.play);
                let bytes = Payload::new(self.play.as_bytes()).encode()?;
                let mut channel = self
                    .rtc
                    .channel(id)
                    .ok_or_else(|| anyhow!("channel {:?} vanished", id))?;
                channel.write(true, &bytes)?;
            }
            Event::ChannelData(msg) => info!("{}", describe_opponent(&msg.data)),
            Event::ChannelClose(id) if id == self.cid => {
                info!("Channel closed");
                return Ok(Flow::Stop);
            }
            other => debug!("Event: {:?}", other),
        }
        Ok(Flow::Continue)
    }
}
