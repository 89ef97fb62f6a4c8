//! str0m-backed engine
//!
//! str0m is sans-IO, so every `Rtc` lives on one driver thread that owns the
//! UDP socket. Session tasks talk to it through [`DriverCommand`]s and get
//! replies on oneshot channels; the driver pushes [`EngineEvent`]s back on
//! each session's queue.
//!
//! [`EngineEvent`]: super::EngineEvent

use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::{self, Receiver, Sender},
};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use str0m::{
    change::SdpOffer,
    net::{Protocol, Receive},
    Candidate, Input,
};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::client::EngineClient;
use super::{ChannelMessage, DirectChannel, EngineFactory, EventSender, PeerEngine};
use crate::error::{ChannelError, EngineError};
use crate::model::description::{CandidateInit, SdpType, SessionDescription};
use crate::model::session::SessionId;
use crate::util::parse_candidate;

/// Upper bound on how long the driver blocks on the socket before it looks
/// at pending commands again.
const COMMAND_POLL: Duration = Duration::from_millis(20);

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

#[derive(Debug)]
pub enum DriverCommand {
    Create {
        session: SessionId,
        events: EventSender,
    },
    AcceptOffer {
        session: SessionId,
        offer: SdpOffer,
        reply: Reply<()>,
    },
    TakeAnswer {
        session: SessionId,
        reply: Reply<String>,
    },
    ConfirmLocal {
        session: SessionId,
        sdp: String,
        reply: Reply<()>,
    },
    AddCandidate {
        session: SessionId,
        candidate: Candidate,
    },
    Write {
        session: SessionId,
        message: ChannelMessage,
    },
    ForgetChannel {
        session: SessionId,
    },
    Close {
        session: SessionId,
    },
}

/// Handle to the running driver thread. Implements [`EngineFactory`].
pub struct RtcDriver {
    commands: Sender<DriverCommand>,
    local_addr: SocketAddr,
}

impl RtcDriver {
    /// Bind a UDP port on `host` and start the driver thread.
    pub fn start(host: IpAddr) -> Result<RtcDriver> {
        let socket = UdpSocket::bind(SocketAddr::new(host, 0)).context("binding a UDP port")?;
        let local_addr = socket.local_addr()?;
        let candidate = Candidate::host(local_addr, "udp")
            .map_err(|e| anyhow::anyhow!("host candidate for {}: {:?}", local_addr, e))?;
        info!("Bound UDP port: {}", local_addr);

        let (tx, rx) = mpsc::channel();
        let loopback = tx.clone();
        thread::Builder::new()
            .name("rtc-driver".to_string())
            .spawn(move || run(socket, local_addr, candidate, rx, loopback))
            .context("spawning the rtc driver thread")?;

        Ok(RtcDriver {
            commands: tx,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl EngineFactory for RtcDriver {
    async fn create(
        &self,
        session: SessionId,
        events: EventSender,
    ) -> Result<Box<dyn PeerEngine>, EngineError> {
        self.commands
            .send(DriverCommand::Create { session, events })
            .map_err(|_| EngineError::DriverGone)?;

        Ok(Box::new(RtcEngine {
            session,
            commands: self.commands.clone(),
            closed: false,
        }))
    }
}

/// A session's handle to its `Rtc` on the driver thread.
struct RtcEngine {
    session: SessionId,
    commands: Sender<DriverCommand>,
    closed: bool,
}

impl RtcEngine {
    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> DriverCommand,
    ) -> Result<T, EngineError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| EngineError::DriverGone)?;
        response.await.map_err(|_| EngineError::DriverGone)?
    }
}

#[async_trait]
impl PeerEngine for RtcEngine {
    async fn set_remote_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<(), EngineError> {
        const OP: &str = "set_remote_description";
        if desc.kind != SdpType::Offer {
            return Err(EngineError::failed(
                OP,
                format!("expected an offer, got {:?}", desc.kind),
            ));
        }
        let offer =
            SdpOffer::from_sdp_string(&desc.sdp).map_err(|e| EngineError::failed(OP, e))?;

        let session = self.session;
        self.request(|reply| DriverCommand::AcceptOffer {
            session,
            offer,
            reply,
        })
        .await
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, EngineError> {
        let session = self.session;
        let sdp = self
            .request(|reply| DriverCommand::TakeAnswer { session, reply })
            .await?;
        Ok(SessionDescription::answer(sdp))
    }

    async fn set_local_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<(), EngineError> {
        let session = self.session;
        self.request(|reply| DriverCommand::ConfirmLocal {
            session,
            sdp: desc.sdp,
            reply,
        })
        .await
    }

    async fn add_remote_candidate(&mut self, candidate: CandidateInit) -> Result<(), EngineError> {
        if candidate.is_end_of_candidates() {
            return Ok(());
        }
        let candidate = parse_candidate(&candidate.candidate)
            .map_err(|e| EngineError::failed("add_remote_candidate", e))?;

        self.commands
            .send(DriverCommand::AddCandidate {
                session: self.session,
                candidate,
            })
            .map_err(|_| EngineError::DriverGone)
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.commands.send(DriverCommand::Close {
                session: self.session,
            });
        }
    }
}

impl Drop for RtcEngine {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.commands.send(DriverCommand::Close {
                session: self.session,
            });
        }
    }
}

/// The data channel of one `Rtc`, as seen by the relay.
#[derive(Debug)]
pub struct RtcChannel {
    session: SessionId,
    label: String,
    commands: Sender<DriverCommand>,
    closed: AtomicBool,
}

impl RtcChannel {
    pub fn new(session: SessionId, label: String, commands: Sender<DriverCommand>) -> RtcChannel {
        RtcChannel {
            session,
            label,
            commands,
            closed: AtomicBool::new(false),
        }
    }
}

impl DirectChannel for RtcChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn send(&self, message: &ChannelMessage) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelError::Closed(self.label.clone()));
        }
        self.commands
            .send(DriverCommand::Write {
                session: self.session,
                message: message.clone(),
            })
            .map_err(|_| ChannelError::Closed(self.label.clone()))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.commands.send(DriverCommand::ForgetChannel {
                session: self.session,
            });
        }
    }
}

fn run(
    socket: UdpSocket,
    local_addr: SocketAddr,
    host: Candidate,
    rx: Receiver<DriverCommand>,
    loopback: Sender<DriverCommand>,
) {
    let mut clients: Vec<EngineClient> = vec![];
    let mut buf = vec![0; 2000];

    loop {
        // Drop peer connections that died on their own and tell their sessions.
        clients.retain(|c| {
            if !c.rtc.is_alive() {
                info!("Engine({}) is no longer alive", *c.id);
                c.notify_closed();
            }
            c.rtc.is_alive()
        });

        // `loopback` keeps the command channel open, so the driver runs for
        // the life of the process.
        while let Ok(command) = rx.try_recv() {
            handle_command(command, &mut clients, &host, &loopback);
        }

        // Poll clients until they return timeout
        let mut timeout = Instant::now() + COMMAND_POLL;
        for client in clients.iter_mut() {
            let t = client.poll_until_timeout(&socket);
            timeout = timeout.min(t);
        }

        // The read timeout is not allowed to be 0.
        let duration = timeout
            .saturating_duration_since(Instant::now())
            .max(Duration::from_millis(1));

        if let Err(e) = socket.set_read_timeout(Some(duration)) {
            warn!("Setting socket read timeout failed: {}", e);
        }

        if let Some(input) = read_socket_input(&socket, local_addr, &mut buf) {
            // The rtc.accepts() call is how we demultiplex the incoming packet to know which
            // Rtc instance the traffic belongs to.
            if let Some(client) = clients.iter_mut().find(|c| c.accepts(&input)) {
                client.handle_input(input);
            } else {
                // Common before the offer reaches the driver.
                debug!("No engine accepts UDP input: {:?}", input);
            }
        }

        // Drive time forward in all clients.
        let now = Instant::now();
        for client in &mut clients {
            client.handle_input(Input::Timeout(now));
        }
    }
}

fn handle_command(
    command: DriverCommand,
    clients: &mut Vec<EngineClient>,
    host: &Candidate,
    loopback: &Sender<DriverCommand>,
) {
    match command {
        DriverCommand::Create { session, events } => {
            debug!("Engine({}) created", *session);
            clients.push(EngineClient::new(
                session,
                host.clone(),
                events,
                loopback.clone(),
            ));
        }
        DriverCommand::AcceptOffer {
            session,
            offer,
            reply,
        } => {
            let result = match position(clients, session) {
                Some(i) => clients[i]
                    .accept_offer(offer)
                    .map_err(|e| EngineError::failed("set_remote_description", format!("{e:?}"))),
                None => Err(EngineError::DriverGone),
            };
            let _ = reply.send(result);
        }
        DriverCommand::TakeAnswer { session, reply } => {
            let result = match position(clients, session) {
                Some(i) => clients[i]
                    .take_answer()
                    .ok_or_else(|| EngineError::failed("create_answer", "no remote offer applied")),
                None => Err(EngineError::DriverGone),
            };
            let _ = reply.send(result);
        }
        DriverCommand::ConfirmLocal {
            session,
            sdp,
            reply,
        } => {
            let result = match position(clients, session) {
                Some(i) => clients[i]
                    .confirm_local(&sdp)
                    .map_err(|e| EngineError::failed("set_local_description", e)),
                None => Err(EngineError::DriverGone),
            };
            let _ = reply.send(result);
        }
        DriverCommand::AddCandidate { session, candidate } => {
            if let Some(i) = position(clients, session) {
                clients[i].add_remote_candidate(candidate);
            }
        }
        DriverCommand::Write { session, message } => {
            if let Some(i) = position(clients, session) {
                clients[i].write(&message);
            }
        }
        DriverCommand::ForgetChannel { session } => {
            if let Some(i) = position(clients, session) {
                clients[i].forget_channel();
            }
        }
        DriverCommand::Close { session } => {
            if let Some(i) = position(clients, session) {
                let mut client = clients.swap_remove(i);
                client.rtc.disconnect();
                debug!("Engine({}) closed", *session);
            }
        }
    }
}

fn position(clients: &[EngineClient], id: SessionId) -> Option<usize> {
    clients.iter().position(|c| c.id == id)
}

fn read_socket_input<'a>(
    socket: &UdpSocket,
    local_addr: SocketAddr,
    buf: &'a mut Vec<u8>,
) -> Option<Input<'a>> {
    buf.resize(2000, 0);

    match socket.recv_from(buf) {
        Ok((n, source)) => {
            buf.truncate(n);

            // Parse data to a DatagramRecv, which help preparse network data to
            // figure out the multiplexing of all protocols on one UDP port.
            let Ok(contents) = buf.as_slice().try_into() else {
                return None;
            };

            Some(Input::Receive(
                Instant::now(),
                Receive {
                    proto: Protocol::Udp,
                    source,
                    destination: local_addr,
                    contents,
                },
            ))
        }

        Err(e) => match e.kind() {
            // Expected error for set_read_timeout(). One for windows, one for the rest.
            ErrorKind::WouldBlock | ErrorKind::TimedOut => None,
            _ => {
                warn!("UdpSocket read failed: {:?}", e);
                None
            }
        },
    }
}
