//! Forwarding of direct-channel traffic to the paired session.
//!
//! The relay is not a queue: a message either goes straight to the
//! partner's direct channel or is dropped. Nothing is buffered or retried,
//! and the sender never learns which happened.

use tracing::{debug, trace};

use crate::engine::ChannelMessage;
use crate::matchmaker::Matchmaker;
use crate::model::session::SessionId;

/// What happened to one relayed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forward {
    Delivered,
    NoPartner,
    /// The partner has no live direct channel (not open yet, closed, or
    /// torn down), or the send was refused.
    PartnerUnavailable,
}

/// Forward `message` from `from` to its partner's direct channel.
///
/// The registry lock is held for the lookup and the send, which keeps the
/// partner from being torn down mid-forward. `DirectChannel::send` is a
/// non-blocking handoff, so this never waits on the network.
pub fn forward(matchmaker: &Matchmaker, from: SessionId, message: &ChannelMessage) -> Forward {
    let outcome = matchmaker.with_partner(from, |partner| {
        let Some(channel) = partner.direct_channel() else {
            return Forward::PartnerUnavailable;
        };

        match channel.send(message) {
            Ok(()) => {
                trace!(
                    "Session({}) -> Session({}): {} bytes on '{}'",
                    from,
                    partner.id(),
                    message.data.len(),
                    channel.label()
                );
                Forward::Delivered
            }
            Err(e) => {
                debug!("Session({}) relay to Session({}) dropped: {}", from, partner.id(), e);
                Forward::PartnerUnavailable
            }
        }
    });

    let outcome = outcome.unwrap_or(Forward::NoPartner);
    if outcome != Forward::Delivered {
        debug!("Session({}) message dropped: {:?}", from, outcome);
    }
    outcome
}
