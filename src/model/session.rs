use std::fmt;
use std::ops::Deref;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};

use crate::engine::DirectChannel;

/// Identity of one accepted signaling connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> SessionId {
        static ID_COUNTER: AtomicU64 = AtomicU64::new(0);
        SessionId(ID_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Deref for SessionId {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

enum DirectSlot {
    Absent,
    Attached(Arc<dyn DirectChannel>),
    /// The channel closed or the session ended. Never attached again.
    TornDown,
}

/// The part of a connection that other sessions can see: its id and the
/// direct channel relay traffic is written to.
///
/// The duplex signaling channel and the engine handle are owned by the
/// signaling loop, not by this struct.
pub struct PeerSession {
    id: SessionId,
    direct: Mutex<DirectSlot>,
}

impl PeerSession {
    pub fn new() -> Arc<PeerSession> {
        Arc::new(PeerSession {
            id: SessionId::next(),
            direct: Mutex::new(DirectSlot::Absent),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Attach the direct channel. Only the first channel is accepted; a
    /// rejected channel is handed back to the caller.
    pub fn attach(
        &self,
        channel: Arc<dyn DirectChannel>,
    ) -> Result<(), Arc<dyn DirectChannel>> {
        let mut slot = self.direct.lock().unwrap_or_else(PoisonError::into_inner);
        match *slot {
            DirectSlot::Absent => {
                *slot = DirectSlot::Attached(channel);
                Ok(())
            }
            _ => Err(channel),
        }
    }

    /// The live direct channel, if one is attached and not torn down.
    pub fn direct_channel(&self) -> Option<Arc<dyn DirectChannel>> {
        match &*self.direct.lock().unwrap_or_else(PoisonError::into_inner) {
            DirectSlot::Attached(channel) => Some(channel.clone()),
            _ => None,
        }
    }

    /// Mark the direct channel as gone and return it so it can be released.
    pub fn tear_down(&self) -> Option<Arc<dyn DirectChannel>> {
        let mut slot = self.direct.lock().unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *slot, DirectSlot::TornDown) {
            DirectSlot::Attached(channel) => Some(channel),
            _ => None,
        }
    }

    pub fn is_torn_down(&self) -> bool {
        matches!(
            *self.direct.lock().unwrap_or_else(PoisonError::into_inner),
            DirectSlot::TornDown
        )
    }
}

impl fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("id", &self.id)
            .field("direct", &self.direct_channel().map(|c| c.label().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeChannel;

    #[test]
    fn ids_are_unique() {
        let a = PeerSession::new();
        let b = PeerSession::new();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn direct_channel_attaches_once() {
        let session = PeerSession::new();
        assert!(session.direct_channel().is_none());

        let (first, _) = FakeChannel::new("game");
        let (second, _) = FakeChannel::new("other");
        assert!(session.attach(first).is_ok());
        assert!(session.attach(second).is_err());
        assert_eq!(session.direct_channel().unwrap().label(), "game");
    }

    #[test]
    fn torn_down_session_has_no_channel() {
        let session = PeerSession::new();
        let (channel, _) = FakeChannel::new("game");
        session.attach(channel).unwrap();

        assert!(session.tear_down().is_some());
        assert!(session.is_torn_down());
        assert!(session.direct_channel().is_none());
        assert!(session.tear_down().is_none());

        let (late, _) = FakeChannel::new("late");
        assert!(session.attach(late).is_err());
    }
}
