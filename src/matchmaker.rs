//! Two-at-a-time matchmaking
//!
//! Sessions are paired strictly in arrival order: the first arrival waits,
//! the second pairs with it, the third waits, and so on. All registry state
//! sits behind one lock, which is the single critical section shared by
//! every connection worker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::info;

use crate::model::session::{PeerSession, SessionId};

/// Result of [`Matchmaker::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pairing {
    /// No one was waiting; this session now is.
    Waiting,
    /// Paired with the session that was waiting.
    Paired(SessionId),
}

#[derive(Default)]
struct Registry {
    waiting: Option<Arc<PeerSession>>,
    partners: HashMap<SessionId, Arc<PeerSession>>,
}

#[derive(Default)]
pub struct Matchmaker {
    registry: Mutex<Registry>,
}

impl Matchmaker {
    pub fn new() -> Arc<Matchmaker> {
        Arc::new(Matchmaker::default())
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a newly accepted session. Called once per session, before
    /// any of its signaling is processed.
    pub fn enqueue(&self, session: Arc<PeerSession>) -> Pairing {
        let mut registry = self.lock();

        match registry.waiting.take() {
            None => {
                info!("Session({}) is waiting for a partner", session.id());
                registry.waiting = Some(session);
                Pairing::Waiting
            }
            Some(waiting) => {
                let partner = waiting.id();
                info!("Session({}) paired with Session({})", session.id(), partner);
                registry.partners.insert(session.id(), waiting);
                registry.partners.insert(partner, session);
                Pairing::Paired(partner)
            }
        }
    }

    pub fn partner_of(&self, id: SessionId) -> Option<Arc<PeerSession>> {
        self.lock().partners.get(&id).cloned()
    }

    /// Run `f` on the partner of `id` while the registry is locked, so the
    /// partner cannot be unregistered halfway through.
    pub fn with_partner<R>(&self, id: SessionId, f: impl FnOnce(&PeerSession) -> R) -> Option<R> {
        let registry = self.lock();
        registry.partners.get(&id).map(|partner| f(partner))
    }

    pub fn is_waiting(&self, id: SessionId) -> bool {
        self.lock()
            .waiting
            .as_ref()
            .is_some_and(|waiting| waiting.id() == id)
    }

    /// Forget `id`: clear the waiting slot if it holds it and drop both
    /// directions of its pairing. Returns the partner it was paired with.
    pub fn remove(&self, id: SessionId) -> Option<SessionId> {
        let mut registry = self.lock();

        if registry.waiting.as_ref().is_some_and(|w| w.id() == id) {
            registry.waiting = None;
            info!("Session({}) left while waiting", id);
        }

        let partner = registry.partners.remove(&id)?;
        registry.partners.remove(&partner.id());
        info!("Session({}) left; Session({}) is now alone", id, partner.id());

        Some(partner.id())
    }

    /// Number of registered pairs.
    pub fn pair_count(&self) -> usize {
        self.lock().partners.len() / 2
    }
}
