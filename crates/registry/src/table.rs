use std::sync::Arc;

use objscope_primitives::ProcessIdentity;
use parking_lot::Mutex;
use rustc_hash::FxHashMap as HashMap;

use crate::session::Session;

/// Sessions keyed by process identity.
///
/// A session never serves a different run of its pid: creating the session
/// of a relaunched process evicts the stale one.
#[derive(Debug, Default)]
pub struct SessionTable {
	sessions: Mutex<HashMap<ProcessIdentity, Arc<Session>>>,
}

impl SessionTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the session of `identity`, creating it on first use.
	pub fn get_or_create(&self, identity: ProcessIdentity) -> Arc<Session> {
		let mut sessions = self.sessions.lock();
		if let Some(session) = sessions.get(&identity) {
			return Arc::clone(session);
		}
		sessions.retain(|cached, session| {
			let stale = identity.is_relaunch_of(cached);
			if stale {
				tracing::debug!(
					stale = %cached,
					live = %identity,
					generation = session.current().map(|g| g.number()),
					"evicting stale session"
				);
			}
			!stale
		});
		let session = Arc::new(Session::new(identity));
		sessions.insert(identity, Arc::clone(&session));
		tracing::debug!(%identity, "created session");
		session
	}

	pub fn get(&self, identity: ProcessIdentity) -> Option<Arc<Session>> {
		self.sessions.lock().get(&identity).cloned()
	}

	/// Removes the session of `identity`. Views already handed out stay valid.
	pub fn evict(&self, identity: ProcessIdentity) -> Option<Arc<Session>> {
		let removed = self.sessions.lock().remove(&identity);
		if removed.is_some() {
			tracing::debug!(%identity, "evicted session");
		}
		removed
	}

	pub fn len(&self) -> usize {
		self.sessions.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.sessions.lock().is_empty()
	}
}
