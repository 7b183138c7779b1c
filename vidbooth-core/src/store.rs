//! In-memory session store — the single source of truth for session state.
//!
//! All reads return snapshots; callers never hold a reference into the map.
//! `update` re-checks existence under the write lock, so a session reaped
//! while a stop-recording request was suspended on IO surfaces as `None`
//! instead of being resurrected.
//!
//! Nothing here persists: a process restart clears every session, which is
//! the documented contract (only the video files on disk survive).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::models::session::RecordingSession;

/// Cheap-to-clone handle over the process-wide session map.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<Uuid, RecordingSession>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh session in `Recording` state and return a snapshot.
    pub fn create(&self) -> RecordingSession {
        let session = RecordingSession::new();
        self.inner.write().insert(session.id, session.clone());
        session
    }

    /// Snapshot of a session, or `None` if unknown.
    pub fn get(&self, id: Uuid) -> Option<RecordingSession> {
        self.inner.read().get(&id).cloned()
    }

    /// Apply `mutate` to the session if it still exists, returning the
    /// post-mutation snapshot. The existence check and the mutation happen
    /// under one write lock acquisition.
    pub fn update<F>(&self, id: Uuid, mutate: F) -> Option<RecordingSession>
    where
        F: FnOnce(&mut RecordingSession),
    {
        let mut map = self.inner.write();
        let session = map.get_mut(&id)?;
        mutate(session);
        Some(session.clone())
    }

    /// Remove a session, returning the final snapshot if it existed.
    pub fn remove(&self, id: Uuid) -> Option<RecordingSession> {
        self.inner.write().remove(&id)
    }

    /// Snapshots of every session whose `start_time` is before `cutoff`.
    /// The reaper sweeps over this set and re-checks each id on removal.
    pub fn sessions_older_than(&self, cutoff: DateTime<Utc>) -> Vec<RecordingSession> {
        self.inner
            .read()
            .values()
            .filter(|s| s.start_time < cutoff)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
