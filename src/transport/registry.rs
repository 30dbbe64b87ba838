//! Session registry and room index.
//!
//! Holds every live [`Session`] keyed by [`SessionId`], plus named rooms that
//! reference sessions by id only. A session is in a room only while it is
//! registered; [`Registry::unregister`] strips it from every room.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │                 Registry                 │
//! │  sessions: SessionId → Arc<Session>      │
//! │  rooms:    "lobby"   → {id1, id2}        │
//! │            "arena"   → {id2}             │
//! └──────────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::protocol::Message;

use super::session::Session;

// ============================================================================
// Registry
// ============================================================================

/// Process-wide table of live sessions and room memberships.
///
/// Thread-safe; shared as `Arc<Registry>` by the acceptor, every worker, the
/// prober and application code. Rooms are created on first join and persist
/// while empty.
#[derive(Debug, Default)]
pub struct Registry {
    /// Live sessions by id.
    sessions: DashMap<SessionId, Arc<Session>>,
    /// Room name to member ids.
    rooms: DashMap<String, DashSet<SessionId>>,
}

// ============================================================================
// Registry - Sessions
// ============================================================================

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adds a session.
    pub fn register(&self, session: Arc<Session>) {
        let id = session.id();
        self.sessions.insert(id, session);
        debug!(session_id = %id, "Session registered");
    }

    /// Removes a session and strips it from every room.
    ///
    /// Returns the removed session, or `None` if it was not registered.
    pub fn unregister(&self, id: SessionId) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(&id).map(|(_, session)| session);

        for room in self.rooms.iter() {
            room.value().remove(&id);
        }

        if removed.is_some() {
            debug!(session_id = %id, "Session unregistered");
        }
        removed
    }

    /// Returns the session with `id`.
    #[must_use]
    pub fn get_session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns `true` if `id` is registered.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Returns a snapshot of all registered sessions.
    #[must_use]
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Returns the number of registered sessions.
    #[inline]
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

// ============================================================================
// Registry - Rooms
// ============================================================================

impl Registry {
    /// Adds session `id` to `room`, creating the room on first use.
    ///
    /// Returns `false` if the session is not registered.
    pub fn join(&self, id: SessionId, room: &str) -> bool {
        if !self.contains(id) {
            return false;
        }

        self.rooms.entry(room.to_string()).or_default().insert(id);

        // Lost a race with unregister: undo so members stay registered.
        if !self.contains(id) {
            if let Some(members) = self.rooms.get(room) {
                members.remove(&id);
            }
            return false;
        }

        debug!(session_id = %id, room, "Joined room");
        true
    }

    /// Removes session `id` from `room`.
    ///
    /// Returns `true` if it was a member.
    pub fn leave(&self, id: SessionId, room: &str) -> bool {
        let removed = self
            .rooms
            .get(room)
            .is_some_and(|members| members.remove(&id).is_some());

        if removed {
            debug!(session_id = %id, room, "Left room");
        }
        removed
    }

    /// Returns a snapshot of the sessions in `room`.
    #[must_use]
    pub fn room_sessions(&self, room: &str) -> Vec<Arc<Session>> {
        let Some(members) = self.rooms.get(room) else {
            return Vec::new();
        };
        let ids: Vec<SessionId> = members.iter().map(|id| *id).collect();
        drop(members);

        ids.into_iter()
            .filter_map(|id| self.get_session(id))
            .collect()
    }

    /// Returns the number of members in `room`.
    #[must_use]
    pub fn room_member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, |members| members.len())
    }

    /// Returns the number of rooms, including empty ones.
    #[inline]
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Returns the names of all rooms.
    #[must_use]
    pub fn room_names(&self) -> Vec<String> {
        self.rooms.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Returns the rooms session `id` belongs to.
    #[must_use]
    pub fn rooms_of(&self, id: SessionId) -> Vec<String> {
        self.rooms
            .iter()
            .filter(|entry| entry.value().contains(&id))
            .map(|entry| entry.key().clone())
            .collect()
    }
}

// ============================================================================
// Registry - Broadcast
// ============================================================================

impl Registry {
    /// Sends `message` to the single session `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] if `id` is not registered, or the
    /// write error if delivery fails.
    pub async fn send_to(&self, id: SessionId, message: &Message) -> Result<()> {
        let session = self
            .get_session(id)
            .ok_or_else(|| Error::session_not_found(id))?;
        session.send(message).await
    }

    /// Sends `message` to every registered session.
    ///
    /// Returns the number of sessions it was delivered to. A failure on one
    /// session does not stop delivery to the others.
    pub async fn broadcast(&self, message: &Message) -> usize {
        deliver(self.sessions(), message).await
    }

    /// Sends `message` to every member of `room`.
    ///
    /// Returns the number of members it was delivered to.
    pub async fn broadcast_to_room(&self, room: &str, message: &Message) -> usize {
        deliver(self.room_sessions(room), message).await
    }

    /// Sends `message` to every member of `room` except `excluded`.
    pub async fn broadcast_to_room_except(
        &self,
        room: &str,
        message: &Message,
        excluded: SessionId,
    ) -> usize {
        let targets = self
            .room_sessions(room)
            .into_iter()
            .filter(|session| session.id() != excluded)
            .collect();
        deliver(targets, message).await
    }
}

// ============================================================================
// Registry - Lifecycle
// ============================================================================

impl Registry {
    /// Closes every session and clears sessions and rooms.
    pub async fn close_all(&self) {
        let sessions = self.sessions();
        self.sessions.clear();
        self.rooms.clear();

        let count = sessions.len();
        join_all(sessions.iter().map(|session| session.close())).await;

        info!(count, "All sessions closed");
    }
}

/// Sends to each target concurrently, isolating failures.
async fn deliver(targets: Vec<Arc<Session>>, message: &Message) -> usize {
    let results = join_all(targets.iter().map(|session| async move {
        (session.id(), session.send(message).await)
    }))
    .await;

    let mut delivered = 0;
    for (session_id, result) in results {
        match result {
            Ok(()) => delivered += 1,
            Err(e) => warn!(session_id = %session_id, error = %e, "Broadcast delivery failed"),
        }
    }
    delivered
}

// ============================================================================
// Tests
// ============================================================================
