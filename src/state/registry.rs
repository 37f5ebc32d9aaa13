use indexmap::{IndexMap, IndexSet};
use tracing::{debug, warn};

use crate::{
    error::BetError,
    state::{
        matching::{match_contestant, normalize},
        session::{Provenance, Session, SessionId, TimerConfig},
    },
};

/// Owns every session and the lookups used to target them.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: IndexMap<SessionId, Session>,
    active: IndexSet<SessionId>,
    /// Normalized name to (session, key), in session opening order.
    contestant_index: IndexMap<String, (SessionId, String)>,
    legacy_session: Option<SessionId>,
    next_id: SessionId,
}

impl SessionRegistry {
    /// Empty registry whose first session gets id 1.
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// Rebuild a registry from persisted sessions.
    pub fn restore(
        sessions: impl IntoIterator<Item = Session>,
        next_id: SessionId,
        legacy_session: Option<SessionId>,
    ) -> Self {
        let sessions: IndexMap<SessionId, Session> = sessions
            .into_iter()
            .map(|session| (session.id(), session))
            .collect();
        let floor = sessions.keys().max().map_or(1, |max| max + 1);
        let mut registry = Self {
            sessions,
            next_id: next_id.max(floor),
            legacy_session,
            ..Self::default()
        };
        registry.rebuild_index();
        if let Some(id) = registry.legacy_session {
            if !registry.active.contains(&id) {
                debug!(session_id = id, "legacy session already closed, leaving compatibility mode");
                registry.legacy_session = None;
            }
        }
        registry
    }

    /// Open a session between two contestants whose names are unused by any active session.
    pub fn open_session(
        &mut self,
        names: [String; 2],
        title: Option<String>,
        provenance: Provenance,
        timer: Option<TimerConfig>,
    ) -> Result<SessionId, BetError> {
        let names = names.map(|name| name.trim().to_string());
        if names.iter().any(String::is_empty) {
            return Err(BetError::InvalidContestants {
                reason: "contestant names cannot be empty".into(),
            });
        }
        if normalize(&names[0]) == normalize(&names[1]) {
            return Err(BetError::InvalidContestants {
                reason: "contestants must have different names".into(),
            });
        }
        for name in &names {
            if let Some((session_id, _)) = self.contestant_index.get(&normalize(name)) {
                return Err(BetError::DuplicateContestant {
                    name: name.clone(),
                    session_id: *session_id,
                });
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        let title = title
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty());
        let session = Session::new(id, names, title, provenance, timer);
        self.index_session(&session);
        self.active.insert(id);
        self.sessions.insert(id, session);
        Ok(id)
    }

    /// Find the active session that has a contestant matching `name`, with its contestant key.
    pub fn find_session_for_contestant(
        &self,
        name: &str,
    ) -> Result<(SessionId, String), BetError> {
        let candidates = self
            .contestant_index
            .values()
            .filter_map(|(session_id, key)| {
                let display = self.sessions.get(session_id)?.contestant_name(key)?;
                Some(((*session_id, key.clone()), display))
            });

        match match_contestant(name, candidates) {
            Err(BetError::UnknownContestant { .. }) => Err(BetError::SessionNotFound {
                reference: name.to_string(),
            }),
            other => other,
        }
    }

    /// Resolve an optional session id to the session it designates.
    ///
    /// Without an id, legacy compatibility mode targets the migrated session; otherwise the
    /// single active session is used.
    pub fn resolve(&self, session_id: Option<SessionId>) -> Result<SessionId, BetError> {
        if let Some(id) = session_id {
            return if self.sessions.contains_key(&id) {
                Ok(id)
            } else {
                Err(BetError::SessionNotFound {
                    reference: id.to_string(),
                })
            };
        }

        if let Some(id) = self.legacy_session {
            return Ok(id);
        }

        match self.active.len() {
            0 => Err(BetError::NoActiveSession),
            1 => Ok(self.active[0]),
            _ => Err(BetError::AmbiguousSession {
                active: self.active.iter().copied().collect(),
            }),
        }
    }

    /// Drop a session from the active set and the name index; it stays readable.
    pub fn close(&mut self, session_id: SessionId) {
        if !self.active.shift_remove(&session_id) {
            warn!(session_id, "closing a session that is not active");
        }
        self.contestant_index
            .retain(|_, (indexed, _)| *indexed != session_id);
        if self.legacy_session == Some(session_id) {
            self.legacy_session = None;
        }
    }

    /// Recompute the active set and the name index from session statuses.
    pub fn rebuild_index(&mut self) {
        self.active.clear();
        self.contestant_index.clear();
        let active: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|session| session.status().is_active())
            .map(Session::id)
            .collect();
        for id in active {
            if let Some(session) = self.sessions.get(&id).cloned() {
                self.index_session(&session);
            }
            self.active.insert(id);
        }
    }

    /// Mark `session_id` as the implicit target of calls that omit a session.
    pub fn enter_legacy_mode(&mut self, session_id: SessionId) {
        self.legacy_session = Some(session_id);
    }

    /// Session targeted implicitly in compatibility mode.
    pub fn legacy_session(&self) -> Option<SessionId> {
        self.legacy_session
    }

    /// Id the next opened session receives.
    pub fn next_id(&self) -> SessionId {
        self.next_id
    }

    /// Session by id, active or historical.
    pub fn session(&self, session_id: SessionId) -> Option<&Session> {
        self.sessions.get(&session_id)
    }

    /// Mutable session by id.
    pub fn session_mut(&mut self, session_id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&session_id)
    }

    /// Every session ever opened, oldest first.
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub(crate) fn sessions_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.values_mut()
    }

    /// Ids of the open and locked sessions.
    pub fn active_ids(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.active.iter().copied()
    }

    /// Whether the session is open or locked.
    pub fn is_active(&self, session_id: SessionId) -> bool {
        self.active.contains(&session_id)
    }

    fn index_session(&mut self, session: &Session) {
        for (key, name) in session.contestants() {
            let normalized = normalize(name);
            let taken = self
                .contestant_index
                .get(&normalized)
                .map(|(other, _)| *other)
                .filter(|other| *other != session.id());
            if let Some(other) = taken {
                warn!(
                    session_id = session.id(),
                    other_session = other,
                    name = %name,
                    "contestant name indexed twice, keeping the first session"
                );
                continue;
            }
            self.contestant_index
                .insert(normalized, (session.id(), key.clone()));
        }
    }
}
