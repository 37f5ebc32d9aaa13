use crate::{
    dao::models::{FORMAT_VERSION, SnapshotDocument, TimerOverrides},
    error::BetError,
    state::{
        ledger::Ledger,
        registry::SessionRegistry,
        session::{
            Bet, BetReceipt, BetRequest, BetSource, Provenance, Refund, RefundReport, Resolution,
            Session, SessionId, TimerConfig,
        },
        state_machine::SessionStatus,
    },
};

/// How a caller designates a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRef {
    /// Explicit session id.
    Id(SessionId),
    /// Any contestant name of the session, matched fuzzily.
    Contestant(String),
}

impl SessionRef {
    /// Numeric input is an id, anything else a contestant name.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.parse::<SessionId>() {
            Ok(id) => SessionRef::Id(id),
            Err(_) => SessionRef::Contestant(raw.to_string()),
        }
    }
}

impl From<SessionId> for SessionRef {
    fn from(id: SessionId) -> Self {
        SessionRef::Id(id)
    }
}

/// What changed since the previous commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Revision to persist.
    pub revision: u64,
    /// Sessions touched by the committed operations.
    pub sessions: Vec<SessionId>,
    /// Whether any balance changed.
    pub balances_changed: bool,
    /// Whether the timer overrides changed.
    pub settings_changed: bool,
}

/// The whole betting engine: balances plus sessions.
///
/// Only ever mutated by one writer at a time; see `AppState::mutate`.
#[derive(Debug, Clone)]
pub struct BettingBook {
    /// Balances of every user.
    pub ledger: Ledger,
    /// Every session, open or historical.
    pub registry: SessionRegistry,
    timer_overrides: TimerOverrides,
    settings_changed: bool,
    revision: u64,
}

impl BettingBook {
    /// Engine with no users and no sessions.
    pub fn new(starting_balance: u64) -> Self {
        Self {
            ledger: Ledger::new(starting_balance),
            registry: SessionRegistry::new(),
            timer_overrides: TimerOverrides::default(),
            settings_changed: false,
            revision: 0,
        }
    }

    /// Rebuild the engine from a persisted snapshot.
    pub fn from_snapshot(starting_balance: u64, snapshot: SnapshotDocument) -> Self {
        Self {
            ledger: Ledger::from_balances(starting_balance, snapshot.balances),
            registry: SessionRegistry::restore(
                snapshot.sessions.into_values(),
                snapshot.next_session_id,
                snapshot.legacy_session,
            ),
            timer_overrides: snapshot.timer_overrides,
            settings_changed: false,
            revision: snapshot.revision,
        }
    }

    /// Snapshot of the current state at the current revision.
    pub fn to_snapshot(&self) -> SnapshotDocument {
        SnapshotDocument {
            format_version: FORMAT_VERSION,
            revision: self.revision,
            next_session_id: self.registry.next_id(),
            legacy_session: self.registry.legacy_session(),
            balances: self.ledger.balances().clone(),
            sessions: self
                .registry
                .sessions()
                .map(|session| (session.id(), session.clone()))
                .collect(),
            timer_overrides: self.timer_overrides,
        }
    }

    /// Revision of the last commit.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Operator changes to the configured timer defaults.
    pub fn timer_overrides(&self) -> TimerOverrides {
        self.timer_overrides
    }

    /// Replace the timer overrides. Returns `false` when nothing changed.
    pub fn set_timer_overrides(&mut self, overrides: TimerOverrides) -> bool {
        if self.timer_overrides == overrides {
            return false;
        }
        self.timer_overrides = overrides;
        self.settings_changed = true;
        true
    }

    /// Session by id, active or historical.
    pub fn session(&self, session_id: SessionId) -> Option<&Session> {
        self.registry.session(session_id)
    }

    /// Resolve a session reference; `None` follows the registry's implicit-target rules.
    pub fn resolve(&self, session: Option<&SessionRef>) -> Result<SessionId, BetError> {
        match session {
            Some(SessionRef::Id(id)) => self.registry.resolve(Some(*id)),
            Some(SessionRef::Contestant(name)) => self
                .registry
                .find_session_for_contestant(name)
                .map(|(id, _)| id),
            None => self.registry.resolve(None),
        }
    }

    /// Resolve the session and contestant key a bet targets.
    ///
    /// When no session is given and several are active, the contestant name picks the session.
    pub fn resolve_bet_target(
        &self,
        session: Option<&SessionRef>,
        contestant: &str,
    ) -> Result<(SessionId, String), BetError> {
        let session_id = match self.resolve(session) {
            Ok(id) => id,
            Err(BetError::AmbiguousSession { .. }) if session.is_none() => {
                return self.registry.find_session_for_contestant(contestant);
            }
            Err(err) => return Err(err),
        };
        let key = self.existing(session_id)?.match_contestant(contestant)?;
        Ok((session_id, key))
    }

    /// Open a new session.
    pub fn open_session(
        &mut self,
        names: [String; 2],
        title: Option<String>,
        provenance: Provenance,
        timer: Option<TimerConfig>,
    ) -> Result<SessionId, BetError> {
        self.registry.open_session(names, title, provenance, timer)
    }

    /// Place or replace a bet, resolving the session and contestant from free text.
    pub fn place_bet(
        &mut self,
        session: Option<SessionRef>,
        user_id: &str,
        contestant: &str,
        amount: i64,
        source: BetSource,
        reaction_token: Option<String>,
    ) -> Result<BetReceipt, BetError> {
        let (session_id, contestant_key) = self.resolve_bet_target(session.as_ref(), contestant)?;
        self.place_resolved(
            session_id,
            BetRequest {
                user_id: user_id.to_string(),
                contestant_key,
                amount,
                source,
                reaction_token,
            },
        )
    }

    /// Stake the whole available balance, counting a bet this session would refund.
    pub fn bet_all(
        &mut self,
        session: Option<SessionRef>,
        user_id: &str,
        contestant: &str,
    ) -> Result<BetReceipt, BetError> {
        let (session_id, contestant_key) = self.resolve_bet_target(session.as_ref(), contestant)?;
        let session = self.existing(session_id)?;
        let refundable = match session.status() {
            SessionStatus::Open => session.bet_of(user_id).map_or(0, |bet| bet.amount),
            _ => 0,
        };
        let available = self
            .ledger
            .get_balance(user_id)
            .saturating_add(refundable);
        self.place_resolved(
            session_id,
            BetRequest {
                user_id: user_id.to_string(),
                contestant_key,
                amount: i64::try_from(available).unwrap_or(i64::MAX),
                source: BetSource::Manual,
                reaction_token: None,
            },
        )
    }

    /// Place a bet whose session and contestant key are already known.
    pub fn place_resolved(
        &mut self,
        session_id: SessionId,
        request: BetRequest,
    ) -> Result<BetReceipt, BetError> {
        let Self {
            ledger, registry, ..
        } = self;
        let session = registry
            .session_mut(session_id)
            .ok_or_else(|| not_found(session_id))?;
        session.place_bet(ledger, request)
    }

    /// Refund and remove a user's bet.
    pub fn cancel_bet(
        &mut self,
        session: Option<SessionRef>,
        user_id: &str,
    ) -> Result<(SessionId, Refund), BetError> {
        let session_id = self.resolve(session.as_ref())?;
        let refund = self.cancel_resolved(session_id, user_id)?;
        Ok((session_id, refund))
    }

    /// Cancel the bet of `user_id` in an already resolved session id.
    pub fn cancel_resolved(
        &mut self,
        session_id: SessionId,
        user_id: &str,
    ) -> Result<Refund, BetError> {
        let Self {
            ledger, registry, ..
        } = self;
        registry
            .session_mut(session_id)
            .ok_or_else(|| not_found(session_id))?
            .cancel_bet(ledger, user_id)
    }

    /// Lock betting. Returns the session id and whether the status changed.
    pub fn lock(&mut self, session: Option<SessionRef>) -> Result<(SessionId, bool), BetError> {
        let session_id = self.resolve(session.as_ref())?;
        let changed = self.lock_resolved(session_id)?;
        Ok((session_id, changed))
    }

    /// Lock an already resolved session id.
    pub fn lock_resolved(&mut self, session_id: SessionId) -> Result<bool, BetError> {
        self.registry
            .session_mut(session_id)
            .ok_or_else(|| not_found(session_id))?
            .lock()
    }

    /// Declare the winner of a locked session and settle its pot.
    pub fn declare_winner(
        &mut self,
        session: Option<SessionRef>,
        contestant: &str,
        closed_by: Option<String>,
    ) -> Result<Resolution, BetError> {
        let session_id = self.resolve(session.as_ref())?;
        let winner_key = self.existing(session_id)?.match_contestant(contestant)?;
        self.declare_resolved(session_id, &winner_key, closed_by)
    }

    /// Lock (if needed) and declare the winner in one step.
    pub fn close_with_winner(
        &mut self,
        session: Option<SessionRef>,
        contestant: &str,
        closed_by: Option<String>,
    ) -> Result<(bool, Resolution), BetError> {
        let session_id = self.resolve(session.as_ref())?;
        let winner_key = self.existing(session_id)?.match_contestant(contestant)?;
        let locked = self.lock_resolved(session_id)?;
        let resolution = self.declare_resolved(session_id, &winner_key, closed_by)?;
        Ok((locked, resolution))
    }

    fn declare_resolved(
        &mut self,
        session_id: SessionId,
        winner_key: &str,
        closed_by: Option<String>,
    ) -> Result<Resolution, BetError> {
        let Self {
            ledger, registry, ..
        } = self;
        let resolution = registry
            .session_mut(session_id)
            .ok_or_else(|| not_found(session_id))?
            .declare_winner(ledger, winner_key, closed_by)?;
        registry.close(session_id);
        Ok(resolution)
    }

    /// Refund every bet and expire the session.
    pub fn force_close(
        &mut self,
        session: Option<SessionRef>,
        closed_by: Option<String>,
    ) -> Result<RefundReport, BetError> {
        let session_id = self.resolve(session.as_ref())?;
        self.force_close_resolved(session_id, closed_by)
    }

    /// Force-close an already resolved session id.
    pub fn force_close_resolved(
        &mut self,
        session_id: SessionId,
        closed_by: Option<String>,
    ) -> Result<RefundReport, BetError> {
        let Self {
            ledger, registry, ..
        } = self;
        let report = registry
            .session_mut(session_id)
            .ok_or_else(|| not_found(session_id))?
            .force_close(ledger, closed_by)?;
        registry.close(session_id);
        Ok(report)
    }

    /// Expire a session only while it is still locked (timer close deadline).
    pub fn expire_if_locked(
        &mut self,
        session_id: SessionId,
    ) -> Result<Option<RefundReport>, BetError> {
        match self.existing(session_id)?.status() {
            SessionStatus::Locked => self
                .force_close_resolved(session_id, Some("timer".into()))
                .map(Some),
            _ => Ok(None),
        }
    }

    /// Every active bet of `user_id`, by session.
    pub fn user_bets(&self, user_id: &str) -> Vec<(SessionId, &Bet)> {
        self.registry
            .active_ids()
            .filter_map(|id| {
                self.registry
                    .session(id)
                    .and_then(|session| session.bet_of(user_id))
                    .map(|bet| (id, bet))
            })
            .collect()
    }

    /// Collect dirty markers and bump the revision when anything changed.
    pub fn commit(&mut self) -> Option<Commit> {
        let sessions: Vec<SessionId> = self
            .registry
            .sessions_mut()
            .filter_map(|session| session.take_dirty().then(|| session.id()))
            .collect();
        let balances_changed = self.ledger.take_changed();
        let settings_changed = std::mem::take(&mut self.settings_changed);
        if sessions.is_empty() && !balances_changed && !settings_changed {
            return None;
        }
        self.revision += 1;
        Some(Commit {
            revision: self.revision,
            sessions,
            balances_changed,
            settings_changed,
        })
    }

    fn existing(&self, session_id: SessionId) -> Result<&Session, BetError> {
        self.registry
            .session(session_id)
            .ok_or_else(|| not_found(session_id))
    }
}

fn not_found(session_id: SessionId) -> BetError {
    BetError::SessionNotFound {
        reference: session_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book_with(names: &[(&str, &str)]) -> (BettingBook, Vec<SessionId>) {
        let mut book = BettingBook::new(1_000);
        let ids = names
            .iter()
            .map(|(a, b)| {
                book.open_session(
                    [a.to_string(), b.to_string()],
                    None,
                    Provenance::default(),
                    None,
                )
                .unwrap()
            })
            .collect();
        (book, ids)
    }

    #[test]
    fn session_ref_parsing() {
        assert_eq!(SessionRef::parse(" 12 "), SessionRef::Id(12));
        assert_eq!(
            SessionRef::parse("Alice"),
            SessionRef::Contestant("Alice".into())
        );
    }

    #[test]
    fn bet_auto_detects_session_from_contestant() {
        let (mut book, ids) = book_with(&[("Alice", "Bob"), ("Carol", "Dave")]);
        let receipt = book
            .place_bet(None, "u1", "car", 50, BetSource::Manual, None)
            .unwrap();
        assert_eq!(receipt.session_id, ids[1]);
        assert_eq!(receipt.bet.contestant_key, "c1");
    }

    #[test]
    fn explicit_session_rejects_foreign_contestant() {
        let (mut book, ids) = book_with(&[("Alice", "Bob"), ("Carol", "Dave")]);
        let err = book
            .place_bet(
                Some(ids[0].into()),
                "u1",
                "Carol",
                50,
                BetSource::Manual,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, BetError::UnknownContestant { .. }));
    }

    #[test]
    fn cancel_needs_session_when_ambiguous() {
        let (mut book, _) = book_with(&[("Alice", "Bob"), ("Carol", "Dave")]);
        let err = book.cancel_bet(None, "u1").unwrap_err();
        assert!(matches!(err, BetError::AmbiguousSession { .. }));
    }

    #[test]
    fn bet_all_counts_refundable_stake() {
        let (mut book, _) = book_with(&[("Alice", "Bob")]);
        book.place_bet(None, "u1", "alice", 300, BetSource::Manual, None)
            .unwrap();
        let receipt = book.bet_all(None, "u1", "bob").unwrap();
        assert_eq!(receipt.bet.amount, 1_000);
        assert_eq!(receipt.balance_after, 0);
    }

    #[test]
    fn close_with_winner_locks_then_settles() {
        let (mut book, ids) = book_with(&[("Alice", "Bob")]);
        book.place_bet(None, "u1", "alice", 100, BetSource::Manual, None)
            .unwrap();
        let (locked, resolution) = book.close_with_winner(None, "Alice", None).unwrap();
        assert!(locked);
        assert!(matches!(resolution, Resolution::Settled(_)));
        assert!(!book.registry.is_active(ids[0]));
        assert_eq!(book.ledger.get_balance("u1"), 1_000);
    }

    #[test]
    fn close_with_unknown_winner_does_not_lock() {
        let (mut book, ids) = book_with(&[("Alice", "Bob")]);
        assert!(book.close_with_winner(None, "Zed", None).is_err());
        assert_eq!(
            book.session(ids[0]).unwrap().status(),
            SessionStatus::Open
        );
    }

    #[test]
    fn expire_only_touches_locked_sessions() {
        let (mut book, ids) = book_with(&[("Alice", "Bob")]);
        assert_eq!(book.expire_if_locked(ids[0]).unwrap(), None);
        book.lock_resolved(ids[0]).unwrap();
        assert!(book.expire_if_locked(ids[0]).unwrap().is_some());
        assert_eq!(
            book.session(ids[0]).unwrap().status(),
            SessionStatus::Expired
        );
    }

    #[test]
    fn commit_tracks_revisions() {
        let (mut book, ids) = book_with(&[("Alice", "Bob")]);
        let commit = book.commit().unwrap();
        assert_eq!(commit.revision, 1);
        assert_eq!(commit.sessions, ids);
        assert!(book.commit().is_none());

        book.place_bet(None, "u1", "bob", 10, BetSource::Manual, None)
            .unwrap();
        let commit = book.commit().unwrap();
        assert_eq!(commit.revision, 2);
        assert!(commit.balances_changed);
    }

    #[test]
    fn timer_overrides_commit_and_survive_snapshots() {
        let mut book = BettingBook::new(1_000);
        let overrides = TimerOverrides {
            enabled: Some(false),
            lock_after_secs: Some(45),
        };
        assert!(book.set_timer_overrides(overrides));
        let commit = book.commit().unwrap();
        assert!(commit.settings_changed);
        assert!(commit.sessions.is_empty());

        assert!(!book.set_timer_overrides(overrides));
        assert!(book.commit().is_none());

        let restored = BettingBook::from_snapshot(1_000, book.to_snapshot());
        assert_eq!(restored.timer_overrides(), overrides);
    }

    #[test]
    fn snapshot_round_trip_preserves_state() {
        let (mut book, _) = book_with(&[("Alice", "Bob"), ("Carol", "Dave")]);
        book.place_bet(None, "u1", "bob", 10, BetSource::Manual, None)
            .unwrap();
        book.force_close(Some(SessionRef::parse("carol")), Some("admin".into()))
            .unwrap();
        book.commit();

        let snapshot = book.to_snapshot();
        let restored = BettingBook::from_snapshot(1_000, snapshot.clone());
        assert_eq!(restored.to_snapshot(), snapshot);
        assert_eq!(restored.registry.active_ids().count(), 1);
    }
}
