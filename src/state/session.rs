use std::time::{Duration, SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, TimestampSeconds, serde_as};
use tracing::error;
use utoipa::ToSchema;

use crate::{
    error::{BetError, IntegrityError},
    state::{
        ledger::{Ledger, UserId},
        matching::match_contestant,
        state_machine::{SessionEvent, SessionStatus, compute_transition},
    },
};

/// Sequential identifier of a session, never reused.
pub type SessionId = u64;

/// Keys used for the two contestants of a session, in display order.
pub const CONTESTANT_KEYS: [&str; 2] = ["c1", "c2"];

/// Current wall-clock time truncated to whole seconds, the resolution snapshots persist.
pub fn unix_now() -> SystemTime {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    UNIX_EPOCH + Duration::from_secs(secs)
}

/// Where a bet came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BetSource {
    /// Explicit command.
    Manual,
    /// Emoji reaction on the live status message.
    Reaction,
}

/// A user's stake on one contestant.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    /// Bettor.
    pub user_id: UserId,
    /// Contestant the stake backs.
    pub contestant_key: String,
    /// Coins debited from the bettor.
    pub amount: u64,
    /// Command or reaction.
    pub source: BetSource,
    /// Emoji that placed the bet, for reaction bets.
    pub reaction_token: Option<String>,
    /// When the bet was accepted.
    #[serde_as(as = "TimestampSeconds<i64>")]
    pub placed_at: SystemTime,
}

/// Deadlines driving the automatic lock and close of a session.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Absolute time at which betting locks.
    #[serde_as(as = "TimestampSeconds<i64>")]
    pub lock_at: SystemTime,
    /// Absolute time at which a still-locked session is force-closed.
    #[serde_as(as = "Option<TimestampSeconds<i64>>")]
    pub close_at: Option<SystemTime>,
    /// Spacing of the advisory countdown ticks.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub update_interval: Duration,
}

/// Input of [`Session::place_bet`].
#[derive(Debug, Clone)]
pub struct BetRequest {
    /// Bettor.
    pub user_id: UserId,
    /// Resolved contestant key.
    pub contestant_key: String,
    /// Requested stake; must be positive.
    pub amount: i64,
    /// Command or reaction.
    pub source: BetSource,
    /// Emoji that triggered the bet.
    pub reaction_token: Option<String>,
}

/// Coins returned to a bettor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Refund {
    /// Refunded user.
    pub user_id: UserId,
    /// Contestant the refunded bet backed.
    pub contestant_key: String,
    /// Coins credited back.
    pub amount: u64,
    /// Balance right after the credit.
    pub balance_after: u64,
}

/// Result of an accepted bet.
#[derive(Debug, Clone)]
pub struct BetReceipt {
    /// Session the bet belongs to.
    pub session_id: SessionId,
    /// The recorded bet.
    pub bet: Bet,
    /// Refund of the bet it replaced, if any.
    pub previous: Option<Refund>,
    /// Balance after the debit.
    pub balance_after: u64,
}

/// One bettor's line in a payout report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PayoutLine {
    /// Bettor.
    pub user_id: UserId,
    /// Contestant the bettor backed.
    pub contestant_key: String,
    /// Coins staked.
    pub stake: u64,
    /// Coins credited; zero for losing bets.
    pub payout: u64,
}

/// Settlement of a session that had at least one bet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PayoutReport {
    /// Settled session.
    pub session_id: SessionId,
    /// Winning contestant key.
    pub winner_key: String,
    /// Winning contestant display name.
    pub winner_name: String,
    /// Sum of every stake.
    pub pot: u64,
    /// Sum of the stakes on the winner.
    pub winning_pool: u64,
    /// Every bettor, winners and losers.
    pub payouts: Vec<PayoutLine>,
    /// Integer-division leftover kept by the house.
    pub remainder: u64,
    /// Pot kept by the house because nobody backed the winner.
    pub forfeited: u64,
}

impl PayoutReport {
    /// Bettors that received coins.
    pub fn winners(&self) -> impl Iterator<Item = &PayoutLine> {
        self.payouts.iter().filter(|line| line.payout > 0)
    }

    /// Coins credited to winners.
    pub fn total_paid(&self) -> u64 {
        self.payouts.iter().map(|line| line.payout).sum()
    }
}

/// Result of declaring a winner.
///
/// A round nobody bet on records the winner and credits nothing; it never shares a shape
/// with a settled pot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    /// Winner recorded, no bets, no payouts.
    NoBets {
        /// Resolved session.
        session_id: SessionId,
        /// Winning contestant key.
        winner_key: String,
        /// Winning contestant display name.
        winner_name: String,
    },
    /// Pot redistributed to the winning side.
    Settled(PayoutReport),
}

impl Resolution {
    /// Session this resolution belongs to.
    pub fn session_id(&self) -> SessionId {
        match self {
            Resolution::NoBets { session_id, .. } => *session_id,
            Resolution::Settled(report) => report.session_id,
        }
    }
}

/// Full refund of a force-closed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RefundReport {
    /// Expired session.
    pub session_id: SessionId,
    /// One entry per refunded bet.
    pub refunds: Vec<Refund>,
    /// Coins credited back overall.
    pub total_refunded: u64,
}

/// How a terminal session ended, kept for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Winner declared.
    Resolved(Resolution),
    /// Force-closed.
    Expired(RefundReport),
}

/// Who opened a session and where.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// User that opened the session.
    pub creator_id: Option<String>,
    /// Channel hosting the live status message.
    pub channel_id: Option<String>,
}

/// One wagering round between two contestants.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    title: String,
    contestants: IndexMap<String, String>,
    status: SessionStatus,
    bets: IndexMap<UserId, Bet>,
    timer: Option<TimerConfig>,
    #[serde_as(as = "TimestampSeconds<i64>")]
    created_at: SystemTime,
    #[serde(flatten)]
    provenance: Provenance,
    #[serde_as(as = "Option<TimestampSeconds<i64>>")]
    last_update_at: Option<SystemTime>,
    #[serde(skip)]
    dirty: bool,
    winner_key: Option<String>,
    #[serde_as(as = "Option<TimestampSeconds<i64>>")]
    closed_at: Option<SystemTime>,
    closed_by: Option<String>,
    escrowed: u64,
    outcome: Option<SessionOutcome>,
}

impl Session {
    /// Create an open session for `names`, keyed `c1`/`c2` in order.
    pub fn new(
        id: SessionId,
        names: [String; 2],
        title: Option<String>,
        provenance: Provenance,
        timer: Option<TimerConfig>,
    ) -> Self {
        let title = title.unwrap_or_else(|| format!("{} vs {}", names[0], names[1]));
        let contestants = CONTESTANT_KEYS
            .iter()
            .map(|key| key.to_string())
            .zip(names)
            .collect();

        Self {
            id,
            title,
            contestants,
            status: SessionStatus::Open,
            bets: IndexMap::new(),
            timer,
            created_at: unix_now(),
            provenance,
            last_update_at: None,
            dirty: true,
            winner_key: None,
            closed_at: None,
            closed_by: None,
            escrowed: 0,
            outcome: None,
        }
    }

    /// Registry id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Display title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Lifecycle status.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Contestant key to display name, in display order.
    pub fn contestants(&self) -> &IndexMap<String, String> {
        &self.contestants
    }

    /// Display name of contestant `key`.
    pub fn contestant_name(&self, key: &str) -> Option<&str> {
        self.contestants.get(key).map(String::as_str)
    }

    /// Active bets in placement order.
    pub fn bets(&self) -> &IndexMap<UserId, Bet> {
        &self.bets
    }

    /// Active bet of `user_id`.
    pub fn bet_of(&self, user_id: &str) -> Option<&Bet> {
        self.bets.get(user_id)
    }

    /// Automatic deadlines, for timed sessions.
    pub fn timer(&self) -> Option<&TimerConfig> {
        self.timer.as_ref()
    }

    /// When the session was opened.
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Creator and channel.
    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// Last mutation time.
    pub fn last_update_at(&self) -> Option<SystemTime> {
        self.last_update_at
    }

    /// Declared winner, once resolved.
    pub fn winner_key(&self) -> Option<&str> {
        self.winner_key.as_deref()
    }

    /// When the session reached a terminal status.
    pub fn closed_at(&self) -> Option<SystemTime> {
        self.closed_at
    }

    /// Operator that closed the session; `None` for timers.
    pub fn closed_by(&self) -> Option<&str> {
        self.closed_by.as_deref()
    }

    /// Payouts or refunds recorded when the session closed.
    pub fn outcome(&self) -> Option<&SessionOutcome> {
        self.outcome.as_ref()
    }

    /// Coins debited from the ledger for the bets currently held.
    pub fn escrowed(&self) -> u64 {
        self.escrowed
    }

    /// Sum of every active stake.
    pub fn pot(&self) -> u64 {
        self.bets
            .values()
            .fold(0u64, |acc, bet| acc.saturating_add(bet.amount))
    }

    /// Sum of the stakes on `key`.
    pub fn pool_of(&self, key: &str) -> u64 {
        self.bets
            .values()
            .filter(|bet| bet.contestant_key == key)
            .fold(0u64, |acc, bet| acc.saturating_add(bet.amount))
    }

    /// Resolve a free-text contestant name against this session.
    pub fn match_contestant(&self, input: &str) -> Result<String, BetError> {
        match_contestant(
            input,
            self.contestants
                .iter()
                .map(|(key, name)| (key.as_str(), name.as_str())),
        )
        .map(str::to_string)
    }

    /// Return and reset the "changed since last commit" flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Whether the session changed since the last commit.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Place or replace the bet of `request.user_id`.
    ///
    /// An existing bet is refunded first. When the new stake is unaffordable the refund stands
    /// and the user ends up without a bet in this session.
    pub fn place_bet(
        &mut self,
        ledger: &mut Ledger,
        request: BetRequest,
    ) -> Result<BetReceipt, BetError> {
        self.ensure_accepting()?;
        self.ensure_contestant(&request.contestant_key)?;
        let amount = u64::try_from(request.amount)
            .ok()
            .filter(|amount| *amount > 0)
            .ok_or(BetError::InvalidAmount {
                amount: request.amount,
            })?;

        let previous = self.refund_existing(ledger, &request.user_id)?;

        let balance_after = match ledger.debit(&request.user_id, amount) {
            Ok(balance) => balance,
            Err(BetError::InsufficientFunds {
                balance,
                requested,
                shortfall,
                ..
            }) => {
                return Err(BetError::InsufficientFunds {
                    balance,
                    requested,
                    shortfall,
                    refunded_previous: previous.as_ref().map(|refund| refund.amount),
                });
            }
            Err(err) => return Err(err),
        };

        let bet = Bet {
            user_id: request.user_id.clone(),
            contestant_key: request.contestant_key,
            amount,
            source: request.source,
            reaction_token: request.reaction_token,
            placed_at: unix_now(),
        };
        self.escrowed = self.escrowed.saturating_add(amount);
        self.bets.insert(request.user_id, bet.clone());
        self.touch();

        Ok(BetReceipt {
            session_id: self.id,
            bet,
            previous,
            balance_after,
        })
    }

    /// Refund and remove the bet of `user_id`.
    pub fn cancel_bet(&mut self, ledger: &mut Ledger, user_id: &str) -> Result<Refund, BetError> {
        self.ensure_accepting()?;
        self.refund_existing(ledger, user_id)?
            .ok_or_else(|| BetError::NoActiveBet {
                user_id: user_id.to_string(),
            })
    }

    /// Stop accepting bets. Returns `false` when the session was already locked.
    pub fn lock(&mut self) -> Result<bool, BetError> {
        let transition = compute_transition(self.status, SessionEvent::Lock)
            .map_err(|err| err.into_bet_error(self.id))?;
        if transition.changed {
            self.status = transition.to;
            self.touch();
        }
        Ok(transition.changed)
    }

    /// Settle the pot in favour of `winner_key`.
    pub fn declare_winner(
        &mut self,
        ledger: &mut Ledger,
        winner_key: &str,
        closed_by: Option<String>,
    ) -> Result<Resolution, BetError> {
        let transition = compute_transition(self.status, SessionEvent::DeclareWinner)
            .map_err(|err| err.into_bet_error(self.id))?;
        self.ensure_contestant(winner_key)?;
        self.verify_escrow()?;

        let winner_name = self
            .contestant_name(winner_key)
            .unwrap_or(winner_key)
            .to_string();

        let resolution = if self.bets.is_empty() {
            Resolution::NoBets {
                session_id: self.id,
                winner_key: winner_key.to_string(),
                winner_name,
            }
        } else {
            let report = self.settle(ledger, winner_key, winner_name)?;
            Resolution::Settled(report)
        };

        self.status = transition.to;
        self.winner_key = Some(winner_key.to_string());
        self.finish(closed_by, SessionOutcome::Resolved(resolution.clone()));
        Ok(resolution)
    }

    /// Refund every bet and expire the session without a winner.
    pub fn force_close(
        &mut self,
        ledger: &mut Ledger,
        closed_by: Option<String>,
    ) -> Result<RefundReport, BetError> {
        let transition = compute_transition(self.status, SessionEvent::ForceClose)
            .map_err(|err| err.into_bet_error(self.id))?;
        self.verify_escrow()?;
        self.precheck_credits(
            ledger,
            self.bets
                .values()
                .map(|bet| (bet.user_id.as_str(), bet.amount)),
        )?;

        let mut refunds = Vec::with_capacity(self.bets.len());
        for bet in self.bets.values() {
            let balance_after = ledger.credit(&bet.user_id, bet.amount)?;
            refunds.push(Refund {
                user_id: bet.user_id.clone(),
                contestant_key: bet.contestant_key.clone(),
                amount: bet.amount,
                balance_after,
            });
        }
        let total_refunded = refunds.iter().map(|refund| refund.amount).sum();
        let report = RefundReport {
            session_id: self.id,
            refunds,
            total_refunded,
        };

        self.status = transition.to;
        self.finish(closed_by, SessionOutcome::Expired(report.clone()));
        Ok(report)
    }

    /// Re-insert a persisted bet whose coins were already debited.
    pub(crate) fn restore_bet(&mut self, bet: Bet) {
        self.escrowed = self.escrowed.saturating_add(bet.amount);
        self.bets.insert(bet.user_id.clone(), bet);
    }

    fn settle(
        &self,
        ledger: &mut Ledger,
        winner_key: &str,
        winner_name: String,
    ) -> Result<PayoutReport, BetError> {
        let pot = self.pot();
        let winning_pool = self.pool_of(winner_key);

        let payouts: Vec<PayoutLine> = self
            .bets
            .values()
            .map(|bet| {
                let payout = if bet.contestant_key == winner_key && winning_pool > 0 {
                    // stake * pot / pool <= pot, so the narrowing never truncates
                    (u128::from(bet.amount) * u128::from(pot) / u128::from(winning_pool)) as u64
                } else {
                    0
                };
                PayoutLine {
                    user_id: bet.user_id.clone(),
                    contestant_key: bet.contestant_key.clone(),
                    stake: bet.amount,
                    payout,
                }
            })
            .collect();

        let paid: u64 = payouts.iter().map(|line| line.payout).sum();
        let (remainder, forfeited) = if winning_pool == 0 {
            (0, pot)
        } else {
            (pot.saturating_sub(paid), 0)
        };

        if paid > pot || paid + remainder + forfeited != pot {
            let err = IntegrityError::PayoutMismatch {
                session_id: self.id,
                pot,
                paid,
                retained: remainder + forfeited,
            };
            error!(session_id = self.id, error = %err, "payout computation does not balance");
            return Err(err.into());
        }

        self.precheck_credits(
            ledger,
            payouts
                .iter()
                .filter(|line| line.payout > 0)
                .map(|line| (line.user_id.as_str(), line.payout)),
        )?;
        for line in payouts.iter().filter(|line| line.payout > 0) {
            ledger.credit(&line.user_id, line.payout)?;
        }

        Ok(PayoutReport {
            session_id: self.id,
            winner_key: winner_key.to_string(),
            winner_name,
            pot,
            winning_pool,
            payouts,
            remainder,
            forfeited,
        })
    }

    fn refund_existing(
        &mut self,
        ledger: &mut Ledger,
        user_id: &str,
    ) -> Result<Option<Refund>, BetError> {
        let Some(existing) = self.bets.get(user_id) else {
            return Ok(None);
        };
        let balance_after = ledger.credit(user_id, existing.amount)?;
        let Some(bet) = self.bets.shift_remove(user_id) else {
            return Ok(None);
        };
        self.escrowed = self.escrowed.saturating_sub(bet.amount);
        self.touch();

        Ok(Some(Refund {
            user_id: bet.user_id,
            contestant_key: bet.contestant_key,
            amount: bet.amount,
            balance_after,
        }))
    }

    /// Reject credits that would overflow before any of them is applied.
    fn precheck_credits<'a>(
        &self,
        ledger: &Ledger,
        credits: impl Iterator<Item = (&'a str, u64)>,
    ) -> Result<(), BetError> {
        for (user_id, amount) in credits {
            let balance = ledger.get_balance(user_id);
            if balance.checked_add(amount).is_none() {
                let err = IntegrityError::BalanceOverflow {
                    user_id: user_id.to_string(),
                    balance,
                    amount,
                };
                error!(session_id = self.id, error = %err, "refusing to settle session");
                return Err(err.into());
            }
        }
        Ok(())
    }

    fn verify_escrow(&self) -> Result<(), BetError> {
        let pot = self.pot();
        if pot != self.escrowed {
            let err = IntegrityError::EscrowMismatch {
                session_id: self.id,
                escrowed: self.escrowed,
                pot,
            };
            error!(session_id = self.id, error = %err, "bets and ledger debits disagree");
            return Err(err.into());
        }
        Ok(())
    }

    fn ensure_accepting(&self) -> Result<(), BetError> {
        match self.status {
            SessionStatus::Open => Ok(()),
            SessionStatus::Locked => Err(BetError::BettingLocked {
                session_id: self.id,
            }),
            SessionStatus::Resolved | SessionStatus::Expired => Err(BetError::SessionClosed {
                session_id: self.id,
            }),
        }
    }

    fn ensure_contestant(&self, key: &str) -> Result<(), BetError> {
        if self.contestants.contains_key(key) {
            return Ok(());
        }
        Err(BetError::UnknownContestant {
            input: key.to_string(),
            valid: self.contestants.values().cloned().collect(),
        })
    }

    fn finish(&mut self, closed_by: Option<String>, outcome: SessionOutcome) {
        self.bets.clear();
        self.escrowed = 0;
        self.closed_at = Some(unix_now());
        self.closed_by = closed_by;
        self.outcome = Some(outcome);
        self.touch();
    }

    fn touch(&mut self) {
        self.dirty = true;
        self.last_update_at = Some(unix_now());
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn session(id: SessionId, a: &str, b: &str) -> Session {
        Session::new(
            id,
            [a.to_string(), b.to_string()],
            None,
            Provenance::default(),
            None,
        )
    }

    pub(crate) fn manual(user_id: &str, key: &str, amount: i64) -> BetRequest {
        BetRequest {
            user_id: user_id.to_string(),
            contestant_key: key.to_string(),
            amount,
            source: BetSource::Manual,
            reaction_token: None,
        }
    }

    #[test]
    fn title_defaults_to_versus() {
        let session = session(1, "Alice", "Bob");
        assert_eq!(session.title(), "Alice vs Bob");
        assert_eq!(session.contestant_name("c2"), Some("Bob"));
    }

    #[test]
    fn sole_winner_gets_stake_back() {
        let mut ledger = Ledger::new(1_000);
        let mut session = session(1, "Alice", "Bob");

        session.place_bet(&mut ledger, manual("u1", "c1", 100)).unwrap();
        assert_eq!(ledger.get_balance("u1"), 900);

        session.lock().unwrap();
        let resolution = session.declare_winner(&mut ledger, "c1", None).unwrap();
        let Resolution::Settled(report) = resolution else {
            panic!("expected a settled pot");
        };
        assert_eq!(report.pot, 100);
        assert_eq!(report.payouts[0].payout, 100);
        assert_eq!(report.remainder, 0);
        assert_eq!(ledger.get_balance("u1"), 1_000);
        assert_eq!(session.status(), SessionStatus::Resolved);
        assert_eq!(session.winner_key(), Some("c1"));
    }

    #[test]
    fn winner_takes_losing_side() {
        let mut ledger = Ledger::new(1_000);
        let mut session = session(1, "Alice", "Bob");
        session.place_bet(&mut ledger, manual("u1", "c1", 100)).unwrap();
        session.place_bet(&mut ledger, manual("u2", "c2", 300)).unwrap();
        session.lock().unwrap();

        let Resolution::Settled(report) = session.declare_winner(&mut ledger, "c1", None).unwrap()
        else {
            panic!("expected a settled pot");
        };
        assert_eq!(report.pot, 400);
        assert_eq!(report.winning_pool, 100);
        assert_eq!(report.total_paid(), 400);
        assert_eq!(report.remainder, 0);
        let u2 = report.payouts.iter().find(|line| line.user_id == "u2").unwrap();
        assert_eq!(u2.payout, 0);
        assert_eq!(ledger.get_balance("u1"), 1_300);
        assert_eq!(ledger.get_balance("u2"), 700);
    }

    #[test]
    fn remainder_is_reported() {
        let mut ledger = Ledger::new(1_000);
        let mut session = session(1, "Alice", "Bob");
        session.place_bet(&mut ledger, manual("u1", "c1", 1)).unwrap();
        session.place_bet(&mut ledger, manual("u2", "c1", 2)).unwrap();
        session.place_bet(&mut ledger, manual("u3", "c2", 2)).unwrap();
        session.lock().unwrap();

        let Resolution::Settled(report) = session.declare_winner(&mut ledger, "c1", None).unwrap()
        else {
            panic!("expected a settled pot");
        };
        // pot 5, pool 3: floor(5/3)=1 and floor(10/3)=3
        assert_eq!(report.total_paid(), 4);
        assert_eq!(report.remainder, 1);
        assert_eq!(report.total_paid() + report.remainder, report.pot);
    }

    #[test]
    fn unbacked_winner_forfeits_pot() {
        let mut ledger = Ledger::new(1_000);
        let mut session = session(1, "Alice", "Bob");
        session.place_bet(&mut ledger, manual("u1", "c2", 250)).unwrap();
        session.lock().unwrap();

        let Resolution::Settled(report) = session.declare_winner(&mut ledger, "c1", None).unwrap()
        else {
            panic!("expected a settled pot");
        };
        assert_eq!(report.forfeited, 250);
        assert_eq!(report.winners().count(), 0);
        assert_eq!(ledger.get_balance("u1"), 750);
    }

    #[test]
    fn no_bets_records_winner_only() {
        let mut ledger = Ledger::new(1_000);
        let mut session = session(7, "Alice", "Bob");
        session.lock().unwrap();

        let resolution = session.declare_winner(&mut ledger, "c2", None).unwrap();
        assert_eq!(
            resolution,
            Resolution::NoBets {
                session_id: 7,
                winner_key: "c2".into(),
                winner_name: "Bob".into(),
            }
        );
        assert!(ledger.balances().is_empty());
    }

    #[test]
    fn changing_bet_refunds_previous() {
        let mut ledger = Ledger::new(100);
        let mut session = session(1, "Alice", "Bob");
        session.place_bet(&mut ledger, manual("u1", "c1", 100)).unwrap();

        let receipt = session.place_bet(&mut ledger, manual("u1", "c2", 50)).unwrap();
        assert_eq!(receipt.previous.map(|refund| refund.amount), Some(100));
        assert_eq!(ledger.get_balance("u1"), 50);
        assert_eq!(session.bets().len(), 1);
        assert_eq!(session.bet_of("u1").unwrap().contestant_key, "c2");
        assert_eq!(session.escrowed(), 50);
    }

    #[test]
    fn unaffordable_change_leaves_no_bet() {
        let mut ledger = Ledger::new(100);
        let mut session = session(1, "Alice", "Bob");
        session.place_bet(&mut ledger, manual("u1", "c1", 60)).unwrap();

        let err = session.place_bet(&mut ledger, manual("u1", "c2", 150)).unwrap_err();
        assert_eq!(
            err,
            BetError::InsufficientFunds {
                balance: 100,
                requested: 150,
                shortfall: 50,
                refunded_previous: Some(60),
            }
        );
        assert!(session.bet_of("u1").is_none());
        assert_eq!(ledger.get_balance("u1"), 100);
        assert_eq!(session.escrowed(), 0);
    }

    #[test]
    fn rejects_bad_input_in_order() {
        let mut ledger = Ledger::new(100);
        let mut session = session(1, "Alice", "Bob");

        let err = session.place_bet(&mut ledger, manual("u1", "c9", 10)).unwrap_err();
        assert!(matches!(err, BetError::UnknownContestant { ref valid, .. } if valid == &["Alice", "Bob"]));

        let err = session.place_bet(&mut ledger, manual("u1", "c1", 0)).unwrap_err();
        assert_eq!(err, BetError::InvalidAmount { amount: 0 });
        let err = session.place_bet(&mut ledger, manual("u1", "c1", -5)).unwrap_err();
        assert_eq!(err, BetError::InvalidAmount { amount: -5 });

        session.lock().unwrap();
        let err = session.place_bet(&mut ledger, manual("u1", "c1", 10)).unwrap_err();
        assert_eq!(err, BetError::BettingLocked { session_id: 1 });
        let err = session.cancel_bet(&mut ledger, "u1").unwrap_err();
        assert_eq!(err, BetError::BettingLocked { session_id: 1 });
    }

    #[test]
    fn cancel_without_bet_fails() {
        let mut ledger = Ledger::new(100);
        let mut session = session(1, "Alice", "Bob");
        let err = session.cancel_bet(&mut ledger, "u1").unwrap_err();
        assert_eq!(
            err,
            BetError::NoActiveBet {
                user_id: "u1".into()
            }
        );
    }

    #[test]
    fn double_lock_is_idempotent() {
        let mut session = session(1, "Alice", "Bob");
        assert!(session.lock().unwrap());
        session.take_dirty();
        assert!(!session.lock().unwrap());
        assert!(!session.is_dirty());
        assert_eq!(session.status(), SessionStatus::Locked);
    }

    #[test]
    fn declare_on_open_session_requires_lock() {
        let mut ledger = Ledger::new(100);
        let mut session = session(4, "Alice", "Bob");
        let err = session.declare_winner(&mut ledger, "c1", None).unwrap_err();
        assert_eq!(err, BetError::MustLockFirst { session_id: 4 });
    }

    #[test]
    fn force_close_refunds_everyone_and_seals_session() {
        let mut ledger = Ledger::new(500);
        let mut session = session(2, "Alice", "Bob");
        session.place_bet(&mut ledger, manual("u1", "c1", 200)).unwrap();
        session.place_bet(&mut ledger, manual("u2", "c2", 300)).unwrap();

        let report = session.force_close(&mut ledger, Some("admin".into())).unwrap();
        assert_eq!(report.total_refunded, 500);
        assert_eq!(ledger.get_balance("u1"), 500);
        assert_eq!(ledger.get_balance("u2"), 500);
        assert_eq!(session.status(), SessionStatus::Expired);
        assert!(session.bets().is_empty());
        assert_eq!(session.closed_by(), Some("admin"));

        let err = session.place_bet(&mut ledger, manual("u1", "c1", 10)).unwrap_err();
        assert_eq!(err, BetError::SessionClosed { session_id: 2 });
        let err = session.declare_winner(&mut ledger, "c1", None).unwrap_err();
        assert_eq!(err, BetError::SessionClosed { session_id: 2 });
        assert_eq!(ledger.get_balance("u1"), 500);
    }

    #[test]
    fn escrow_mismatch_aborts_settlement() {
        let mut ledger = Ledger::new(500);
        let mut session = session(3, "Alice", "Bob");
        session.place_bet(&mut ledger, manual("u1", "c1", 200)).unwrap();
        session.escrowed = 150;
        session.lock().unwrap();

        let err = session.declare_winner(&mut ledger, "c1", None).unwrap_err();
        assert!(err.is_integrity());
        assert_eq!(session.status(), SessionStatus::Locked);
        assert_eq!(session.bets().len(), 1);
        assert_eq!(ledger.get_balance("u1"), 300);
    }

    #[test]
    fn conservation_across_changes() {
        let mut ledger = Ledger::new(1_000);
        let mut session = session(1, "Alice", "Bob");
        for (key, amount) in [("c1", 100), ("c2", 400), ("c1", 1_000), ("c2", 1)] {
            let _ = session.place_bet(&mut ledger, manual("u1", key, amount));
            let active = session.bet_of("u1").map_or(0, |bet| bet.amount);
            assert_eq!(ledger.get_balance("u1") + active, 1_000);
            assert!(session.bets().len() <= 1);
        }
        session.cancel_bet(&mut ledger, "u1").unwrap();
        assert_eq!(ledger.get_balance("u1"), 1_000);
    }
}
