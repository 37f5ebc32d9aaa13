use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::state::{
    book::SessionRef,
    session::{BetReceipt, BetSource, Refund, SessionId},
};

/// Parse an optional session reference, treating blank input as absent.
pub fn session_ref(raw: Option<&str>) -> Option<SessionRef> {
    raw.map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(SessionRef::parse)
}

/// Request to place or replace a manual bet.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct PlaceBetRequest {
    /// Session id or contestant name; auto-detected from `contestant` when omitted.
    pub session: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub user_id: String,
    /// Contestant name, matched case-insensitively (exact, then prefix of 3+ characters).
    #[validate(length(min = 1))]
    pub contestant: String,
    /// Stake; zero or negative amounts are rejected by the engine with `invalid_amount`.
    pub amount: i64,
}

/// Request to stake the whole available balance.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct BetAllRequest {
    pub session: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub user_id: String,
    #[validate(length(min = 1))]
    pub contestant: String,
}

/// Request to withdraw a bet before the session locks.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CancelBetRequest {
    pub session: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub user_id: String,
}

/// Accepted bet.
#[derive(Debug, Serialize, ToSchema)]
pub struct BetResponse {
    pub session_id: SessionId,
    pub user_id: String,
    pub contestant_key: String,
    pub contestant_name: String,
    pub amount: u64,
    pub source: BetSource,
    /// Balance after the debit.
    pub balance: u64,
    /// Refund of the bet this one replaced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<Refund>,
}

impl BetResponse {
    pub fn from_receipt(receipt: BetReceipt, contestant_name: String) -> Self {
        Self {
            session_id: receipt.session_id,
            user_id: receipt.bet.user_id,
            contestant_key: receipt.bet.contestant_key,
            contestant_name,
            amount: receipt.bet.amount,
            source: receipt.bet.source,
            balance: receipt.balance_after,
            previous: receipt.previous,
        }
    }
}

/// Withdrawn bet.
#[derive(Debug, Serialize, ToSchema)]
pub struct CancelBetResponse {
    pub session_id: SessionId,
    pub refund: Refund,
}

/// Raw reaction event coming from the chat platform.
///
/// Either `emoji` (looked up in the reaction table) or `contestant` + `amount` is required
/// when adding a reaction.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ReactionRequest {
    pub session: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub user_id: String,
    pub emoji: Option<String>,
    pub contestant: Option<String>,
    #[validate(range(min = 1))]
    pub amount: Option<i64>,
    /// The reaction was removed rather than added.
    #[serde(default)]
    pub removed: bool,
}

/// Reaction queued in the debouncer.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReactionAccepted {
    pub session_id: SessionId,
    /// Sequence number of the pending intent; a later reaction supersedes it.
    pub sequence: u64,
}

/// Balance and active bets of a user.
#[derive(Debug, Serialize, ToSchema)]
pub struct UserOverview {
    pub user_id: String,
    pub balance: u64,
    pub bets: Vec<UserBetView>,
}

/// One active bet of a user.
#[derive(Debug, Serialize, ToSchema)]
pub struct UserBetView {
    pub session_id: SessionId,
    pub title: String,
    pub contestant_key: String,
    pub contestant_name: String,
    pub amount: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_session_reference_is_absent() {
        assert_eq!(session_ref(None), None);
        assert_eq!(session_ref(Some("  ")), None);
        assert_eq!(session_ref(Some("4")), Some(SessionRef::Id(4)));
        assert_eq!(
            session_ref(Some("Alice")),
            Some(SessionRef::Contestant("Alice".into()))
        );
    }

    #[test]
    fn empty_user_is_rejected() {
        let request = PlaceBetRequest {
            session: None,
            user_id: String::new(),
            contestant: "Alice".into(),
            amount: 10,
        };
        assert!(request.validate().is_err());
    }
}
