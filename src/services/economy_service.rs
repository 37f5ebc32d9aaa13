use tracing::info;

use crate::{
    dto::economy::{BalanceAdjustment, BalanceResponse},
    error::{BetError, ServiceError},
    services::sse_events,
    state::AppState,
};

/// Credit coins to a user.
pub async fn give(
    state: &AppState,
    request: BalanceAdjustment,
) -> Result<BalanceResponse, ServiceError> {
    let balance = state
        .mutate("economy_give", |book| {
            let balance = book
                .ledger
                .credit(&request.user_id, request.amount)
                .map_err(BetError::from)?;
            sse_events::broadcast_balance_changed(state, &request.user_id, balance);
            Ok(balance)
        })
        .await?;
    info!(user_id = %request.user_id, amount = request.amount, balance, "coins given");
    Ok(BalanceResponse {
        user_id: request.user_id,
        balance,
    })
}

/// Debit coins from a user; fails closed when the balance cannot cover it.
pub async fn take(
    state: &AppState,
    request: BalanceAdjustment,
) -> Result<BalanceResponse, ServiceError> {
    if request.amount == 0 {
        return Err(BetError::InvalidAmount { amount: 0 }.into());
    }
    let balance = state
        .mutate("economy_take", |book| {
            let balance = book.ledger.debit(&request.user_id, request.amount)?;
            sse_events::broadcast_balance_changed(state, &request.user_id, balance);
            Ok(balance)
        })
        .await?;
    info!(user_id = %request.user_id, amount = request.amount, balance, "coins taken");
    Ok(BalanceResponse {
        user_id: request.user_id,
        balance,
    })
}

/// Override a balance, bypassing debit/credit symmetry.
pub async fn set(
    state: &AppState,
    request: BalanceAdjustment,
) -> Result<BalanceResponse, ServiceError> {
    state
        .mutate("economy_set", |book| {
            book.ledger.set_balance(&request.user_id, request.amount);
            sse_events::broadcast_balance_changed(state, &request.user_id, request.amount);
            Ok(())
        })
        .await?;
    info!(user_id = %request.user_id, balance = request.amount, "balance overridden");
    Ok(BalanceResponse {
        user_id: request.user_id,
        balance: request.amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;

    fn adjust(user: &str, amount: u64) -> BalanceAdjustment {
        BalanceAdjustment {
            user_id: user.into(),
            amount,
        }
    }

    #[tokio::test]
    async fn give_take_and_set() {
        let (state, _channels, store) = test_state();
        assert_eq!(give(&state, adjust("u1", 500)).await.unwrap().balance, 1_500);
        assert_eq!(take(&state, adjust("u1", 1_500)).await.unwrap().balance, 0);
        assert_eq!(set(&state, adjust("u1", 77)).await.unwrap().balance, 77);
        assert_eq!(store.current().unwrap().balances.get("u1"), Some(&77));
    }

    #[tokio::test]
    async fn take_fails_closed() {
        let (state, _channels, _store) = test_state();
        let err = take(&state, adjust("u1", 1_001)).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Betting(BetError::InsufficientFunds { shortfall: 1, .. })
        ));
        assert_eq!(state.read(|book| book.ledger.get_balance("u1")).await, 1_000);
    }
}
