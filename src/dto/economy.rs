use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Administrative balance adjustment.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct BalanceAdjustment {
    #[validate(length(min = 1, max = 64))]
    pub user_id: String,
    pub amount: u64,
}

/// Balance of a user after an operation.
#[derive(Debug, Serialize, ToSchema)]
pub struct BalanceResponse {
    pub user_id: String,
    pub balance: u64,
}
