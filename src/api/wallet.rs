use axum::{ extract::{ Path, State }, http::StatusCode, Json };
use rust_decimal::Decimal;
use serde::{ Deserialize, Serialize };
use uuid::Uuid;

use crate::error::{ AppError, Result };
use crate::services::ledger_service::LedgerAudit;

use super::AppState;

#[derive(Deserialize)]
pub struct CreateUserRequest {
    #[serde(default)]
    pub referrer_id: Option<Uuid>,
    #[serde(default = "default_rank")]
    pub referral_rank: i32,
}

fn default_rank() -> i32 {
    1
}

#[derive(Serialize)]
pub struct WalletResponse {
    pub user_id: Uuid,
    pub wallet_id: Uuid,
    pub address: String,
    pub wallet_balance: Decimal,
    pub available_balance: Decimal,
    pub credit_balance: Decimal,
    pub available_credit: Decimal,
    pub redeemable_balance: Decimal,
    pub available_redeemable: Decimal,
    pub point_balance: Decimal,
}

/// Register a player with a freshly provisioned custody wallet.
pub async fn create_user(
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>
) -> Result<(StatusCode, Json<WalletResponse>)> {
    if let Some(referrer_id) = request.referrer_id {
        state.users.find_user(referrer_id).await?;
    }
    if !(1..=3).contains(&request.referral_rank) {
        return Err(AppError::InvalidInput(format!("Unknown referral rank {}", request.referral_rank)));
    }

    let address = state.custody.provision_wallet().await?;
    let (user, _) = state.users.create(&address, request.referrer_id, request.referral_rank).await?;

    Ok((StatusCode::CREATED, Json(wallet_view(&state, user.id).await?)))
}

pub async fn get_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>
) -> Result<Json<WalletResponse>> {
    Ok(Json(wallet_view(&state, user_id).await?))
}

#[derive(Serialize)]
pub struct AuditResponse {
    pub wallet_id: Uuid,
    pub consistent: bool,
    #[serde(flatten)]
    pub audit: LedgerAudit,
}

/// Recompute the wallet's balances from its settled ledger rows.
pub async fn audit_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>
) -> Result<Json<AuditResponse>> {
    let wallet = state.users.find_wallet_by_user(user_id).await?;
    let audit = state.ledger.audit_wallet(wallet.id).await?;

    if !audit.is_consistent() {
        tracing::warn!(wallet_id = %wallet.id, ?audit, "Wallet balances drifted from the ledger");
    }

    Ok(Json(AuditResponse { wallet_id: wallet.id, consistent: audit.is_consistent(), audit }))
}

async fn wallet_view(state: &AppState, user_id: Uuid) -> Result<WalletResponse> {
    let wallet = state.users.find_wallet_by_user(user_id).await?;
    let db = state.users.connection();

    Ok(WalletResponse {
        user_id,
        wallet_id: wallet.id,
        address: wallet.wallet_address.clone(),
        wallet_balance: wallet.wallet_balance,
        available_balance: state.ledger.available_wallet_balance(db, &wallet).await?,
        credit_balance: wallet.credit_balance,
        available_credit: state.ledger.available_credit_balance(db, &wallet).await?,
        redeemable_balance: wallet.redeemable_balance,
        available_redeemable: state.ledger.available_redeemable_balance(db, &wallet).await?,
        point_balance: wallet.point_balance,
    })
}
