use axum::{ routing::{ get, post }, Router };
use std::sync::Arc;
use tower_http::{ cors::CorsLayer, trace::TraceLayer };

pub mod bet;
pub mod claim;
pub mod credit;
pub mod deposit;
pub mod redeem;
pub mod wallet;

use crate::db::{ CustodyKeyRepository, UserRepository };
use crate::pipelines::{ BetPipeline, ClaimPipeline, CreditPipeline, DepositPipeline, RedeemPipeline };
use crate::services::LedgerService;

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<UserRepository>,
    pub custody: Arc<CustodyKeyRepository>,
    pub ledger: Arc<LedgerService>,
    pub deposits: Arc<DepositPipeline>,
    pub bets: Arc<BetPipeline>,
    pub claims: Arc<ClaimPipeline>,
    pub redeems: Arc<RedeemPipeline>,
    pub credits: Arc<CreditPipeline>,
}

/// Pending acknowledgment returned by every settlement request; the final
/// outcome reaches the user through notifications.
#[derive(Debug, serde::Serialize)]
pub struct Accepted<T> {
    pub status: &'static str,
    #[serde(flatten)]
    pub data: T,
}

impl<T> Accepted<T> {
    pub fn pending(data: T) -> Self {
        Self { status: "pending", data }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/users", post(wallet::create_user))
        .route("/api/wallets/{user_id}", get(wallet::get_wallet))
        .route("/api/wallets/{user_id}/audit", get(wallet::audit_wallet))
        .route("/api/deposits", post(deposit::receive_deposit))
        .route("/api/bets", post(bet::place_bets))
        .route("/api/claims", post(claim::claim))
        .route("/api/redeems", post(redeem::request_redeem))
        .route("/api/redeems/{wallet_tx_id}/review", post(redeem::review_redeem))
        .route("/api/credits", post(credit::issue_credit))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn health_check() -> &'static str {
    "OK"
}
