use axum::{ extract::State, http::StatusCode, Json };
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::pipelines::deposit::DepositRequest;

use super::{ Accepted, AppState };

#[derive(Debug, Serialize)]
pub struct DepositAck {
    pub deposit_id: Uuid,
    pub wallet_tx_id: Uuid,
}

/// Webhook of the chain watcher for transfers into custody addresses.
pub async fn receive_deposit(
    State(state): State<AppState>,
    Json(request): Json<DepositRequest>
) -> Result<(StatusCode, Json<Accepted<DepositAck>>)> {
    let deposit = state.deposits.process_deposit(request).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(
            Accepted::pending(DepositAck {
                deposit_id: deposit.id,
                wallet_tx_id: deposit.wallet_tx_id,
            })
        ),
    ))
}
