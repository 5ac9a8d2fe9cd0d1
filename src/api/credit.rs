use axum::{ extract::State, http::StatusCode, Json };
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::pipelines::credit::CreditGrant;

use super::{ Accepted, AppState };

#[derive(Serialize)]
pub struct CreditAck {
    pub credit_tx_id: Uuid,
}

pub async fn issue_credit(
    State(state): State<AppState>,
    Json(grant): Json<CreditGrant>
) -> Result<(StatusCode, Json<Accepted<CreditAck>>)> {
    let row = state.credits.issue_credit(grant).await?;

    Ok((StatusCode::ACCEPTED, Json(Accepted::pending(CreditAck { credit_tx_id: row.id }))))
}
