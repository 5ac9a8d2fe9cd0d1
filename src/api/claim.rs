use axum::{ extract::State, http::StatusCode, Json };
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{ AppError, Result };
use crate::pipelines::claim::ClaimReceipt;

use super::{ Accepted, AppState };

#[derive(Deserialize)]
pub struct ClaimRequest {
    pub user_id: Uuid,
}

pub async fn claim(
    State(state): State<AppState>,
    Json(request): Json<ClaimRequest>
) -> Result<(StatusCode, Json<Accepted<ClaimReceipt>>)> {
    let receipt = state.claims
        .claim(request.user_id).await?
        .ok_or_else(|| AppError::NotFound("unclaimed winnings".to_string()))?;

    Ok((StatusCode::ACCEPTED, Json(Accepted::pending(receipt))))
}
