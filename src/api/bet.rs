use axum::{ extract::State, http::StatusCode, Json };

use crate::error::Result;
use crate::pipelines::bet::{ BetReceipt, BetRequest };

use super::{ Accepted, AppState };

pub async fn place_bets(
    State(state): State<AppState>,
    Json(request): Json<BetRequest>
) -> Result<(StatusCode, Json<Accepted<BetReceipt>>)> {
    let receipt = state.bets.place_bets(request).await?;

    Ok((StatusCode::ACCEPTED, Json(Accepted::pending(receipt))))
}
