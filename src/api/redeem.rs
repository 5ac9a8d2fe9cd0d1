use axum::{ extract::{ Path, State }, http::StatusCode, Json };
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::pipelines::redeem::{ RedeemReceipt, RedeemRequest, RedeemReview };

use super::{ Accepted, AppState };

pub async fn request_redeem(
    State(state): State<AppState>,
    Json(request): Json<RedeemRequest>
) -> Result<(StatusCode, Json<Accepted<RedeemReceipt>>)> {
    let receipt = state.redeems.request_redeem(request).await?;

    Ok((StatusCode::ACCEPTED, Json(Accepted::pending(receipt))))
}

#[derive(Serialize)]
pub struct ReviewResponse {
    pub redeem_tx_id: Uuid,
    pub wallet_tx_id: Uuid,
    pub payout_can_proceed: Option<bool>,
    pub reviewed_by: Option<String>,
}

pub async fn review_redeem(
    State(state): State<AppState>,
    Path(wallet_tx_id): Path<Uuid>,
    Json(review): Json<RedeemReview>
) -> Result<Json<ReviewResponse>> {
    let redeem = state.redeems.review_redeem(wallet_tx_id, review).await?;

    Ok(
        Json(ReviewResponse {
            redeem_tx_id: redeem.id,
            wallet_tx_id: redeem.wallet_tx_id,
            payout_can_proceed: redeem.payout_can_proceed,
            reviewed_by: redeem.reviewed_by,
        })
    )
}
