use async_trait::async_trait;
use sea_orm::{ entity::prelude::*, sea_query::Expr, QueryOrder, Set, TransactionTrait };
use serde::{ Deserialize, Serialize };
use std::collections::{ BTreeSet, HashMap };
use std::sync::Arc;
use uuid::Uuid;

use crate::db::entity::{ bet_order, claim_detail, draw_result, wallet_tx };
use crate::enums::{ Forecast, PrizeCategory, TxStatus, WalletTxType };
use crate::error::{ AppError, Result };
use crate::providers::{ ContractCall, ForecastParam };
use crate::queue::{ Job, JobHandler };
use crate::services::UserNotification;

use super::prize::{ self, PrizeAward };
use super::{ PipelineContext, RowPayload, SUBMIT_CLAIM_JOB };

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimReceipt {
    pub wallet_tx_id: Uuid,
    pub claim_amount: Decimal,
    pub point_amount: Decimal,
    pub winning_orders: usize,
}

/// One order hitting one published draw result.
#[derive(Debug, Clone)]
pub struct Winning {
    pub order: bet_order::Model,
    pub draw_result_id: Uuid,
    pub category: PrizeCategory,
    pub award: PrizeAward,
}

/// Match unclaimed orders against draw results. Orders can win in several
/// categories, each hit is its own winning.
pub fn match_winnings(
    orders: &[bet_order::Model],
    results: &[draw_result::Model]
) -> Result<Vec<Winning>> {
    let mut by_number: HashMap<(i64, &str), Vec<&draw_result::Model>> = HashMap::new();
    for result in results {
        by_number.entry((result.epoch, result.number_pair.as_str())).or_default().push(result);
    }

    let mut winnings = Vec::new();
    for order in orders {
        let Some(hits) = by_number.get(&(order.epoch, order.number_pair.as_str())) else {
            continue;
        };
        for hit in hits {
            let category: PrizeCategory = hit.prize_category.parse()?;
            let award = prize::award(category, order.big_forecast_amount, order.small_forecast_amount);
            if award.is_empty() {
                continue;
            }
            winnings.push(Winning {
                order: order.clone(),
                draw_result_id: hit.id,
                category,
                award,
            });
        }
    }

    Ok(winnings)
}

/// Contract parameters for the winning orders, each order counted once.
pub fn claim_params(orders: &[bet_order::Model]) -> Vec<ForecastParam> {
    let params = orders.iter().flat_map(|order| {
        [
            (Forecast::Big, order.big_forecast_amount),
            (Forecast::Small, order.small_forecast_amount),
        ].map(|(forecast, amount)| ForecastParam {
            epoch: order.epoch,
            number: order.number_pair.clone(),
            forecast,
            amount,
        })
    });

    prize::dedupe_params(params)
}

/// Pays out winning bets through a single batched `claim` per user.
pub struct ClaimPipeline {
    ctx: Arc<PipelineContext>,
}

impl ClaimPipeline {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Book a claim for every unclaimed winning bet of the user.
    ///
    /// Returns `None` when there is nothing to claim.
    pub async fn claim(&self, user_id: Uuid) -> Result<Option<ClaimReceipt>> {
        let wallet = self.ctx.users.find_wallet_by_user(user_id).await?;

        // Only bets that settled on chain can win
        let orders = bet_order::Entity
            ::find()
            .inner_join(wallet_tx::Entity)
            .filter(bet_order::Column::UserWalletId.eq(wallet.id))
            .filter(bet_order::Column::ClaimWalletTxId.is_null())
            .filter(wallet_tx::Column::Status.eq(TxStatus::Success.as_str()))
            .order_by_asc(bet_order::Column::CreatedAt)
            .all(&self.ctx.db).await?;
        if orders.is_empty() {
            return Ok(None);
        }

        let epochs: BTreeSet<i64> = orders
            .iter()
            .map(|o| o.epoch)
            .collect();
        let results = draw_result::Entity
            ::find()
            .filter(draw_result::Column::Epoch.is_in(epochs))
            .all(&self.ctx.db).await?;

        let winnings = match_winnings(&orders, &results)?;
        if winnings.is_empty() {
            return Ok(None);
        }

        let claim_amount: Decimal = winnings.iter().map(|w| w.award.claim_amount).sum();
        let point_amount: Decimal = winnings.iter().map(|w| w.award.point_amount).sum();
        let order_ids: BTreeSet<Uuid> = winnings.iter().map(|w| w.order.id).collect();

        let now = chrono::Utc::now();
        let txn = self.ctx.db.begin().await?;
        self.ctx.ledger.lock_wallet(&txn, wallet.id).await?;

        let claim = (wallet_tx::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_wallet_id: Set(wallet.id),
            tx_type: Set(WalletTxType::Claim.to_string()),
            amount: Set(claim_amount),
            starting_balance: Set(None),
            ending_balance: Set(None),
            status: Set(TxStatus::Pending.to_string()),
            tx_hash: Set(None),
            game_usd_tx_id: Set(None),
            escalated: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        }).insert(&txn).await?;

        // Reserve the orders; a concurrent claim loses the race here
        let reserved = bet_order::Entity
            ::update_many()
            .col_expr(bet_order::Column::ClaimWalletTxId, Expr::value(claim.id))
            .filter(bet_order::Column::Id.is_in(order_ids.iter().copied()))
            .filter(bet_order::Column::ClaimWalletTxId.is_null())
            .exec(&txn).await?;
        if reserved.rows_affected != (order_ids.len() as u64) {
            txn.rollback().await?;
            return Err(AppError::InvalidInput("Claim already in progress".to_string()));
        }

        for winning in &winnings {
            (claim_detail::ActiveModel {
                id: Set(Uuid::new_v4()),
                wallet_tx_id: Set(claim.id),
                bet_order_id: Set(winning.order.id),
                draw_result_id: Set(winning.draw_result_id),
                prize_category: Set(winning.category.to_string()),
                claim_amount: Set(winning.award.claim_amount),
                point_amount: Set(winning.award.point_amount),
                created_at: Set(now),
            }).insert(&txn).await?;
        }

        // Nothing to move on chain, the claim settles with its points right away
        let points_only = claim_amount.is_zero();
        if points_only {
            self.ctx.ledger.finalize_wallet_tx(&txn, claim.id, None).await?;
            self.ctx.ledger.add_points(&txn, wallet.id, point_amount).await?;
        }

        txn.commit().await?;

        tracing::info!(
            wallet_tx_id = %claim.id,
            claim_amount = %claim_amount,
            point_amount = %point_amount,
            orders = order_ids.len(),
            points_only,
            "Claim booked"
        );

        if points_only {
            self.ctx.notifier.set_user_notification(
                wallet.user_id,
                UserNotification::new(
                    "claim_paid",
                    "Points credited",
                    format!("{} points were added to your wallet.", point_amount),
                    Some(claim.id)
                )
            ).await;
        } else {
            self.ctx.enqueue_after_commit(SUBMIT_CLAIM_JOB, claim.id).await;
        }

        Ok(
            Some(ClaimReceipt {
                wallet_tx_id: claim.id,
                claim_amount,
                point_amount,
                winning_orders: order_ids.len(),
            })
        )
    }

    async fn submit_claim(&self, wallet_tx_id: Uuid) -> Result<()> {
        let claim = super::find_wallet_tx(&self.ctx.db, wallet_tx_id).await?;
        if claim.status != TxStatus::Pending.as_str() {
            return Ok(());
        }

        let wallet = self.ctx.users.find_wallet(claim.user_wallet_id).await?;
        let orders = bet_order::Entity
            ::find()
            .filter(bet_order::Column::ClaimWalletTxId.eq(wallet_tx_id))
            .all(&self.ctx.db).await?;
        let details = claim_detail::Entity
            ::find()
            .filter(claim_detail::Column::WalletTxId.eq(wallet_tx_id))
            .all(&self.ctx.db).await?;
        let points: Decimal = details
            .iter()
            .map(|d| d.point_amount)
            .sum();

        let pool = self.ctx.chain().pool_address.clone();
        let call = ContractCall::Claim {
            user: wallet.wallet_address.clone(),
            claims: claim_params(&orders),
        };

        let tx_hash = match claim.tx_hash.clone() {
            Some(hash) => hash,
            None => {
                self.ctx.adapter.ensure_gas(&pool).await?;
                let hash = self.ctx.adapter.submit_and_confirm(&pool, &call).await?;
                if let Err(e) = super::record_wallet_tx_hash(&self.ctx.db, wallet_tx_id, &hash).await {
                    tracing::error!(wallet_tx_id = %wallet_tx_id, tx_hash = %hash, error = %e, "Claim hash not recorded");
                    self.ctx.hold_and_escalate(wallet_tx_id, &e).await;
                    return Ok(());
                }
                hash
            }
        };

        let finalized = async {
            let txn = self.ctx.db.begin().await?;
            if self.ctx.ledger.finalize_wallet_tx(&txn, wallet_tx_id, Some(tx_hash.clone())).await?.is_some() {
                self.ctx.ledger.add_points(&txn, wallet.id, points).await?;
            }
            txn.commit().await?;
            Ok::<_, AppError>(())
        }.await;

        if let Err(e) = finalized {
            tracing::error!(wallet_tx_id = %wallet_tx_id, tx_hash = %tx_hash, error = %e, "Claim finalization failed");
            self.ctx.hold_and_escalate(wallet_tx_id, &e).await;
            return Ok(());
        }

        self.ctx.notifier.set_user_notification(
            wallet.user_id,
            UserNotification::new(
                "claim_paid",
                "Winnings credited",
                format!("{} in winnings and {} points were added to your wallet.", claim.amount, points),
                Some(wallet_tx_id)
            )
        ).await;

        Ok(())
    }
}

#[async_trait]
impl JobHandler for ClaimPipeline {
    async fn handle(&self, job: &Job) -> Result<()> {
        let payload: RowPayload = job.payload()?;
        self.submit_claim(payload.id).await
    }

    async fn on_failure(&self, job: &Job, error: &AppError) -> Result<()> {
        let payload: RowPayload = job.payload()?;
        let claim = super::find_wallet_tx(&self.ctx.db, payload.id).await?;

        if claim.tx_hash.is_some() {
            self.ctx.hold_and_escalate(payload.id, error).await;
            return Ok(());
        }

        // Release the orders so the user can claim them again
        let txn = self.ctx.db.begin().await?;
        let failed = self.ctx.ledger.fail_wallet_tx(&txn, payload.id).await?;
        if failed {
            bet_order::Entity
                ::update_many()
                .col_expr(bet_order::Column::ClaimWalletTxId, Expr::value(Option::<Uuid>::None))
                .filter(bet_order::Column::ClaimWalletTxId.eq(payload.id))
                .exec(&txn).await?;
        }
        txn.commit().await?;

        if failed {
            self.ctx.escalate(
                "claim_failed",
                "Claim submission failed",
                format!("Claim {} failed after {} attempts: {}", payload.id, job.attempts_made, error),
                Some(payload.id)
            ).await;
            self.ctx.notify_user(
                claim.user_wallet_id,
                UserNotification::new(
                    "claim_failed",
                    "Claim failed",
                    "Your claim could not be processed. Please try again later.".to_string(),
                    Some(payload.id)
                )
            ).await;
        }

        Ok(())
    }
}
