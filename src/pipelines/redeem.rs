use async_trait::async_trait;
use chrono::{ DateTime, Utc };
use sea_orm::{ entity::prelude::*, sea_query::Expr, QueryOrder, Set, TransactionTrait };
use serde::{ Deserialize, Serialize };
use std::sync::Arc;
use uuid::Uuid;

use crate::db::entity::{ redeem_tx, wallet_tx };
use crate::enums::{ TxStatus, WalletTxType };
use crate::error::{ AppError, Result };
use crate::providers::ContractCall;
use crate::queue::{ Job, JobHandler };
use crate::services::{ AdminNotification, UserNotification };

use super::{ PipelineContext, RowPayload, PROCESS_PAYOUT_JOB, PROCESS_REDEEM_JOB };

pub const PAYOUT_PENDING: &str = "pending";
pub const PAYOUT_SUCCESS: &str = "success";
pub const PAYOUT_FAILED: &str = "failed";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeemRequest {
    pub user_id: Uuid,
    pub amount: Decimal,
    pub destination_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeemReceipt {
    pub wallet_tx_id: Uuid,
    pub redeem_tx_id: Uuid,
    pub status: TxStatus,
    pub auto_approved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeemReview {
    pub admin_id: String,
    pub approve: bool,
    #[serde(default)]
    pub note: Option<String>,
}

/// Inputs of the auto-approval decision.
#[derive(Debug, Clone, Copy)]
pub struct ApprovalCheck {
    pub amount: Decimal,
    pub threshold: Decimal,
    pub cooldown: chrono::Duration,
    pub last_redeem_at: Option<DateTime<Utc>>,
    /// `None` when the pool balance could not be read.
    pub pool_balance: Option<Decimal>,
    pub now: DateTime<Utc>,
}

/// Small, infrequent redeems the pool can cover skip admin review.
pub fn should_auto_approve(check: &ApprovalCheck) -> bool {
    let below_threshold = check.amount < check.threshold;
    let cooled_down = match check.last_redeem_at {
        None => true,
        Some(at) => check.now - at >= check.cooldown,
    };
    let pool_covers = check.pool_balance.is_some_and(|balance| balance >= check.amount);

    below_threshold && cooled_down && pool_covers
}

/// Two-leg withdrawal: redeem into the pool, then a signed payout.
pub struct RedeemPipeline {
    ctx: Arc<PipelineContext>,
}

impl RedeemPipeline {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    async fn last_successful_redeem(&self, user_wallet_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        let last = wallet_tx::Entity
            ::find()
            .filter(wallet_tx::Column::UserWalletId.eq(user_wallet_id))
            .filter(wallet_tx::Column::TxType.eq(WalletTxType::Redeem.as_str()))
            .filter(wallet_tx::Column::Status.eq(TxStatus::Success.as_str()))
            .order_by_desc(wallet_tx::Column::UpdatedAt)
            .one(&self.ctx.db).await?;

        Ok(last.map(|row| row.updated_at))
    }

    /// Validate and book a withdrawal; small ones go straight to the queue.
    pub async fn request_redeem(&self, request: RedeemRequest) -> Result<RedeemReceipt> {
        let destination = request.destination_address.trim().to_lowercase();
        if !self.ctx.adapter.validate_address(&destination) {
            return Err(AppError::InvalidAddress);
        }

        let fee = self.ctx.settlement.withdrawal_fee;
        if request.amount <= fee {
            return Err(AppError::BelowMinimum {
                amount: request.amount.to_string(),
                minimum: fee.to_string(),
            });
        }

        let wallet = self.ctx.users.find_wallet_by_user(request.user_id).await?;

        // Reads for the approval decision happen before the transaction
        let pool = self.ctx.chain().pool_address.clone();
        let pool_balance = match self.ctx.adapter.stable_balance(&pool).await {
            Ok(balance) => Some(balance),
            Err(e) => {
                tracing::warn!(error = %e, "Pool balance unavailable, redeem goes to review");
                None
            }
        };
        let now = Utc::now();
        let auto_approved = should_auto_approve(
            &(ApprovalCheck {
                amount: request.amount,
                threshold: self.ctx.settlement.redeem_auto_approve_below,
                cooldown: self.ctx.settlement.redeem_cooldown,
                last_redeem_at: self.last_successful_redeem(wallet.id).await?,
                pool_balance,
                now,
            })
        );

        let txn = self.ctx.db.begin().await?;
        let wallet = self.ctx.ledger.lock_wallet(&txn, wallet.id).await?;

        let redeemable = self.ctx.ledger.available_redeemable_balance(&txn, &wallet).await?;
        let available = self.ctx.ledger.available_wallet_balance(&txn, &wallet).await?;
        if request.amount > redeemable || request.amount > available {
            return Err(AppError::InsufficientBalance);
        }

        let status = if auto_approved { TxStatus::Pending } else { TxStatus::PendingAdmin };

        let ledger_row = (wallet_tx::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_wallet_id: Set(wallet.id),
            tx_type: Set(WalletTxType::Redeem.to_string()),
            amount: Set(request.amount),
            starting_balance: Set(None),
            ending_balance: Set(None),
            status: Set(status.to_string()),
            tx_hash: Set(None),
            game_usd_tx_id: Set(None),
            escalated: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        }).insert(&txn).await?;

        let redeem = (redeem_tx::ActiveModel {
            id: Set(Uuid::new_v4()),
            wallet_tx_id: Set(ledger_row.id),
            destination_address: Set(destination),
            amount: Set(request.amount),
            fee: Set(fee),
            chain_id: Set(self.ctx.chain().chain_id as i64),
            reviewed_by: Set(None),
            reviewed_at: Set(None),
            review_note: Set(None),
            payout_can_proceed: Set(auto_approved.then_some(true)),
            redeem_tx_hash: Set(None),
            payout_signature: Set(None),
            payout_tx_hash: Set(None),
            payout_status: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }).insert(&txn).await?;

        txn.commit().await?;

        tracing::info!(
            wallet_tx_id = %ledger_row.id,
            amount = %request.amount,
            auto_approved,
            "Redeem requested"
        );

        if auto_approved {
            self.ctx.enqueue_after_commit(PROCESS_REDEEM_JOB, ledger_row.id).await;
        } else {
            self.ctx.notifier.set_admin_notification(
                AdminNotification::info(
                    "redeem_review",
                    "Redeem awaiting review",
                    format!("Redeem of {} to {} needs approval", redeem.amount, redeem.destination_address),
                    Some(ledger_row.id)
                )
            ).await;
        }

        Ok(RedeemReceipt {
            wallet_tx_id: ledger_row.id,
            redeem_tx_id: redeem.id,
            status,
            auto_approved,
        })
    }

    /// Approve or reject a redeem parked for admin review.
    pub async fn review_redeem(&self, wallet_tx_id: Uuid, review: RedeemReview) -> Result<redeem_tx::Model> {
        let now = Utc::now();
        let txn = self.ctx.db.begin().await?;

        let ledger_row = super::find_wallet_tx(&txn, wallet_tx_id).await?;
        self.ctx.ledger.lock_wallet(&txn, ledger_row.user_wallet_id).await?;
        let ledger_row = super::find_wallet_tx(&txn, wallet_tx_id).await?;

        if ledger_row.tx_type != WalletTxType::Redeem.as_str() {
            return Err(AppError::InvalidInput(format!("{} is not a redeem", wallet_tx_id)));
        }
        if ledger_row.status != TxStatus::PendingAdmin.as_str() {
            return Err(
                AppError::InvalidInput(format!("Redeem {} is {}, not awaiting review", wallet_tx_id, ledger_row.status))
            );
        }

        let redeem = find_redeem_by_wallet_tx(&txn, wallet_tx_id).await?;
        let user_wallet_id = ledger_row.user_wallet_id;

        let next_status = if review.approve { TxStatus::Pending } else { TxStatus::Failed };
        let mut ledger_active: wallet_tx::ActiveModel = ledger_row.into();
        ledger_active.status = Set(next_status.to_string());
        ledger_active.updated_at = Set(now);
        ledger_active.update(&txn).await?;

        let mut active: redeem_tx::ActiveModel = redeem.into();
        active.payout_can_proceed = Set(Some(review.approve));
        active.reviewed_by = Set(Some(review.admin_id.clone()));
        active.reviewed_at = Set(Some(now));
        active.review_note = Set(review.note.clone());
        active.updated_at = Set(now);
        let redeem = active.update(&txn).await?;

        txn.commit().await?;

        tracing::info!(
            wallet_tx_id = %wallet_tx_id,
            admin = %review.admin_id,
            approved = review.approve,
            "Redeem reviewed"
        );

        if review.approve {
            self.ctx.enqueue_after_commit(PROCESS_REDEEM_JOB, wallet_tx_id).await;
        } else {
            self.ctx.notify_user(
                user_wallet_id,
                UserNotification::new(
                    "redeem_rejected",
                    "Withdrawal rejected",
                    review.note.unwrap_or_else(|| "Your withdrawal request was rejected.".to_string()),
                    Some(wallet_tx_id)
                )
            ).await;
        }

        Ok(redeem)
    }

    /// Leg a: pull the amount from custody into the pool and sign the payout.
    async fn process_redeem(&self, wallet_tx_id: Uuid) -> Result<()> {
        let ledger_row = super::find_wallet_tx(&self.ctx.db, wallet_tx_id).await?;
        if ledger_row.status != TxStatus::Pending.as_str() {
            return Ok(());
        }

        let redeem = find_redeem_by_wallet_tx(&self.ctx.db, wallet_tx_id).await?;
        if redeem.payout_can_proceed != Some(true) {
            tracing::warn!(wallet_tx_id = %wallet_tx_id, "Redeem not approved, skipping");
            return Ok(());
        }

        let wallet = self.ctx.users.find_wallet(ledger_row.user_wallet_id).await?;
        let signer = wallet.wallet_address.clone();

        let redeem_hash = match redeem.redeem_tx_hash.clone() {
            Some(hash) => hash,
            None => {
                self.ctx.adapter.ensure_gas(&signer).await?;
                let call = ContractCall::Redeem {
                    amount: redeem.amount,
                    to: self.ctx.chain().pool_address.clone(),
                };
                let hash = self.ctx.adapter.submit_and_confirm(&signer, &call).await?;

                let recorded = redeem_tx::Entity
                    ::update_many()
                    .col_expr(redeem_tx::Column::RedeemTxHash, Expr::value(hash.as_str()))
                    .col_expr(redeem_tx::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(redeem_tx::Column::Id.eq(redeem.id))
                    .exec(&self.ctx.db).await;
                if let Err(e) = recorded {
                    let e = AppError::from(e);
                    tracing::error!(wallet_tx_id = %wallet_tx_id, tx_hash = %hash, error = %e, "Redeem hash not recorded");
                    self.ctx.hold_and_escalate(wallet_tx_id, &e).await;
                    return Ok(());
                }
                hash
            }
        };

        let payout_amount = redeem.amount - redeem.fee;
        let signature = self.ctx.adapter.sign_payout(
            &redeem.destination_address,
            payout_amount,
            &redeem.id.to_string()
        ).await?;

        let redeem_id = redeem.id;
        let finalized = async {
            let txn = self.ctx.db.begin().await?;
            self.ctx.ledger.finalize_wallet_tx(&txn, wallet_tx_id, Some(redeem_hash.clone())).await?;

            let mut active: redeem_tx::ActiveModel = redeem.into();
            active.redeem_tx_hash = Set(Some(redeem_hash.clone()));
            active.payout_signature = Set(Some(signature));
            active.payout_status = Set(Some(PAYOUT_PENDING.to_string()));
            active.updated_at = Set(Utc::now());
            active.update(&txn).await?;

            txn.commit().await?;
            Ok::<_, AppError>(())
        }.await;

        if let Err(e) = finalized {
            tracing::error!(wallet_tx_id = %wallet_tx_id, tx_hash = %redeem_hash, error = %e, "Redeem finalization failed");
            self.ctx.hold_and_escalate(wallet_tx_id, &e).await;
            return Ok(());
        }

        tracing::info!(wallet_tx_id = %wallet_tx_id, redeem_tx_id = %redeem_id, "Redeem leg confirmed");

        self.ctx.notifier.set_user_notification(
            wallet.user_id,
            UserNotification::new(
                "redeem_processing",
                "Withdrawal processing",
                format!("Your withdrawal of {} is being paid out.", payout_amount),
                Some(wallet_tx_id)
            )
        ).await;

        Ok(())
    }

    /// Enqueue payouts whose redeem leg has confirmed. Returns how many are waiting.
    pub async fn run_payout_sweep(&self) -> Result<usize> {
        let ready = redeem_tx::Entity
            ::find()
            .filter(redeem_tx::Column::PayoutSignature.is_not_null())
            .filter(redeem_tx::Column::PayoutStatus.eq(PAYOUT_PENDING))
            .order_by_asc(redeem_tx::Column::CreatedAt)
            .all(&self.ctx.db).await?;

        for redeem in &ready {
            self.ctx.enqueue(PROCESS_PAYOUT_JOB, redeem.id).await?;
        }

        Ok(ready.len())
    }

    /// Leg b: release `amount - fee` from the pool to the destination.
    async fn process_payout(&self, redeem_tx_id: Uuid) -> Result<()> {
        let redeem = find_redeem(&self.ctx.db, redeem_tx_id).await?;
        if redeem.payout_status.as_deref() != Some(PAYOUT_PENDING) {
            return Ok(());
        }

        // A payout whose hash is on the row has already been sent
        let tx_hash = match redeem.payout_tx_hash.clone() {
            Some(hash) => hash,
            None => {
                let signature = redeem.payout_signature
                    .clone()
                    .ok_or_else(|| AppError::Internal(format!("Redeem {} has no payout signature", redeem.id)))?;

                let signer = self.ctx.chain().payout_signer_address.clone();
                self.ctx.adapter.ensure_gas(&signer).await?;

                let call = ContractCall::Payout {
                    amount: redeem.amount - redeem.fee,
                    to: redeem.destination_address.clone(),
                    signature,
                };
                self.ctx.adapter.submit_and_confirm(&signer, &call).await?
            }
        };

        let wallet_tx_id = redeem.wallet_tx_id;
        let mut active: redeem_tx::ActiveModel = redeem.into();
        active.payout_status = Set(Some(PAYOUT_SUCCESS.to_string()));
        active.payout_tx_hash = Set(Some(tx_hash.clone()));
        active.updated_at = Set(Utc::now());
        if let Err(e) = active.update(&self.ctx.db).await {
            let e = AppError::from(e);
            tracing::error!(redeem_tx_id = %redeem_tx_id, tx_hash = %tx_hash, error = %e, "Payout not recorded");
            self.hold_payout(redeem_tx_id, wallet_tx_id, &tx_hash, &e).await;
            return Ok(());
        }

        tracing::info!(redeem_tx_id = %redeem_tx_id, tx_hash = %tx_hash, "Payout sent");

        let ledger_row = super::find_wallet_tx(&self.ctx.db, wallet_tx_id).await?;
        self.ctx.notify_user(
            ledger_row.user_wallet_id,
            UserNotification::new(
                "redeem_paid",
                "Withdrawal sent",
                format!("Your withdrawal was sent in transaction {}.", tx_hash),
                Some(wallet_tx_id)
            )
        ).await;

        Ok(())
    }

    async fn redeem_failed(&self, wallet_tx_id: Uuid, attempts: i32, error: &AppError) -> Result<()> {
        let redeem = find_redeem_by_wallet_tx(&self.ctx.db, wallet_tx_id).await?;

        // The user's tokens already sit in the pool
        if redeem.redeem_tx_hash.is_some() {
            self.ctx.hold_and_escalate(wallet_tx_id, error).await;
            return Ok(());
        }

        if !self.ctx.ledger.fail_wallet_tx(&self.ctx.db, wallet_tx_id).await? {
            return Ok(());
        }

        self.ctx.escalate(
            "redeem_failed",
            "Redeem failed",
            format!("Redeem {} failed after {} attempts: {}", wallet_tx_id, attempts, error),
            Some(wallet_tx_id)
        ).await;

        let ledger_row = super::find_wallet_tx(&self.ctx.db, wallet_tx_id).await?;
        self.ctx.notify_user(
            ledger_row.user_wallet_id,
            UserNotification::new(
                "redeem_failed",
                "Withdrawal failed",
                "Your withdrawal could not be processed and your balance is unchanged.".to_string(),
                Some(wallet_tx_id)
            )
        ).await;

        Ok(())
    }

    /// Park a payout that went out on chain but could not be marked sent.
    async fn hold_payout(&self, redeem_tx_id: Uuid, wallet_tx_id: Uuid, tx_hash: &str, cause: &AppError) {
        let result = redeem_tx::Entity
            ::update_many()
            .col_expr(redeem_tx::Column::PayoutStatus, Expr::value(TxStatus::PendingDeveloper.as_str()))
            .col_expr(redeem_tx::Column::PayoutTxHash, Expr::value(tx_hash))
            .col_expr(redeem_tx::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(redeem_tx::Column::Id.eq(redeem_tx_id))
            .exec(&self.ctx.db).await;

        if let Err(e) = result {
            tracing::error!(redeem_tx_id = %redeem_tx_id, error = %e, "Could not park payout");
        }

        self.ctx.escalate(
            "payout_rollback",
            "Payout needs manual review",
            format!("Payout {} confirmed as {} but could not be recorded: {}", redeem_tx_id, tx_hash, cause),
            Some(wallet_tx_id)
        ).await;
    }

    async fn payout_failed(&self, redeem_tx_id: Uuid, attempts: i32, error: &AppError) -> Result<()> {
        let result = redeem_tx::Entity
            ::update_many()
            .col_expr(redeem_tx::Column::PayoutStatus, Expr::value(PAYOUT_FAILED))
            .col_expr(redeem_tx::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(redeem_tx::Column::Id.eq(redeem_tx_id))
            .filter(redeem_tx::Column::PayoutStatus.eq(PAYOUT_PENDING))
            .exec(&self.ctx.db).await?;

        if result.rows_affected == 0 {
            return Ok(());
        }

        let redeem = find_redeem(&self.ctx.db, redeem_tx_id).await?;
        self.ctx.escalate(
            "payout_failed",
            "Payout failed",
            format!(
                "Payout of {} to {} failed after {} attempts: {}",
                redeem.amount - redeem.fee,
                redeem.destination_address,
                attempts,
                error
            ),
            Some(redeem.wallet_tx_id)
        ).await;

        Ok(())
    }
}

async fn find_redeem<C: ConnectionTrait>(conn: &C, id: Uuid) -> Result<redeem_tx::Model> {
    redeem_tx::Entity
        ::find_by_id(id)
        .one(conn).await?
        .ok_or_else(|| AppError::NotFound(format!("redeem {}", id)))
}

async fn find_redeem_by_wallet_tx<C: ConnectionTrait>(conn: &C, wallet_tx_id: Uuid) -> Result<redeem_tx::Model> {
    redeem_tx::Entity
        ::find()
        .filter(redeem_tx::Column::WalletTxId.eq(wallet_tx_id))
        .one(conn).await?
        .ok_or_else(|| AppError::NotFound(format!("redeem of wallet tx {}", wallet_tx_id)))
}

#[async_trait]
impl JobHandler for RedeemPipeline {
    async fn handle(&self, job: &Job) -> Result<()> {
        let payload: RowPayload = job.payload()?;
        match job.job_type.as_str() {
            PROCESS_REDEEM_JOB => self.process_redeem(payload.id).await,
            PROCESS_PAYOUT_JOB => self.process_payout(payload.id).await,
            other => Err(AppError::Internal(format!("Unexpected job type {}", other))),
        }
    }

    async fn on_failure(&self, job: &Job, error: &AppError) -> Result<()> {
        let payload: RowPayload = job.payload()?;
        match job.job_type.as_str() {
            PROCESS_REDEEM_JOB => self.redeem_failed(payload.id, job.attempts_made, error).await,
            PROCESS_PAYOUT_JOB => self.payout_failed(payload.id, job.attempts_made, error).await,
            other => Err(AppError::Internal(format!("Unexpected job type {}", other))),
        }
    }
}
