use async_trait::async_trait;
use chrono::{ DateTime, Utc };
use sea_orm::{ entity::prelude::*, sea_query::Expr, QueryOrder, Set, TransactionTrait };
use serde::{ Deserialize, Serialize };
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::entity::credit_wallet_tx;
use crate::enums::{ CreditTxType, TxStatus };
use crate::error::{ AppError, Result };
use crate::providers::ContractCall;
use crate::queue::{ Job, JobHandler };
use crate::services::UserNotification;

use super::{ PipelineContext, RowPayload, MINT_CREDIT_JOB, REVOKE_CREDIT_JOB };

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditGrant {
    pub user_wallet_id: Uuid,
    pub amount: Decimal,
    pub expiration_date: DateTime<Utc>,
    #[serde(default)]
    pub campaign: Option<String>,
}

/// Expired issuance rows of one wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiryBatch {
    pub user_wallet_id: Uuid,
    pub row_ids: Vec<Uuid>,
    pub expired_total: Decimal,
}

/// Group expired rows per wallet, keeping wallets in a stable order.
pub fn group_expired(rows: &[credit_wallet_tx::Model]) -> Vec<ExpiryBatch> {
    let mut batches: BTreeMap<Uuid, ExpiryBatch> = BTreeMap::new();
    for row in rows {
        let batch = batches.entry(row.user_wallet_id).or_insert_with(|| ExpiryBatch {
            user_wallet_id: row.user_wallet_id,
            row_ids: Vec::new(),
            expired_total: Decimal::ZERO,
        });
        batch.row_ids.push(row.id);
        batch.expired_total += row.amount;
    }
    batches.into_values().collect()
}

/// Credit already spent or reserved by bets cannot expire.
pub fn expiry_amount(expired_total: Decimal, available_credit: Decimal) -> Decimal {
    expired_total.min(available_credit).max(Decimal::ZERO)
}

/// Promotional credit: issuance, on-chain mint and periodic expiry.
pub struct CreditPipeline {
    ctx: Arc<PipelineContext>,
}

impl CreditPipeline {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Book a credit grant; it lands on the balance once minted.
    pub async fn issue_credit(&self, grant: CreditGrant) -> Result<credit_wallet_tx::Model> {
        if grant.amount <= Decimal::ZERO {
            return Err(AppError::InvalidInput("Credit amount must be positive".to_string()));
        }
        let now = Utc::now();
        if grant.expiration_date <= now {
            return Err(AppError::InvalidInput("Credit must expire in the future".to_string()));
        }

        let wallet = self.ctx.users.find_wallet(grant.user_wallet_id).await?;

        let row = (credit_wallet_tx::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_wallet_id: Set(wallet.id),
            tx_type: Set(CreditTxType::Credit.to_string()),
            amount: Set(grant.amount),
            starting_balance: Set(None),
            ending_balance: Set(None),
            status: Set(TxStatus::Pending.to_string()),
            campaign: Set(grant.campaign),
            expiration_date: Set(Some(grant.expiration_date)),
            wallet_tx_id: Set(None),
            tx_hash: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }).insert(&self.ctx.db).await?;

        tracing::info!(credit_tx_id = %row.id, amount = %row.amount, "Credit issued");

        self.ctx.enqueue_after_commit(MINT_CREDIT_JOB, row.id).await;
        Ok(row)
    }

    async fn mint_credit(&self, credit_tx_id: Uuid) -> Result<()> {
        let row = find_credit_tx(&self.ctx.db, credit_tx_id).await?;
        if row.status != TxStatus::Pending.as_str() {
            return Ok(());
        }

        let wallet = self.ctx.users.find_wallet(row.user_wallet_id).await?;
        let signer = self.ctx.chain().deposit_bot_address.clone();

        let tx_hash = match row.tx_hash.clone() {
            Some(hash) => hash,
            None => {
                let call = ContractCall::DepositCredit {
                    user: wallet.wallet_address.clone(),
                    amount: row.amount,
                };
                let hash = self.ctx.adapter.submit_and_confirm(&signer, &call).await?;
                if let Err(e) = record_credit_tx_hash(&self.ctx.db, credit_tx_id, &hash).await {
                    tracing::error!(credit_tx_id = %credit_tx_id, tx_hash = %hash, error = %e, "Credit hash not recorded");
                    self.hold_credit(credit_tx_id, &e).await;
                    return Ok(());
                }
                hash
            }
        };

        let finalized = async {
            let txn = self.ctx.db.begin().await?;
            self.ctx.ledger.finalize_credit_tx(&txn, credit_tx_id, Some(tx_hash.clone())).await?;
            txn.commit().await?;
            Ok::<_, AppError>(())
        }.await;

        if let Err(e) = finalized {
            tracing::error!(credit_tx_id = %credit_tx_id, tx_hash = %tx_hash, error = %e, "Credit finalization failed");
            self.hold_credit(credit_tx_id, &e).await;
            return Ok(());
        }

        self.ctx.notifier.set_user_notification(
            wallet.user_id,
            UserNotification::new(
                "credit_granted",
                "Credit added",
                format!("{} in game credit was added to your wallet.", row.amount),
                None
            )
        ).await;

        Ok(())
    }

    async fn hold_credit(&self, credit_tx_id: Uuid, cause: &AppError) {
        let result = credit_wallet_tx::Entity
            ::update_many()
            .col_expr(credit_wallet_tx::Column::Status, Expr::value(TxStatus::PendingDeveloper.as_str()))
            .col_expr(credit_wallet_tx::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(credit_wallet_tx::Column::Id.eq(credit_tx_id))
            .exec(&self.ctx.db).await;
        if let Err(e) = result {
            tracing::error!(credit_tx_id = %credit_tx_id, error = %e, "Could not park credit tx");
        }

        self.ctx.escalate(
            "credit_rollback",
            "Credit needs manual review",
            format!("Credit tx {} was minted but could not be recorded: {}", credit_tx_id, cause),
            None
        ).await;
    }

    /// Expire credit past its expiration date. Returns the wallets touched.
    pub async fn run_credit_expiry(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired = credit_wallet_tx::Entity
            ::find()
            .filter(credit_wallet_tx::Column::TxType.eq(CreditTxType::Credit.as_str()))
            .filter(credit_wallet_tx::Column::Status.eq(TxStatus::Success.as_str()))
            .filter(credit_wallet_tx::Column::ExpirationDate.lt(now))
            .order_by_asc(credit_wallet_tx::Column::CreatedAt)
            .all(&self.ctx.db).await?;

        let batches = group_expired(&expired);
        let count = batches.len();
        for batch in batches {
            let wallet_id = batch.user_wallet_id;
            match self.expire_batch(batch, now).await {
                Ok(Some(expiry_id)) => self.ctx.enqueue_after_commit(REVOKE_CREDIT_JOB, expiry_id).await,
                Ok(None) => {}
                Err(e) => tracing::error!(user_wallet_id = %wallet_id, error = %e, "Credit expiry failed"),
            }
        }

        Ok(count)
    }

    /// Book one wallet's expiry. Returns the EXPIRY row when balance was removed.
    async fn expire_batch(&self, batch: ExpiryBatch, now: DateTime<Utc>) -> Result<Option<Uuid>> {
        let txn = self.ctx.db.begin().await?;
        let wallet = self.ctx.ledger.lock_wallet(&txn, batch.user_wallet_id).await?;

        // Credit reserved by pending bets is spent already and cannot expire
        let available = self.ctx.ledger.available_credit_balance(&txn, &wallet).await?;
        let amount = expiry_amount(batch.expired_total, available);

        let expiry_id = if amount > Decimal::ZERO {
            let entry = self.ctx.ledger.apply_credit_entry(&txn, wallet.id, CreditTxType::Expiry, amount).await?;
            let row = (credit_wallet_tx::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_wallet_id: Set(wallet.id),
                tx_type: Set(CreditTxType::Expiry.to_string()),
                amount: Set(amount),
                starting_balance: Set(Some(entry.starting_balance)),
                ending_balance: Set(Some(entry.ending_balance)),
                status: Set(TxStatus::Success.to_string()),
                campaign: Set(None),
                expiration_date: Set(None),
                wallet_tx_id: Set(None),
                tx_hash: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            }).insert(&txn).await?;
            Some(row.id)
        } else {
            None
        };

        credit_wallet_tx::Entity
            ::update_many()
            .col_expr(credit_wallet_tx::Column::Status, Expr::value(TxStatus::Expired.as_str()))
            .col_expr(credit_wallet_tx::Column::UpdatedAt, Expr::value(now))
            .filter(credit_wallet_tx::Column::Id.is_in(batch.row_ids.iter().copied()))
            .filter(credit_wallet_tx::Column::Status.eq(TxStatus::Success.as_str()))
            .exec(&txn).await?;

        txn.commit().await?;

        tracing::info!(
            user_wallet_id = %wallet.id,
            expired = %batch.expired_total,
            removed = %amount,
            rows = batch.row_ids.len(),
            "Credit expired"
        );

        Ok(expiry_id)
    }

    /// Mirror an expiry on the credit contract.
    async fn revoke_credit(&self, expiry_id: Uuid) -> Result<()> {
        let row = find_credit_tx(&self.ctx.db, expiry_id).await?;
        if row.tx_hash.is_some() {
            return Ok(());
        }

        let wallet = self.ctx.users.find_wallet(row.user_wallet_id).await?;
        let call = ContractCall::RevokeCredit {
            user: wallet.wallet_address,
            amount: row.amount,
        };

        let signer = self.ctx.chain().deposit_bot_address.clone();
        let hash = self.ctx.adapter.submit_and_confirm(&signer, &call).await?;
        if let Err(e) = record_credit_tx_hash(&self.ctx.db, expiry_id, &hash).await {
            tracing::error!(expiry_id = %expiry_id, tx_hash = %hash, error = %e, "Revoke hash not recorded");
            self.ctx.escalate(
                "credit_revoke_unrecorded",
                "Credit revoke needs manual review",
                format!("Expiry {} was revoked on chain as {} but not recorded: {}", expiry_id, hash, e),
                None
            ).await;
            return Ok(());
        }

        tracing::info!(expiry_id = %expiry_id, tx_hash = %hash, "Credit revoked on chain");
        Ok(())
    }
}

async fn find_credit_tx<C: ConnectionTrait>(conn: &C, id: Uuid) -> Result<credit_wallet_tx::Model> {
    credit_wallet_tx::Entity
        ::find_by_id(id)
        .one(conn).await?
        .ok_or_else(|| AppError::NotFound(format!("credit tx {}", id)))
}

async fn record_credit_tx_hash<C: ConnectionTrait>(conn: &C, id: Uuid, tx_hash: &str) -> Result<()> {
    credit_wallet_tx::Entity
        ::update_many()
        .col_expr(credit_wallet_tx::Column::TxHash, Expr::value(tx_hash))
        .col_expr(credit_wallet_tx::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(credit_wallet_tx::Column::Id.eq(id))
        .exec(conn).await?;

    Ok(())
}

#[async_trait]
impl JobHandler for CreditPipeline {
    async fn handle(&self, job: &Job) -> Result<()> {
        let payload: RowPayload = job.payload()?;
        match job.job_type.as_str() {
            MINT_CREDIT_JOB => self.mint_credit(payload.id).await,
            REVOKE_CREDIT_JOB => self.revoke_credit(payload.id).await,
            other => Err(AppError::Internal(format!("Unexpected job type {}", other))),
        }
    }

    async fn on_failure(&self, job: &Job, error: &AppError) -> Result<()> {
        let payload: RowPayload = job.payload()?;
        match job.job_type.as_str() {
            MINT_CREDIT_JOB => {
                let row = find_credit_tx(&self.ctx.db, payload.id).await?;
                if row.tx_hash.is_some() {
                    self.hold_credit(payload.id, error).await;
                    return Ok(());
                }
                if self.ctx.ledger.fail_credit_tx(&self.ctx.db, payload.id).await? {
                    self.ctx.escalate(
                        "credit_mint_failed",
                        "Credit mint failed",
                        format!("Credit tx {} failed after {} attempts: {}", payload.id, job.attempts_made, error),
                        None
                    ).await;
                }
                Ok(())
            }
            REVOKE_CREDIT_JOB => {
                // The ledger already removed the credit, only the chain lags behind
                self.ctx.escalate(
                    "credit_revoke_failed",
                    "Credit revoke failed",
                    format!("Expiry {} was not mirrored on chain: {}", payload.id, error),
                    None
                ).await;
                Ok(())
            }
            other => Err(AppError::Internal(format!("Unexpected job type {}", other))),
        }
    }
}
