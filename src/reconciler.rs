use sea_orm::{ entity::prelude::*, QueryOrder };
use std::sync::Arc;
use uuid::Uuid;

use crate::db::entity::{ credit_wallet_tx, redeem_tx, wallet_tx };
use crate::enums::{ CreditTxType, TxStatus, WalletTxType };
use crate::error::Result;
use crate::pipelines::{
    self,
    PipelineContext,
    MINT_CREDIT_JOB,
    PROCESS_REDEEM_JOB,
    SUBMIT_BET_JOB,
    SUBMIT_CLAIM_JOB,
};

/// What one reconciliation pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub released_jobs: u64,
    pub requeued: usize,
    pub escalated: usize,
    pub purged_jobs: u64,
}

/// Job that advances a pending wallet row of this type, if any.
pub fn job_for_wallet_tx(tx_type: WalletTxType) -> Option<&'static str> {
    match tx_type {
        WalletTxType::Play => Some(SUBMIT_BET_JOB),
        WalletTxType::Claim | WalletTxType::ClaimJackpot => Some(SUBMIT_CLAIM_JOB),
        WalletTxType::Redeem => Some(PROCESS_REDEEM_JOB),
        // Deposits and referrals are driven by the escrow and mint sweeps
        WalletTxType::Deposit | WalletTxType::Referral | WalletTxType::InternalTransfer => None,
    }
}

/// Resumes work lost between a commit and its enqueue, and keeps the queue tidy.
pub struct Reconciler {
    ctx: Arc<PipelineContext>,
}

impl Reconciler {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    pub async fn run(&self) -> Result<ReconcileReport> {
        let settlement = &self.ctx.settlement;

        let released_jobs = self.ctx.queue.release_stale(settlement.job_lease).await?;
        let requeued = self.requeue_stuck().await?;
        let escalated = self.escalate_held().await?;
        let purged_jobs = self.ctx.queue.purge_finished(settlement.job_retention).await?;

        let report = ReconcileReport { released_jobs, requeued, escalated, purged_jobs };
        if report != ReconcileReport::default() {
            tracing::info!(
                released_jobs,
                requeued,
                escalated,
                purged_jobs,
                "Reconciliation pass finished"
            );
        }

        Ok(report)
    }

    async fn requeue_stuck(&self) -> Result<usize> {
        let cutoff = chrono::Utc::now() - self.ctx.settlement.stuck_threshold;
        let mut requeued = 0;

        let stuck = wallet_tx::Entity
            ::find()
            .filter(wallet_tx::Column::Status.eq(TxStatus::Pending.as_str()))
            .filter(wallet_tx::Column::CreatedAt.lt(cutoff))
            .order_by_asc(wallet_tx::Column::CreatedAt)
            .all(&self.ctx.db).await?;

        for row in stuck {
            let tx_type: WalletTxType = row.tx_type.parse()?;
            let Some(job_type) = job_for_wallet_tx(tx_type) else {
                continue;
            };

            // Redeems only move once approved
            if tx_type == WalletTxType::Redeem && !self.redeem_approved(row.id).await? {
                continue;
            }

            if self.requeue(job_type, row.id).await? {
                requeued += 1;
            }
        }

        let stuck_credits = credit_wallet_tx::Entity
            ::find()
            .filter(credit_wallet_tx::Column::TxType.eq(CreditTxType::Credit.as_str()))
            .filter(credit_wallet_tx::Column::Status.eq(TxStatus::Pending.as_str()))
            .filter(credit_wallet_tx::Column::CreatedAt.lt(cutoff))
            .all(&self.ctx.db).await?;

        for row in stuck_credits {
            if self.requeue(MINT_CREDIT_JOB, row.id).await? {
                requeued += 1;
            }
        }

        Ok(requeued)
    }

    async fn redeem_approved(&self, wallet_tx_id: Uuid) -> Result<bool> {
        let redeem = redeem_tx::Entity
            ::find()
            .filter(redeem_tx::Column::WalletTxId.eq(wallet_tx_id))
            .one(&self.ctx.db).await?;

        Ok(redeem.is_some_and(|r| r.payout_can_proceed == Some(true)))
    }

    async fn requeue(&self, job_type: &str, row_id: Uuid) -> Result<bool> {
        if self.ctx.queue.job_exists(&pipelines::job_id(job_type, row_id)).await? {
            return Ok(false);
        }

        tracing::warn!(job_type, row_id = %row_id, "Re-enqueueing stuck row");
        self.ctx.enqueue(job_type, row_id).await
    }

    /// Tell operators about parked rows, once per row.
    async fn escalate_held(&self) -> Result<usize> {
        let held = wallet_tx::Entity
            ::find()
            .filter(wallet_tx::Column::Status.eq(TxStatus::PendingDeveloper.as_str()))
            .filter(wallet_tx::Column::Escalated.eq(false))
            .all(&self.ctx.db).await?;

        let mut escalated = 0;
        for row in held {
            if !pipelines::mark_escalated(&self.ctx.db, row.id).await? {
                continue;
            }

            self.ctx.escalate(
                "held_for_developer",
                "Ledger row on hold",
                format!("{} wallet tx {} of {} is waiting for manual review", row.tx_type, row.id, row.amount),
                Some(row.id)
            ).await;
            escalated += 1;
        }

        Ok(escalated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_driven_rows_have_no_job() {
        assert_eq!(job_for_wallet_tx(WalletTxType::Play), Some(SUBMIT_BET_JOB));
        assert_eq!(job_for_wallet_tx(WalletTxType::Claim), Some(SUBMIT_CLAIM_JOB));
        assert_eq!(job_for_wallet_tx(WalletTxType::Redeem), Some(PROCESS_REDEEM_JOB));
        assert_eq!(job_for_wallet_tx(WalletTxType::Deposit), None);
        assert_eq!(job_for_wallet_tx(WalletTxType::Referral), None);
    }
}
