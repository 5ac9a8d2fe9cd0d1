pub mod bet;
pub mod claim;
pub mod credit;
pub mod deposit;
pub mod prize;
pub mod redeem;

use sea_orm::{ entity::prelude::*, sea_query::Expr, ConnectionTrait, DatabaseConnection };
use serde::{ Deserialize, Serialize };
use std::fmt::Display;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{ ChainConfig, SettlementConfig };
use crate::db::entity::wallet_tx;
use crate::db::UserRepository;
use crate::error::{ AppError, Result };
use crate::queue::{ JobOptions, JobQueue, SETTLEMENT_QUEUE };
use crate::services::{ AdminNotification, LedgerService, Notifier, SettlementAdapter, UserNotification };

pub use bet::BetPipeline;
pub use claim::ClaimPipeline;
pub use credit::CreditPipeline;
pub use deposit::DepositPipeline;
pub use redeem::RedeemPipeline;

pub const SUBMIT_BET_JOB: &str = "submit_bet";
pub const SUBMIT_CLAIM_JOB: &str = "submit_claim";
pub const PROCESS_REDEEM_JOB: &str = "process_redeem";
pub const PROCESS_PAYOUT_JOB: &str = "process_payout";
pub const MINT_CREDIT_JOB: &str = "mint_credit";
pub const REVOKE_CREDIT_JOB: &str = "revoke_credit";

/// Job ids are derived from the ledger row so re-enqueueing is always safe.
pub fn job_id(job_type: &str, row_id: impl Display) -> String {
    format!("{}_{}", job_type, row_id)
}

/// Payload of every settlement job: the id of the row it advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowPayload {
    pub id: Uuid,
}

/// Collaborators shared by the settlement pipelines.
pub struct PipelineContext {
    pub db: DatabaseConnection,
    pub ledger: Arc<LedgerService>,
    pub adapter: Arc<SettlementAdapter>,
    pub queue: Arc<JobQueue>,
    pub notifier: Arc<dyn Notifier>,
    pub users: Arc<UserRepository>,
    pub settlement: SettlementConfig,
}

impl PipelineContext {
    pub fn new(
        db: DatabaseConnection,
        adapter: Arc<SettlementAdapter>,
        queue: Arc<JobQueue>,
        notifier: Arc<dyn Notifier>,
        settlement: SettlementConfig
    ) -> Self {
        Self {
            ledger: Arc::new(LedgerService::new(db.clone())),
            users: Arc::new(UserRepository::new(db.clone())),
            db,
            adapter,
            queue,
            notifier,
            settlement,
        }
    }

    pub fn chain(&self) -> &ChainConfig {
        self.adapter.chain_config()
    }

    fn job_options(&self) -> JobOptions {
        JobOptions {
            attempts: self.settlement.job_attempts,
            backoff: self.settlement.job_backoff,
            ..JobOptions::default()
        }
    }

    /// Enqueue the settlement job advancing `row_id`. No-op if it is already queued.
    pub async fn enqueue(&self, job_type: &str, row_id: Uuid) -> Result<bool> {
        self.queue.add_job(
            SETTLEMENT_QUEUE,
            job_type,
            &job_id(job_type, row_id),
            &(RowPayload { id: row_id }),
            Some(self.job_options())
        ).await
    }

    /// Enqueue after a commit. A lost enqueue is picked up by the reconciler,
    /// so the error is only logged.
    pub async fn enqueue_after_commit(&self, job_type: &str, row_id: Uuid) {
        if let Err(e) = self.enqueue(job_type, row_id).await {
            tracing::warn!(job_type, row_id = %row_id, error = %e, "Enqueue failed, reconciler will retry");
        }
    }

    pub async fn escalate(&self, kind: &str, title: &str, message: String, wallet_tx_id: Option<Uuid>) {
        self.notifier.set_admin_notification(
            AdminNotification::escalation(kind, title, message, wallet_tx_id)
        ).await;
    }

    pub async fn notify_user(&self, user_wallet_id: Uuid, notification: UserNotification) {
        match self.users.find_wallet(user_wallet_id).await {
            Ok(wallet) => self.notifier.set_user_notification(wallet.user_id, notification).await,
            Err(e) => tracing::warn!(user_wallet_id = %user_wallet_id, error = %e, "Cannot notify user"),
        }
    }

    /// Park a wallet row after its ledger commit failed and tell the operators.
    ///
    /// Used whenever an on-chain leg may already have moved funds, so the row
    /// must never be retried or failed automatically.
    pub async fn hold_and_escalate(&self, wallet_tx_id: Uuid, cause: &AppError) {
        if let Err(e) = self.ledger.hold_for_developer(&self.db, wallet_tx_id).await {
            tracing::error!(wallet_tx_id = %wallet_tx_id, error = %e, "Could not park wallet tx");
        }
        if let Err(e) = mark_escalated(&self.db, wallet_tx_id).await {
            tracing::error!(wallet_tx_id = %wallet_tx_id, error = %e, "Could not flag escalation");
        }

        self.escalate(
            "ledger_rollback",
            "Settlement needs manual review",
            format!("Wallet tx {} was parked after a failed commit: {}", wallet_tx_id, cause),
            Some(wallet_tx_id)
        ).await;
    }
}

/// Record that operators were told about a parked row.
pub async fn mark_escalated<C: ConnectionTrait>(conn: &C, wallet_tx_id: Uuid) -> Result<bool> {
    let result = wallet_tx::Entity
        ::update_many()
        .col_expr(wallet_tx::Column::Escalated, Expr::value(true))
        .filter(wallet_tx::Column::Id.eq(wallet_tx_id))
        .filter(wallet_tx::Column::Escalated.eq(false))
        .exec(conn).await?;

    Ok(result.rows_affected > 0)
}

/// Store the hash of a confirmed leg so a retry does not submit it twice.
pub async fn record_wallet_tx_hash<C: ConnectionTrait>(
    conn: &C,
    wallet_tx_id: Uuid,
    tx_hash: &str
) -> Result<()> {
    wallet_tx::Entity
        ::update_many()
        .col_expr(wallet_tx::Column::TxHash, Expr::value(tx_hash))
        .col_expr(wallet_tx::Column::UpdatedAt, Expr::value(chrono::Utc::now()))
        .filter(wallet_tx::Column::Id.eq(wallet_tx_id))
        .exec(conn).await?;

    Ok(())
}

pub async fn find_wallet_tx<C: ConnectionTrait>(conn: &C, id: Uuid) -> Result<wallet_tx::Model> {
    wallet_tx::Entity
        ::find_by_id(id)
        .one(conn).await?
        .ok_or_else(|| AppError::NotFound(format!("wallet tx {}", id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_ids_are_derived_from_rows() {
        let id = Uuid::parse_str("6f1c1f8e-2b43-4d3c-9a8e-0a3c0b1f5e11").unwrap();
        assert_eq!(job_id(SUBMIT_BET_JOB, id), "submit_bet_6f1c1f8e-2b43-4d3c-9a8e-0a3c0b1f5e11");
        assert_eq!(job_id(PROCESS_PAYOUT_JOB, id), job_id(PROCESS_PAYOUT_JOB, id));
    }

    #[test]
    fn test_row_payload_shape() {
        let id = Uuid::new_v4();
        let value = serde_json::to_value(RowPayload { id }).unwrap();
        assert_eq!(value, serde_json::json!({ "id": id.to_string() }));
    }
}
