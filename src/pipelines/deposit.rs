use sea_orm::{
    entity::prelude::*,
    sea_query::Expr,
    DatabaseTransaction,
    QueryOrder,
    Set,
    TransactionTrait,
};
use chrono::{ DateTime, Utc };
use serde::{ Deserialize, Serialize };
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::db::entity::{ deposit_tx, game_usd_tx, user, wallet_tx };
use crate::enums::{ TxStatus, WalletTxType };
use crate::error::{ AppError, Result };
use crate::providers::ContractCall;
use crate::queue::backoff;
use crate::services::ledger_service::referral_commission;
use crate::services::UserNotification;

use super::PipelineContext;

/// Incoming transfer reported by the chain watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRequest {
    pub chain_id: u64,
    pub sender_address: String,
    pub receiver_address: String,
    pub amount: Decimal,
    pub tx_hash: String,
}

/// Commission to book for the referrer of a freshly minted deposit.
#[derive(Debug, Clone)]
struct ReferralPlan {
    deposit_wallet_tx_id: Uuid,
    referrer_wallet_id: Uuid,
    referrer_address: String,
    amount: Decimal,
}

/// Referral cascade problems never fail the deposit itself.
#[derive(Debug, Clone)]
struct ReferralIssue {
    deposit_wallet_tx_id: Uuid,
    reason: String,
}

/// Whether a row that already failed `retry_count` times has waited out its
/// backoff since the last attempt.
pub fn retry_due(retry_count: i32, last_attempt: DateTime<Utc>, base: Duration, now: DateTime<Utc>) -> bool {
    if retry_count <= 0 {
        return true;
    }
    let wait = chrono::Duration
        ::from_std(backoff::exponential(base, retry_count))
        .unwrap_or_else(|_| chrono::Duration::zero());
    last_attempt + wait <= now
}

/// `RECEIVED → ESCROWED → MINTED` for external deposits.
///
/// Both on-chain legs are driven by sweeps that bound re-submission with the
/// row's `retry_count`.
pub struct DepositPipeline {
    ctx: Arc<PipelineContext>,
}

impl DepositPipeline {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Record a deposit that arrived at a user's custody address.
    ///
    /// Replaying the same on-chain hash returns the existing row.
    pub async fn process_deposit(&self, request: DepositRequest) -> Result<deposit_tx::Model> {
        let minimum = self.ctx.settlement.min_deposit;
        if request.amount < minimum {
            return Err(AppError::BelowMinimum {
                amount: request.amount.to_string(),
                minimum: minimum.to_string(),
            });
        }
        if request.chain_id != self.ctx.chain().chain_id {
            return Err(AppError::InvalidInput(format!("Unsupported chain {}", request.chain_id)));
        }

        let receiver = request.receiver_address.to_lowercase();
        let tx_hash = request.tx_hash.to_lowercase();

        if let Some(existing) = deposit_tx::Entity
            ::find()
            .filter(deposit_tx::Column::TxHash.eq(&tx_hash))
            .one(&self.ctx.db).await?
        {
            tracing::debug!(tx_hash = %tx_hash, "Deposit already recorded");
            return Ok(existing);
        }

        let wallet = self.ctx.users
            .find_wallet_by_address(&receiver).await?
            .ok_or_else(|| AppError::NotFound(format!("wallet for {}", receiver)))?;

        let now = chrono::Utc::now();
        let txn = self.ctx.db.begin().await?;

        let ledger_row = (wallet_tx::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_wallet_id: Set(wallet.id),
            tx_type: Set(WalletTxType::Deposit.to_string()),
            amount: Set(request.amount),
            starting_balance: Set(None),
            ending_balance: Set(None),
            status: Set(TxStatus::Pending.to_string()),
            tx_hash: Set(None),
            game_usd_tx_id: Set(None),
            escalated: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        }).insert(&txn).await?;

        let deposit = (deposit_tx::ActiveModel {
            id: Set(Uuid::new_v4()),
            wallet_tx_id: Set(ledger_row.id),
            chain_id: Set(request.chain_id as i64),
            sender_address: Set(request.sender_address.to_lowercase()),
            receiver_address: Set(receiver.clone()),
            amount: Set(request.amount),
            tx_hash: Set(tx_hash),
            escrow_tx_hash: Set(None),
            status: Set(TxStatus::Pending.to_string()),
            retry_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }).insert(&txn).await?;

        txn.commit().await?;

        tracing::info!(
            deposit_id = %deposit.id,
            wallet_tx_id = %ledger_row.id,
            amount = %deposit.amount,
            "Deposit received"
        );

        // The escrow leg is signed by the custody wallet, top it up early
        match self.ctx.adapter.ensure_gas(&receiver).await {
            Ok(()) | Err(AppError::InsufficientGas(_)) => {}
            Err(e) => tracing::warn!(address = %receiver, error = %e, "Gas check failed"),
        }

        self.ctx.notifier.set_user_notification(
            wallet.user_id,
            UserNotification::new(
                "deposit_received",
                "Deposit received",
                format!("We received your deposit of {}. It will be credited shortly.", deposit.amount),
                Some(ledger_row.id)
            )
        ).await;

        Ok(deposit)
    }

    /// Move pending deposits from custody wallets to escrow. Returns rows processed.
    pub async fn run_escrow_sweep(&self) -> Result<usize> {
        let pending = deposit_tx::Entity
            ::find()
            .filter(deposit_tx::Column::Status.eq(TxStatus::Pending.as_str()))
            .filter(deposit_tx::Column::RetryCount.lt(self.ctx.settlement.escrow_max_retries))
            .order_by_asc(deposit_tx::Column::CreatedAt)
            .all(&self.ctx.db).await?;

        let now = Utc::now();
        let base = self.ctx.settlement.sweep_retry_backoff;
        let due: Vec<_> = pending
            .into_iter()
            .filter(|d| retry_due(d.retry_count, d.updated_at, base, now))
            .collect();

        let count = due.len();
        for deposit in due {
            let deposit_id = deposit.id;
            if let Err(e) = self.escrow_deposit(deposit).await {
                tracing::error!(deposit_id = %deposit_id, error = %e, "Escrow step failed");
            }
        }

        Ok(count)
    }

    async fn escrow_deposit(&self, deposit: deposit_tx::Model) -> Result<()> {
        let call = ContractCall::Transfer {
            to: self.ctx.chain().escrow_address.clone(),
            amount: deposit.amount,
        };

        let outcome = match self.ctx.adapter.ensure_gas(&deposit.receiver_address).await {
            Ok(()) => self.ctx.adapter.submit_and_confirm(&deposit.receiver_address, &call).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(escrow_hash) => {
                let deposit_id = deposit.id;
                let wallet_tx_id = deposit.wallet_tx_id;
                if let Err(e) = self.record_escrow_success(deposit, &escrow_hash).await {
                    self.hold_deposit(deposit_id, wallet_tx_id, Some(&escrow_hash), &e).await;
                }
                Ok(())
            }
            Err(e) => self.record_escrow_failure(deposit, e).await,
        }
    }

    async fn record_escrow_success(&self, deposit: deposit_tx::Model, escrow_hash: &str) -> Result<()> {
        let now = chrono::Utc::now();
        let txn = self.ctx.db.begin().await?;

        let ledger_row = super::find_wallet_tx(&txn, deposit.wallet_tx_id).await?;
        let wallet = self.ctx.ledger.lock_wallet(&txn, ledger_row.user_wallet_id).await?;

        let mint = (game_usd_tx::ActiveModel {
            id: Set(Uuid::new_v4()),
            amount: Set(deposit.amount),
            chain_id: Set(deposit.chain_id),
            sender_address: Set(self.ctx.chain().deposit_bot_address.clone()),
            receiver_address: Set(wallet.wallet_address.clone()),
            status: Set(TxStatus::Pending.to_string()),
            tx_hash: Set(None),
            retry_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }).insert(&txn).await?;

        let mut ledger_active: wallet_tx::ActiveModel = ledger_row.into();
        ledger_active.game_usd_tx_id = Set(Some(mint.id));
        ledger_active.updated_at = Set(now);
        ledger_active.update(&txn).await?;

        let deposit_id = deposit.id;
        let mut active: deposit_tx::ActiveModel = deposit.into();
        active.status = Set(TxStatus::Success.to_string());
        active.escrow_tx_hash = Set(Some(escrow_hash.to_string()));
        active.updated_at = Set(now);
        active.update(&txn).await?;

        txn.commit().await?;

        tracing::info!(
            deposit_id = %deposit_id,
            game_usd_tx_id = %mint.id,
            escrow_tx_hash = %escrow_hash,
            "Deposit escrowed"
        );

        Ok(())
    }

    async fn record_escrow_failure(&self, deposit: deposit_tx::Model, error: AppError) -> Result<()> {
        let attempts = deposit.retry_count + 1;
        let exhausted = attempts >= self.ctx.settlement.escrow_max_retries;

        tracing::warn!(
            deposit_id = %deposit.id,
            attempt = attempts,
            failed_hash = ?error.failed_hash(),
            error = %error,
            "Escrow transfer failed"
        );

        let txn = self.ctx.db.begin().await?;

        let mut update = deposit_tx::Entity
            ::update_many()
            .col_expr(deposit_tx::Column::RetryCount, Expr::value(attempts))
            .col_expr(deposit_tx::Column::UpdatedAt, Expr::value(chrono::Utc::now()));
        if exhausted {
            update = update.col_expr(deposit_tx::Column::Status, Expr::value(TxStatus::Failed.as_str()));
        }

        // Compare-and-set on the count keeps it monotonic across overlapping sweeps
        let result = update
            .filter(deposit_tx::Column::Id.eq(deposit.id))
            .filter(deposit_tx::Column::Status.eq(TxStatus::Pending.as_str()))
            .filter(deposit_tx::Column::RetryCount.eq(deposit.retry_count))
            .exec(&txn).await?;

        if result.rows_affected == 0 {
            txn.rollback().await?;
            return Ok(());
        }

        if exhausted {
            self.ctx.ledger.fail_wallet_tx(&txn, deposit.wallet_tx_id).await?;
        }
        txn.commit().await?;

        if exhausted {
            self.ctx.escalate(
                "deposit_escrow_failed",
                "Deposit escrow failed",
                format!(
                    "Deposit {} ({}) could not be moved to escrow after {} attempts: {}",
                    deposit.id,
                    deposit.tx_hash,
                    attempts,
                    error
                ),
                Some(deposit.wallet_tx_id)
            ).await;
        }

        Ok(())
    }

    /// Park a deposit whose escrow transfer succeeded but could not be recorded.
    async fn hold_deposit(
        &self,
        deposit_id: Uuid,
        wallet_tx_id: Uuid,
        escrow_hash: Option<&str>,
        cause: &AppError
    ) {
        let mut update = deposit_tx::Entity
            ::update_many()
            .col_expr(deposit_tx::Column::Status, Expr::value(TxStatus::PendingDeveloper.as_str()))
            .col_expr(deposit_tx::Column::UpdatedAt, Expr::value(chrono::Utc::now()));
        if let Some(hash) = escrow_hash {
            update = update.col_expr(deposit_tx::Column::EscrowTxHash, Expr::value(hash));
        }

        if let Err(e) = update.filter(deposit_tx::Column::Id.eq(deposit_id)).exec(&self.ctx.db).await {
            tracing::error!(deposit_id = %deposit_id, error = %e, "Could not park deposit");
        }

        self.ctx.hold_and_escalate(wallet_tx_id, cause).await;
    }

    /// Mint GameUSD for escrowed deposits and referral commissions.
    pub async fn run_mint_sweep(&self) -> Result<usize> {
        let chain = self.ctx.chain();
        let pending = game_usd_tx::Entity
            ::find()
            .filter(game_usd_tx::Column::Status.eq(TxStatus::Pending.as_str()))
            .filter(game_usd_tx::Column::RetryCount.lt(self.ctx.settlement.mint_max_retries))
            .filter(
                game_usd_tx::Column::SenderAddress.is_in([
                    chain.deposit_bot_address.as_str(),
                    chain.pool_address.as_str(),
                ])
            )
            .order_by_asc(game_usd_tx::Column::CreatedAt)
            .all(&self.ctx.db).await?;

        let now = Utc::now();
        let base = self.ctx.settlement.sweep_retry_backoff;
        let due: Vec<_> = pending
            .into_iter()
            .filter(|m| retry_due(m.retry_count, m.updated_at, base, now))
            .collect();

        let count = due.len();
        for mint in due {
            let mint_id = mint.id;
            if let Err(e) = self.mint(mint).await {
                tracing::error!(game_usd_tx_id = %mint_id, error = %e, "Mint step failed");
            }
        }

        Ok(count)
    }

    async fn mint(&self, mint: game_usd_tx::Model) -> Result<()> {
        let call = ContractCall::Deposit {
            user: mint.receiver_address.clone(),
            amount: mint.amount,
        };

        match self.ctx.adapter.submit_and_confirm(&mint.sender_address, &call).await {
            Ok(tx_hash) => self.record_mint_success(mint, tx_hash).await,
            Err(e) => self.record_mint_failure(mint, e).await,
        }
    }

    async fn linked_wallet_txs(&self, game_usd_tx_id: Uuid) -> Result<Vec<wallet_tx::Model>> {
        Ok(
            wallet_tx::Entity
                ::find()
                .filter(wallet_tx::Column::GameUsdTxId.eq(game_usd_tx_id))
                .order_by_asc(wallet_tx::Column::CreatedAt)
                .all(&self.ctx.db).await?
        )
    }

    async fn plan_referrals(
        &self,
        rows: &[wallet_tx::Model]
    ) -> Result<(Vec<ReferralPlan>, Vec<ReferralIssue>)> {
        let mut plans = Vec::new();
        let mut issues = Vec::new();

        for row in rows {
            if row.tx_type != WalletTxType::Deposit.as_str() || row.status != TxStatus::Pending.as_str() {
                continue;
            }

            let wallet = self.ctx.users.find_wallet(row.user_wallet_id).await?;
            let depositor = self.ctx.users.find_user(wallet.user_id).await?;
            let Some(referrer_id) = depositor.referrer_id else {
                continue;
            };

            let planned = async {
                let referrer: user::Model = self.ctx.users.find_user(referrer_id).await?;
                let amount = referral_commission(referrer.referral_rank, row.amount)?;
                if amount <= Decimal::ZERO {
                    return Ok(None);
                }
                let referrer_wallet = self.ctx.users.find_wallet_by_user(referrer.id).await?;
                Ok::<_, AppError>(
                    Some(ReferralPlan {
                        deposit_wallet_tx_id: row.id,
                        referrer_wallet_id: referrer_wallet.id,
                        referrer_address: referrer_wallet.wallet_address,
                        amount,
                    })
                )
            }.await;

            match planned {
                Ok(Some(plan)) => plans.push(plan),
                Ok(None) => {}
                Err(e) =>
                    issues.push(ReferralIssue {
                        deposit_wallet_tx_id: row.id,
                        reason: format!("referrer {}: {}", referrer_id, e),
                    }),
            }
        }

        Ok((plans, issues))
    }

    /// Once the mint is confirmed every failure parks it instead of leaving it
    /// pending for the next sweep to submit again.
    async fn record_mint_success(&self, mint: game_usd_tx::Model, tx_hash: String) -> Result<()> {
        let mint_id = mint.id;
        let prepared = async {
            let rows = self.linked_wallet_txs(mint_id).await?;
            let (plans, issues) = self.plan_referrals(&rows).await?;
            Ok::<_, AppError>((rows, plans, issues))
        }.await;

        let (rows, plans, issues) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::error!(game_usd_tx_id = %mint_id, tx_hash = %tx_hash, error = %e, "Mint bookkeeping failed");
                self.hold_mint(mint_id, &tx_hash).await;
                self.ctx.escalate(
                    "mint_rollback",
                    "Confirmed mint not recorded",
                    format!("Mint {} confirmed as {} but its wallet rows could not be loaded: {}", mint_id, tx_hash, e),
                    None
                ).await;
                return Ok(());
            }
        };

        let finalized = match self.finalize_mint(mint, &rows, &plans, &tx_hash).await {
            Ok(finalized) => finalized,
            Err(e) => {
                tracing::error!(game_usd_tx_id = %mint_id, tx_hash = %tx_hash, error = %e, "Mint commit failed");
                self.hold_mint(mint_id, &tx_hash).await;
                for row in &rows {
                    self.ctx.hold_and_escalate(row.id, &e).await;
                }
                return Ok(());
            }
        };

        tracing::info!(game_usd_tx_id = %mint_id, tx_hash = %tx_hash, rows = finalized.len(), "GameUSD minted");

        for row in finalized {
            let notification = if row.tx_type == WalletTxType::Referral.as_str() {
                UserNotification::new(
                    "referral_credited",
                    "Referral bonus",
                    format!("You earned a referral bonus of {}.", row.amount),
                    Some(row.id)
                )
            } else {
                UserNotification::new(
                    "deposit_credited",
                    "Deposit credited",
                    format!("Your deposit of {} is now available.", row.amount),
                    Some(row.id)
                )
            };
            self.ctx.notify_user(row.user_wallet_id, notification).await;
        }

        for issue in issues {
            self.ctx.escalate(
                "referral_failed",
                "Referral commission skipped",
                format!("No commission booked for deposit {}: {}", issue.deposit_wallet_tx_id, issue.reason),
                Some(issue.deposit_wallet_tx_id)
            ).await;
        }

        Ok(())
    }

    /// Finalize every wallet row backed by the mint and book referral commissions.
    async fn finalize_mint(
        &self,
        mint: game_usd_tx::Model,
        rows: &[wallet_tx::Model],
        plans: &[ReferralPlan],
        tx_hash: &str
    ) -> Result<Vec<wallet_tx::Model>> {
        let now = chrono::Utc::now();
        let txn = self.ctx.db.begin().await?;

        let mut active: game_usd_tx::ActiveModel = mint.into();
        active.status = Set(TxStatus::Success.to_string());
        active.tx_hash = Set(Some(tx_hash.to_string()));
        active.updated_at = Set(now);
        active.update(&txn).await?;

        let mut finalized = Vec::new();
        for row in rows {
            let Some(done) = self.ctx.ledger.finalize_wallet_tx(&txn, row.id, Some(tx_hash.to_string())).await? else {
                continue;
            };

            if let Some(plan) = plans.iter().find(|p| p.deposit_wallet_tx_id == done.id) {
                self.book_referral(&txn, plan, now).await?;
            }
            finalized.push(done);
        }

        txn.commit().await?;
        Ok(finalized)
    }

    async fn book_referral(
        &self,
        txn: &DatabaseTransaction,
        plan: &ReferralPlan,
        now: chrono::DateTime<chrono::Utc>
    ) -> Result<()> {
        let chain = self.ctx.chain();

        let mint = (game_usd_tx::ActiveModel {
            id: Set(Uuid::new_v4()),
            amount: Set(plan.amount),
            chain_id: Set(chain.chain_id as i64),
            sender_address: Set(chain.pool_address.clone()),
            receiver_address: Set(plan.referrer_address.clone()),
            status: Set(TxStatus::Pending.to_string()),
            tx_hash: Set(None),
            retry_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }).insert(txn).await?;

        let referral = (wallet_tx::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_wallet_id: Set(plan.referrer_wallet_id),
            tx_type: Set(WalletTxType::Referral.to_string()),
            amount: Set(plan.amount),
            starting_balance: Set(None),
            ending_balance: Set(None),
            status: Set(TxStatus::Pending.to_string()),
            tx_hash: Set(None),
            game_usd_tx_id: Set(Some(mint.id)),
            escalated: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        }).insert(txn).await?;

        tracing::info!(
            deposit_wallet_tx_id = %plan.deposit_wallet_tx_id,
            referral_wallet_tx_id = %referral.id,
            amount = %plan.amount,
            "Referral commission booked"
        );

        Ok(())
    }

    async fn hold_mint(&self, game_usd_tx_id: Uuid, tx_hash: &str) {
        let result = game_usd_tx::Entity
            ::update_many()
            .col_expr(game_usd_tx::Column::Status, Expr::value(TxStatus::PendingDeveloper.as_str()))
            .col_expr(game_usd_tx::Column::TxHash, Expr::value(tx_hash))
            .col_expr(game_usd_tx::Column::UpdatedAt, Expr::value(chrono::Utc::now()))
            .filter(game_usd_tx::Column::Id.eq(game_usd_tx_id))
            .exec(&self.ctx.db).await;

        if let Err(e) = result {
            tracing::error!(game_usd_tx_id = %game_usd_tx_id, error = %e, "Could not park mint");
        }
    }

    async fn record_mint_failure(&self, mint: game_usd_tx::Model, error: AppError) -> Result<()> {
        let attempts = mint.retry_count + 1;
        let exhausted = attempts >= self.ctx.settlement.mint_max_retries;

        tracing::warn!(
            game_usd_tx_id = %mint.id,
            attempt = attempts,
            failed_hash = ?error.failed_hash(),
            error = %error,
            "GameUSD mint failed"
        );

        let txn = self.ctx.db.begin().await?;

        let mut update = game_usd_tx::Entity
            ::update_many()
            .col_expr(game_usd_tx::Column::RetryCount, Expr::value(attempts))
            .col_expr(game_usd_tx::Column::UpdatedAt, Expr::value(chrono::Utc::now()));
        if exhausted {
            update = update.col_expr(game_usd_tx::Column::Status, Expr::value(TxStatus::Failed.as_str()));
        }

        let result = update
            .filter(game_usd_tx::Column::Id.eq(mint.id))
            .filter(game_usd_tx::Column::Status.eq(TxStatus::Pending.as_str()))
            .filter(game_usd_tx::Column::RetryCount.eq(mint.retry_count))
            .exec(&txn).await?;

        if result.rows_affected == 0 {
            txn.rollback().await?;
            return Ok(());
        }

        let mut failed_rows = Vec::new();
        if exhausted {
            let rows = wallet_tx::Entity
                ::find()
                .filter(wallet_tx::Column::GameUsdTxId.eq(mint.id))
                .all(&txn).await?;
            for row in rows {
                if self.ctx.ledger.fail_wallet_tx(&txn, row.id).await? {
                    failed_rows.push(row.id);
                }
            }
        }
        txn.commit().await?;

        for wallet_tx_id in failed_rows {
            self.ctx.escalate(
                "mint_failed",
                "GameUSD mint failed",
                format!(
                    "Mint {} for {} gave up after {} attempts: {}",
                    mint.id,
                    mint.receiver_address,
                    attempts,
                    error
                ),
                Some(wallet_tx_id)
            ).await;
        }

        Ok(())
    }
}
