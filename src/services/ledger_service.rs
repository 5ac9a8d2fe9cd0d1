use sea_orm::{
    entity::prelude::*,
    ConnectionTrait,
    DatabaseConnection,
    DatabaseTransaction,
    QuerySelect,
    sea_query::Expr,
    Set,
};
use uuid::Uuid;

use crate::db::entity::{ credit_wallet_tx, user_wallet, wallet_tx };
use crate::enums::{ CreditTxType, Direction, TxStatus, WalletTxType };
use crate::error::{ AppError, Result };

/// Balances fixed on a row when it reaches success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceEntry {
    pub starting_balance: Decimal,
    pub ending_balance: Decimal,
}

/// Outcome of comparing a wallet's ledger rows with its materialized balances.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LedgerAudit {
    pub wallet_balance: Decimal,
    pub ledger_wallet_balance: Decimal,
    pub credit_balance: Decimal,
    pub ledger_credit_balance: Decimal,
}

impl LedgerAudit {
    pub fn is_consistent(&self) -> bool {
        self.wallet_balance == self.ledger_wallet_balance &&
            self.credit_balance == self.ledger_credit_balance
    }
}

/// Statuses whose debits are reserved but not yet applied.
const RESERVING_STATUSES: [TxStatus; 3] = [
    TxStatus::Pending,
    TxStatus::PendingAdmin,
    TxStatus::PendingDeveloper,
];

pub fn signed_amount(direction: Direction, amount: Decimal) -> Decimal {
    match direction {
        Direction::Credit => amount,
        Direction::Debit => -amount,
    }
}

/// `ending = starting + signed(amount)`; debits may not go below zero.
pub fn compute_entry(
    starting_balance: Decimal,
    direction: Direction,
    amount: Decimal
) -> Result<BalanceEntry> {
    if amount.is_sign_negative() {
        return Err(AppError::InvalidInput(format!("Ledger amount must not be negative: {}", amount)));
    }

    let ending_balance = starting_balance + signed_amount(direction, amount);
    if ending_balance.is_sign_negative() && !ending_balance.is_zero() {
        return Err(AppError::InsufficientBalance);
    }

    Ok(BalanceEntry { starting_balance, ending_balance })
}

/// New redeemable balance after a wallet movement. Redeemable funds are a
/// subset of the wallet balance, so any debit clamps them to what is left.
pub fn next_redeemable(
    redeemable: Decimal,
    tx_type: WalletTxType,
    amount: Decimal,
    wallet_ending: Decimal
) -> Result<Decimal> {
    let moved = if tx_type.moves_redeemable() {
        redeemable + signed_amount(tx_type.direction(), amount)
    } else {
        redeemable
    };

    if moved.is_sign_negative() && !moved.is_zero() {
        return Err(AppError::InsufficientBalance);
    }

    Ok(moved.min(wallet_ending))
}

/// Commission paid to a referrer of the given rank.
pub fn referral_commission(rank: i32, amount: Decimal) -> Result<Decimal> {
    let percent = match rank {
        1 => Decimal::from(10),
        2 => Decimal::from(15),
        3 => Decimal::from(20),
        other => {
            return Err(AppError::InvalidInput(format!("Unknown referral rank {}", other)));
        }
    };

    Ok((amount * percent) / Decimal::from(100))
}

pub fn available_balance(balance: Decimal, reserved: Decimal) -> Decimal {
    (balance - reserved).max(Decimal::ZERO)
}

/// Applies finalized ledger rows to the materialized wallet balances.
///
/// Every mutation runs inside the caller's transaction and starts by taking a
/// row lock on the `user_wallet`, which serializes finalization per wallet.
pub struct LedgerService {
    db: DatabaseConnection,
}

impl LedgerService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Get the wallet row, locked for the rest of the transaction.
    pub async fn lock_wallet(
        &self,
        txn: &DatabaseTransaction,
        wallet_id: Uuid
    ) -> Result<user_wallet::Model> {
        user_wallet::Entity
            ::find_by_id(wallet_id)
            .lock_exclusive()
            .one(txn).await?
            .ok_or_else(|| AppError::NotFound(format!("wallet {}", wallet_id)))
    }

    /// Move the wallet balance by one entry and return the balances it spans.
    pub async fn apply_ledger_entry(
        &self,
        txn: &DatabaseTransaction,
        wallet_id: Uuid,
        tx_type: WalletTxType,
        amount: Decimal
    ) -> Result<BalanceEntry> {
        let wallet = self.lock_wallet(txn, wallet_id).await?;

        let entry = compute_entry(wallet.wallet_balance, tx_type.direction(), amount)?;
        let redeemable = next_redeemable(
            wallet.redeemable_balance,
            tx_type,
            amount,
            entry.ending_balance
        )?;

        let mut active: user_wallet::ActiveModel = wallet.into();
        active.wallet_balance = Set(entry.ending_balance);
        active.redeemable_balance = Set(redeemable);
        active.updated_at = Set(chrono::Utc::now());
        active.update(txn).await?;

        Ok(entry)
    }

    /// Move the promotional credit balance by one entry.
    pub async fn apply_credit_entry(
        &self,
        txn: &DatabaseTransaction,
        wallet_id: Uuid,
        tx_type: CreditTxType,
        amount: Decimal
    ) -> Result<BalanceEntry> {
        let wallet = self.lock_wallet(txn, wallet_id).await?;

        let entry = compute_entry(wallet.credit_balance, tx_type.direction(), amount).map_err(
            |e| match e {
                AppError::InsufficientBalance => AppError::InsufficientCredit,
                other => other,
            }
        )?;

        let mut active: user_wallet::ActiveModel = wallet.into();
        active.credit_balance = Set(entry.ending_balance);
        active.updated_at = Set(chrono::Utc::now());
        active.update(txn).await?;

        Ok(entry)
    }

    pub async fn add_points(
        &self,
        txn: &DatabaseTransaction,
        wallet_id: Uuid,
        points: Decimal
    ) -> Result<()> {
        let wallet = self.lock_wallet(txn, wallet_id).await?;
        let point_balance = wallet.point_balance + points;

        let mut active: user_wallet::ActiveModel = wallet.into();
        active.point_balance = Set(point_balance);
        active.updated_at = Set(chrono::Utc::now());
        active.update(txn).await?;

        Ok(())
    }

    /// Finalize a pending wallet row to success.
    ///
    /// Returns `None` when the row already reached a terminal state, which makes
    /// duplicate deliveries of the same completion harmless.
    pub async fn finalize_wallet_tx(
        &self,
        txn: &DatabaseTransaction,
        wallet_tx_id: Uuid,
        tx_hash: Option<String>
    ) -> Result<Option<wallet_tx::Model>> {
        let unlocked = find_wallet_tx(txn, wallet_tx_id).await?;

        // Lock order is always wallet first, then the row
        self.lock_wallet(txn, unlocked.user_wallet_id).await?;
        let row = wallet_tx::Entity
            ::find_by_id(wallet_tx_id)
            .lock_exclusive()
            .one(txn).await?
            .ok_or_else(|| AppError::NotFound(format!("wallet tx {}", wallet_tx_id)))?;

        let status: TxStatus = row.status.parse()?;
        if status.is_terminal() {
            tracing::debug!(wallet_tx_id = %wallet_tx_id, status = %status, "Already finalized");
            return Ok(None);
        }
        if status != TxStatus::Pending {
            return Err(
                AppError::InvalidInput(format!("Wallet tx {} is {} and cannot settle", wallet_tx_id, status))
            );
        }

        let tx_type: WalletTxType = row.tx_type.parse()?;
        let entry = self.apply_ledger_entry(txn, row.user_wallet_id, tx_type, row.amount).await?;

        let mut active: wallet_tx::ActiveModel = row.into();
        active.status = Set(TxStatus::Success.to_string());
        active.starting_balance = Set(Some(entry.starting_balance));
        active.ending_balance = Set(Some(entry.ending_balance));
        if let Some(hash) = tx_hash {
            active.tx_hash = Set(Some(hash));
        }
        active.updated_at = Set(chrono::Utc::now());
        let finalized = active.update(txn).await?;

        tracing::info!(
            wallet_tx_id = %wallet_tx_id,
            tx_type = %tx_type,
            starting = %entry.starting_balance,
            ending = %entry.ending_balance,
            "Wallet tx finalized"
        );

        Ok(Some(finalized))
    }

    /// Finalize a pending credit row to success. `None` if already terminal.
    pub async fn finalize_credit_tx(
        &self,
        txn: &DatabaseTransaction,
        credit_tx_id: Uuid,
        tx_hash: Option<String>
    ) -> Result<Option<credit_wallet_tx::Model>> {
        let unlocked = find_credit_tx(txn, credit_tx_id).await?;

        self.lock_wallet(txn, unlocked.user_wallet_id).await?;
        let row = credit_wallet_tx::Entity
            ::find_by_id(credit_tx_id)
            .lock_exclusive()
            .one(txn).await?
            .ok_or_else(|| AppError::NotFound(format!("credit tx {}", credit_tx_id)))?;

        let status: TxStatus = row.status.parse()?;
        if status.is_terminal() {
            return Ok(None);
        }

        let tx_type: CreditTxType = row.tx_type.parse()?;
        let entry = self.apply_credit_entry(txn, row.user_wallet_id, tx_type, row.amount).await?;

        let mut active: credit_wallet_tx::ActiveModel = row.into();
        active.status = Set(TxStatus::Success.to_string());
        active.starting_balance = Set(Some(entry.starting_balance));
        active.ending_balance = Set(Some(entry.ending_balance));
        if let Some(hash) = tx_hash {
            active.tx_hash = Set(Some(hash));
        }
        active.updated_at = Set(chrono::Utc::now());

        Ok(Some(active.update(txn).await?))
    }

    /// Mark a non-terminal wallet row failed. Returns whether it changed.
    pub async fn fail_wallet_tx<C: ConnectionTrait>(&self, conn: &C, wallet_tx_id: Uuid) -> Result<bool> {
        set_wallet_tx_status(conn, wallet_tx_id, TxStatus::Failed).await
    }

    /// Park a row whose on-chain leg may have moved funds the ledger could not record.
    pub async fn hold_for_developer<C: ConnectionTrait>(
        &self,
        conn: &C,
        wallet_tx_id: Uuid
    ) -> Result<bool> {
        set_wallet_tx_status(conn, wallet_tx_id, TxStatus::PendingDeveloper).await
    }

    pub async fn fail_credit_tx<C: ConnectionTrait>(&self, conn: &C, credit_tx_id: Uuid) -> Result<bool> {
        let result = credit_wallet_tx::Entity
            ::update_many()
            .col_expr(credit_wallet_tx::Column::Status, Expr::value(TxStatus::Failed.as_str()))
            .col_expr(credit_wallet_tx::Column::UpdatedAt, Expr::value(chrono::Utc::now()))
            .filter(credit_wallet_tx::Column::Id.eq(credit_tx_id))
            .filter(credit_wallet_tx::Column::Status.is_not_in(terminal_statuses()))
            .exec(conn).await?;

        Ok(result.rows_affected > 0)
    }

    /// Wallet balance minus debits that are reserved but not yet applied.
    pub async fn available_wallet_balance<C: ConnectionTrait>(
        &self,
        conn: &C,
        wallet: &user_wallet::Model
    ) -> Result<Decimal> {
        let reserved = sum_wallet_txs(conn, wallet.id, WalletTxType::debits(), &RESERVING_STATUSES).await?;
        Ok(available_balance(wallet.wallet_balance, reserved))
    }

    pub async fn available_redeemable_balance<C: ConnectionTrait>(
        &self,
        conn: &C,
        wallet: &user_wallet::Model
    ) -> Result<Decimal> {
        let reserved = sum_wallet_txs(
            conn,
            wallet.id,
            vec![WalletTxType::Redeem.as_str()],
            &RESERVING_STATUSES
        ).await?;
        Ok(available_balance(wallet.redeemable_balance, reserved))
    }

    pub async fn available_credit_balance<C: ConnectionTrait>(
        &self,
        conn: &C,
        wallet: &user_wallet::Model
    ) -> Result<Decimal> {
        let reserved: Option<Decimal> = credit_wallet_tx::Entity
            ::find()
            .select_only()
            .column_as(credit_wallet_tx::Column::Amount.sum(), "total")
            .filter(credit_wallet_tx::Column::UserWalletId.eq(wallet.id))
            .filter(credit_wallet_tx::Column::TxType.eq(CreditTxType::Play.as_str()))
            .filter(credit_wallet_tx::Column::Status.eq(TxStatus::Pending.as_str()))
            .into_tuple::<Option<Decimal>>()
            .one(conn).await?
            .flatten();

        Ok(available_balance(wallet.credit_balance, reserved.unwrap_or_default()))
    }

    /// Recompute a wallet's balances from its ledger rows.
    pub async fn audit_wallet(&self, wallet_id: Uuid) -> Result<LedgerAudit> {
        let wallet = user_wallet::Entity
            ::find_by_id(wallet_id)
            .one(&self.db).await?
            .ok_or_else(|| AppError::NotFound(format!("wallet {}", wallet_id)))?;

        let mut ledger_wallet_balance = Decimal::ZERO;
        let settled = wallet_tx::Entity
            ::find()
            .filter(wallet_tx::Column::UserWalletId.eq(wallet_id))
            .filter(wallet_tx::Column::Status.eq(TxStatus::Success.as_str()))
            .all(&self.db).await?;
        for row in settled {
            let tx_type: WalletTxType = row.tx_type.parse()?;
            ledger_wallet_balance += signed_amount(tx_type.direction(), row.amount);
        }

        // Expired issuance rows still count: the EXPIRY row debits them
        let mut ledger_credit_balance = Decimal::ZERO;
        let credits = credit_wallet_tx::Entity
            ::find()
            .filter(credit_wallet_tx::Column::UserWalletId.eq(wallet_id))
            .filter(
                credit_wallet_tx::Column::Status.is_in([
                    TxStatus::Success.as_str(),
                    TxStatus::Expired.as_str(),
                ])
            )
            .all(&self.db).await?;
        for row in credits {
            let tx_type: CreditTxType = row.tx_type.parse()?;
            ledger_credit_balance += signed_amount(tx_type.direction(), row.amount);
        }

        Ok(LedgerAudit {
            wallet_balance: wallet.wallet_balance,
            ledger_wallet_balance,
            credit_balance: wallet.credit_balance,
            ledger_credit_balance,
        })
    }
}

fn terminal_statuses() -> [&'static str; 3] {
    [TxStatus::Success.as_str(), TxStatus::Failed.as_str(), TxStatus::Expired.as_str()]
}

async fn find_wallet_tx<C: ConnectionTrait>(conn: &C, id: Uuid) -> Result<wallet_tx::Model> {
    wallet_tx::Entity
        ::find_by_id(id)
        .one(conn).await?
        .ok_or_else(|| AppError::NotFound(format!("wallet tx {}", id)))
}

async fn find_credit_tx<C: ConnectionTrait>(conn: &C, id: Uuid) -> Result<credit_wallet_tx::Model> {
    credit_wallet_tx::Entity
        ::find_by_id(id)
        .one(conn).await?
        .ok_or_else(|| AppError::NotFound(format!("credit tx {}", id)))
}

async fn set_wallet_tx_status<C: ConnectionTrait>(
    conn: &C,
    wallet_tx_id: Uuid,
    status: TxStatus
) -> Result<bool> {
    let result = wallet_tx::Entity
        ::update_many()
        .col_expr(wallet_tx::Column::Status, Expr::value(status.as_str()))
        .col_expr(wallet_tx::Column::UpdatedAt, Expr::value(chrono::Utc::now()))
        .filter(wallet_tx::Column::Id.eq(wallet_tx_id))
        .filter(wallet_tx::Column::Status.is_not_in(terminal_statuses()))
        .exec(conn).await?;

    Ok(result.rows_affected > 0)
}

async fn sum_wallet_txs<C: ConnectionTrait>(
    conn: &C,
    wallet_id: Uuid,
    tx_types: Vec<&'static str>,
    statuses: &[TxStatus]
) -> Result<Decimal> {
    let total: Option<Decimal> = wallet_tx::Entity
        ::find()
        .select_only()
        .column_as(wallet_tx::Column::Amount.sum(), "total")
        .filter(wallet_tx::Column::UserWalletId.eq(wallet_id))
        .filter(wallet_tx::Column::TxType.is_in(tx_types))
        .filter(wallet_tx::Column::Status.is_in(statuses.iter().map(|s| s.as_str())))
        .into_tuple::<Option<Decimal>>()
        .one(conn).await?
        .flatten();

    Ok(total.unwrap_or_default())
}
