use async_trait::async_trait;
use sea_orm::{
    entity::prelude::*,
    sea_query::Expr,
    DatabaseTransaction,
    JoinType,
    QueryOrder,
    QuerySelect,
    Set,
    TransactionTrait,
};
use serde::{ Deserialize, Serialize };
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::entity::{ bet_order, credit_wallet_tx, game, wallet_tx };
use crate::enums::{ CreditTxType, Forecast, TxStatus, WalletTxType };
use crate::error::{ AppError, Result };
use crate::providers::{ ContractCall, ForecastParam };
use crate::queue::{ Job, JobHandler };
use crate::services::UserNotification;

use super::{ PipelineContext, RowPayload, SUBMIT_BET_JOB };

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetLine {
    pub epoch: i64,
    pub number_pair: String,
    #[serde(default)]
    pub big_forecast_amount: Decimal,
    #[serde(default)]
    pub small_forecast_amount: Decimal,
}

impl BetLine {
    pub fn total(&self) -> Decimal {
        self.big_forecast_amount + self.small_forecast_amount
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetRequest {
    pub user_id: Uuid,
    pub bets: Vec<BetLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetReceipt {
    pub wallet_tx_id: Uuid,
    pub wallet_amount: Decimal,
    pub credit_amount: Decimal,
    pub orders: usize,
}

/// Collapse lines on the same `(epoch, number)` into one order.
pub fn merge_lines(lines: Vec<BetLine>) -> Vec<BetLine> {
    let mut merged: BTreeMap<(i64, String), BetLine> = BTreeMap::new();
    for line in lines {
        merged
            .entry((line.epoch, line.number_pair.clone()))
            .and_modify(|existing| {
                existing.big_forecast_amount += line.big_forecast_amount;
                existing.small_forecast_amount += line.small_forecast_amount;
            })
            .or_insert(line);
    }
    merged.into_values().collect()
}

/// Credit funding each order: bounded by what is left, the per-bet cap and the
/// order itself, spent in order.
pub fn allocate_credit(available: Decimal, max_per_bet: Decimal, totals: &[Decimal]) -> Vec<Decimal> {
    let mut remaining = available.max(Decimal::ZERO);
    totals
        .iter()
        .map(|total| {
            let credit = remaining.min(max_per_bet).min(*total).max(Decimal::ZERO);
            remaining -= credit;
            credit
        })
        .collect()
}

/// Split an order's credit across its forecasts, big first.
///
/// Returns `(wallet_params, credit_params)` without zero entries.
pub fn split_forecasts(order: &bet_order::Model) -> (Vec<ForecastParam>, Vec<ForecastParam>) {
    let credit_big = order.credit_amount.min(order.big_forecast_amount);
    let credit_small = (order.credit_amount - credit_big).min(order.small_forecast_amount);

    let param = |forecast, amount| ForecastParam {
        epoch: order.epoch,
        number: order.number_pair.clone(),
        forecast,
        amount,
    };

    let mut wallet = Vec::new();
    let mut credit = Vec::new();
    for (forecast, stake, from_credit) in [
        (Forecast::Big, order.big_forecast_amount, credit_big),
        (Forecast::Small, order.small_forecast_amount, credit_small),
    ] {
        if from_credit > Decimal::ZERO {
            credit.push(param(forecast, from_credit));
        }
        if stake - from_credit > Decimal::ZERO {
            wallet.push(param(forecast, stake - from_credit));
        }
    }

    (wallet, credit)
}

fn validate_line(line: &BetLine) -> Result<()> {
    if line.big_forecast_amount.is_sign_negative() || line.small_forecast_amount.is_sign_negative() {
        return Err(AppError::InvalidInput("Bet amounts must not be negative".to_string()));
    }
    if line.total().is_zero() {
        return Err(AppError::InvalidInput(format!("Empty bet on {}", line.number_pair)));
    }
    if line.number_pair.is_empty() || !line.number_pair.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::InvalidInput(format!("Invalid number pair '{}'", line.number_pair)));
    }
    Ok(())
}

/// Check `round` still takes bets at `now`, relative to the open epoch.
pub fn check_epoch(
    round: &game::Model,
    current_epoch: i64,
    lookahead: i64,
    masking: chrono::Duration,
    now: chrono::DateTime<chrono::Utc>
) -> Result<()> {
    if round.drawn_at.is_some() {
        return Err(AppError::InvalidEpoch(format!("Epoch {} is already drawn", round.epoch)));
    }
    if round.end_at <= now + masking {
        return Err(AppError::InvalidEpoch(format!("Epoch {} is closed", round.epoch)));
    }
    if round.epoch < current_epoch {
        return Err(AppError::InvalidEpoch(format!("Epoch {} has passed", round.epoch)));
    }
    if round.epoch > current_epoch + lookahead {
        return Err(
            AppError::InvalidEpoch(format!("Epoch {} is more than {} rounds ahead", round.epoch, lookahead))
        );
    }
    Ok(())
}

/// Places bet batches and settles them on the betting contract.
pub struct BetPipeline {
    ctx: Arc<PipelineContext>,
}

impl BetPipeline {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Validate and book a bet batch; the on-chain leg runs from the queue.
    pub async fn place_bets(&self, request: BetRequest) -> Result<BetReceipt> {
        if request.bets.is_empty() {
            return Err(AppError::InvalidInput("No bets given".to_string()));
        }
        for line in &request.bets {
            validate_line(line)?;
        }
        let lines = merge_lines(request.bets);

        let wallet = self.ctx.users.find_wallet_by_user(request.user_id).await?;
        let now = chrono::Utc::now();
        let masking = chrono::Duration::seconds(self.ctx.settlement.bet_masking_seconds);

        let txn = self.ctx.db.begin().await?;

        // Step 1: serialize against other bets of this wallet
        let wallet = self.ctx.ledger.lock_wallet(&txn, wallet.id).await?;

        // Step 2: epoch checks
        let current = game::Entity
            ::find()
            .filter(game::Column::StartAt.lte(now))
            .filter(game::Column::EndAt.gt(now))
            .filter(game::Column::DrawnAt.is_null())
            .order_by_asc(game::Column::Epoch)
            .one(&txn).await?
            .ok_or_else(|| AppError::InvalidEpoch("No epoch is open".to_string()))?;

        for line in &lines {
            // Locked so the per-number cap is checked against settled totals
            let round = game::Entity
                ::find_by_id(line.epoch)
                .lock_exclusive()
                .one(&txn).await?
                .ok_or_else(|| AppError::InvalidEpoch(format!("Unknown epoch {}", line.epoch)))?;

            check_epoch(&round, current.epoch, self.ctx.settlement.epoch_lookahead, masking, now)?;

            let total = line.total();
            if total < round.min_bet_amount {
                return Err(AppError::BelowMinimum {
                    amount: total.to_string(),
                    minimum: round.min_bet_amount.to_string(),
                });
            }
            if total > round.max_bet_amount {
                return Err(
                    AppError::InvalidInput(
                        format!("Bet of {} exceeds the maximum of {}", total, round.max_bet_amount)
                    )
                );
            }

            // Step 3: per-number exposure cap across all players
            let placed = placed_on_number(&txn, line.epoch, &line.number_pair).await?;
            if placed + total > round.max_amount_per_number {
                return Err(
                    AppError::InvalidInput(
                        format!("Number {} is sold out for epoch {}", line.number_pair, line.epoch)
                    )
                );
            }
        }

        // Step 4: split the stake between credit and wallet balance
        let totals: Vec<Decimal> = lines.iter().map(BetLine::total).collect();
        let available_credit = self.ctx.ledger.available_credit_balance(&txn, &wallet).await?;
        let credits = allocate_credit(available_credit, self.ctx.settlement.max_credit_per_bet, &totals);

        let credit_amount: Decimal = credits.iter().sum();
        let wallet_amount = totals.iter().sum::<Decimal>() - credit_amount;

        let available = self.ctx.ledger.available_wallet_balance(&txn, &wallet).await?;
        if wallet_amount > available {
            return Err(AppError::InsufficientBalance);
        }

        // Step 5: book the batch
        let play = (wallet_tx::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_wallet_id: Set(wallet.id),
            tx_type: Set(WalletTxType::Play.to_string()),
            amount: Set(wallet_amount),
            starting_balance: Set(None),
            ending_balance: Set(None),
            status: Set(TxStatus::Pending.to_string()),
            tx_hash: Set(None),
            game_usd_tx_id: Set(None),
            escalated: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        }).insert(&txn).await?;

        for (line, credit) in lines.iter().zip(credits) {
            let credit_wallet_tx_id = if credit > Decimal::ZERO {
                let row = (credit_wallet_tx::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_wallet_id: Set(wallet.id),
                    tx_type: Set(CreditTxType::Play.to_string()),
                    amount: Set(credit),
                    starting_balance: Set(None),
                    ending_balance: Set(None),
                    status: Set(TxStatus::Pending.to_string()),
                    campaign: Set(None),
                    expiration_date: Set(None),
                    wallet_tx_id: Set(Some(play.id)),
                    tx_hash: Set(None),
                    created_at: Set(chrono::Utc::now()),
                    updated_at: Set(now),
                }).insert(&txn).await?;
                Some(row.id)
            } else {
                None
            };

            (bet_order::ActiveModel {
                id: Set(Uuid::new_v4()),
                wallet_tx_id: Set(play.id),
                credit_wallet_tx_id: Set(credit_wallet_tx_id),
                user_wallet_id: Set(wallet.id),
                epoch: Set(line.epoch),
                number_pair: Set(line.number_pair.clone()),
                big_forecast_amount: Set(line.big_forecast_amount),
                small_forecast_amount: Set(line.small_forecast_amount),
                credit_amount: Set(credit),
                claim_wallet_tx_id: Set(None),
                created_at: Set(now),
            }).insert(&txn).await?;
        }

        txn.commit().await?;

        tracing::info!(
            wallet_tx_id = %play.id,
            orders = lines.len(),
            wallet_amount = %wallet_amount,
            credit_amount = %credit_amount,
            "Bet batch booked"
        );

        self.ctx.enqueue_after_commit(SUBMIT_BET_JOB, play.id).await;

        Ok(BetReceipt {
            wallet_tx_id: play.id,
            wallet_amount,
            credit_amount,
            orders: lines.len(),
        })
    }

    /// Submit both bet legs and settle the batch once they confirm.
    async fn submit_bet(&self, wallet_tx_id: Uuid) -> Result<()> {
        let play = super::find_wallet_tx(&self.ctx.db, wallet_tx_id).await?;
        if play.status != TxStatus::Pending.as_str() {
            tracing::debug!(wallet_tx_id = %wallet_tx_id, status = %play.status, "Bet no longer pending");
            return Ok(());
        }

        let wallet = self.ctx.users.find_wallet(play.user_wallet_id).await?;
        let orders = bet_order::Entity
            ::find()
            .filter(bet_order::Column::WalletTxId.eq(wallet_tx_id))
            .order_by_asc(bet_order::Column::CreatedAt)
            .all(&self.ctx.db).await?;
        let credit_rows = credit_rows_of(&self.ctx.db, wallet_tx_id).await?;

        let mut wallet_params = Vec::new();
        let mut credit_params = Vec::new();
        for order in &orders {
            let (from_wallet, from_credit) = split_forecasts(order);
            wallet_params.extend(from_wallet);
            credit_params.extend(from_credit);
        }

        let signer = wallet.wallet_address.clone();
        self.ctx.adapter.ensure_gas(&signer).await?;

        // A leg with a recorded hash already confirmed on a previous attempt
        let mut wallet_hash = play.tx_hash.clone();
        if !wallet_params.is_empty() && wallet_hash.is_none() {
            let call = ContractCall::Bet { user: signer.clone(), bets: wallet_params };
            let hash = self.ctx.adapter.submit_and_confirm(&signer, &call).await?;
            if let Err(e) = super::record_wallet_tx_hash(&self.ctx.db, wallet_tx_id, &hash).await {
                tracing::error!(wallet_tx_id = %wallet_tx_id, tx_hash = %hash, error = %e, "Bet hash not recorded");
                self.ctx.hold_and_escalate(wallet_tx_id, &e).await;
                return Ok(());
            }
            wallet_hash = Some(hash);
        }

        let credit_confirmed = credit_rows.iter().any(|row| row.tx_hash.is_some());
        let mut credit_hash = credit_rows.iter().find_map(|row| row.tx_hash.clone());
        if !credit_params.is_empty() && !credit_confirmed {
            let call = ContractCall::BetWithCredit { user: signer.clone(), bets: credit_params };
            let hash = self.ctx.adapter.submit_and_confirm(&signer, &call).await?;
            if let Err(e) = record_credit_hash(&self.ctx.db, wallet_tx_id, &hash).await {
                tracing::error!(wallet_tx_id = %wallet_tx_id, tx_hash = %hash, error = %e, "Credit bet hash not recorded");
                self.ctx.hold_and_escalate(wallet_tx_id, &e).await;
                return Ok(());
            }
            credit_hash = Some(hash);
        }

        if let Err(e) = self.finalize_bet(wallet_tx_id, &credit_rows, wallet_hash, credit_hash).await {
            tracing::error!(wallet_tx_id = %wallet_tx_id, error = %e, "Bet finalization failed");
            self.ctx.hold_and_escalate(wallet_tx_id, &e).await;
            return Ok(());
        }

        self.ctx.notify_user(
            wallet.id,
            UserNotification::new(
                "bet_placed",
                "Bet confirmed",
                format!("Your bets on {} numbers are confirmed.", orders.len()),
                Some(wallet_tx_id)
            )
        ).await;

        Ok(())
    }

    async fn finalize_bet(
        &self,
        wallet_tx_id: Uuid,
        credit_rows: &[credit_wallet_tx::Model],
        wallet_hash: Option<String>,
        credit_hash: Option<String>
    ) -> Result<()> {
        let txn = self.ctx.db.begin().await?;

        // Credit rows in creation order keep the running credit balance right
        for row in credit_rows {
            self.ctx.ledger.finalize_credit_tx(&txn, row.id, credit_hash.clone()).await?;
        }
        self.ctx.ledger.finalize_wallet_tx(&txn, wallet_tx_id, wallet_hash).await?;

        txn.commit().await?;
        Ok(())
    }
}

/// Total staked on a number in an epoch, ignoring bets that failed.
async fn placed_on_number(txn: &DatabaseTransaction, epoch: i64, number_pair: &str) -> Result<Decimal> {
    let (big, small): (Option<Decimal>, Option<Decimal>) = bet_order::Entity
        ::find()
        .select_only()
        .column_as(bet_order::Column::BigForecastAmount.sum(), "big")
        .column_as(bet_order::Column::SmallForecastAmount.sum(), "small")
        .join(JoinType::InnerJoin, bet_order::Relation::WalletTx.def())
        .filter(bet_order::Column::Epoch.eq(epoch))
        .filter(bet_order::Column::NumberPair.eq(number_pair))
        .filter(wallet_tx::Column::Status.ne(TxStatus::Failed.as_str()))
        .into_tuple::<(Option<Decimal>, Option<Decimal>)>()
        .one(txn).await?
        .unwrap_or((None, None));

    Ok(big.unwrap_or_default() + small.unwrap_or_default())
}

async fn credit_rows_of<C: ConnectionTrait>(
    conn: &C,
    wallet_tx_id: Uuid
) -> Result<Vec<credit_wallet_tx::Model>> {
    Ok(
        credit_wallet_tx::Entity
            ::find()
            .filter(credit_wallet_tx::Column::WalletTxId.eq(wallet_tx_id))
            .filter(credit_wallet_tx::Column::TxType.eq(CreditTxType::Play.as_str()))
            .order_by_asc(credit_wallet_tx::Column::CreatedAt)
            .all(conn).await?
    )
}

async fn record_credit_hash<C: ConnectionTrait>(conn: &C, wallet_tx_id: Uuid, tx_hash: &str) -> Result<()> {
    credit_wallet_tx::Entity
        ::update_many()
        .col_expr(credit_wallet_tx::Column::TxHash, Expr::value(tx_hash))
        .col_expr(credit_wallet_tx::Column::UpdatedAt, Expr::value(chrono::Utc::now()))
        .filter(credit_wallet_tx::Column::WalletTxId.eq(wallet_tx_id))
        .filter(credit_wallet_tx::Column::TxType.eq(CreditTxType::Play.as_str()))
        .exec(conn).await?;

    Ok(())
}

#[async_trait]
impl JobHandler for BetPipeline {
    async fn handle(&self, job: &Job) -> Result<()> {
        let payload: RowPayload = job.payload()?;
        self.submit_bet(payload.id).await
    }

    async fn on_failure(&self, job: &Job, error: &AppError) -> Result<()> {
        let payload: RowPayload = job.payload()?;
        let play = super::find_wallet_tx(&self.ctx.db, payload.id).await?;
        let credit_rows = credit_rows_of(&self.ctx.db, payload.id).await?;

        // One leg already moved funds on chain, the batch cannot simply fail
        if play.tx_hash.is_some() || credit_rows.iter().any(|row| row.tx_hash.is_some()) {
            self.ctx.hold_and_escalate(payload.id, error).await;
            return Ok(());
        }

        let txn = self.ctx.db.begin().await?;
        let failed = self.ctx.ledger.fail_wallet_tx(&txn, payload.id).await?;
        for row in &credit_rows {
            self.ctx.ledger.fail_credit_tx(&txn, row.id).await?;
        }
        txn.commit().await?;

        if !failed {
            return Ok(());
        }

        self.ctx.escalate(
            "bet_failed",
            "Bet submission failed",
            format!("Bet batch {} failed after {} attempts: {}", payload.id, job.attempts_made, error),
            Some(payload.id)
        ).await;
        self.ctx.notify_user(
            play.user_wallet_id,
            UserNotification::new(
                "bet_failed",
                "Bet failed",
                "Your bet could not be placed and nothing was charged.".to_string(),
                Some(payload.id)
            )
        ).await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(big: Decimal, small: Decimal, credit: Decimal) -> bet_order::Model {
        bet_order::Model {
            id: Uuid::new_v4(),
            wallet_tx_id: Uuid::new_v4(),
            credit_wallet_tx_id: None,
            user_wallet_id: Uuid::new_v4(),
            epoch: 12,
            number_pair: "0427".to_string(),
            big_forecast_amount: big,
            small_forecast_amount: small,
            credit_amount: credit,
            claim_wallet_tx_id: None,
            created_at: chrono::Utc::now(),
        }
    }

    fn open_game(epoch: i64, end_in: i64) -> game::Model {
        let now = chrono::Utc::now();
        game::Model {
            epoch,
            start_at: now - chrono::Duration::minutes(10),
            end_at: now + chrono::Duration::seconds(end_in),
            min_bet_amount: dec!(1),
            max_bet_amount: dec!(100),
            max_amount_per_number: dec!(1000),
            drawn_at: None,
        }
    }

    #[test]
    fn test_credit_is_capped_per_bet_and_spent_in_order() {
        let credits = allocate_credit(dec!(2.5), dec!(1), &[dec!(5), dec!(0.4), dec!(3), dec!(3)]);
        assert_eq!(credits, vec![dec!(1), dec!(0.4), dec!(1), dec!(0.1)]);

        assert_eq!(allocate_credit(dec!(0), dec!(1), &[dec!(5)]), vec![dec!(0)]);
    }

    #[test]
    fn test_credit_funds_big_forecast_first() {
        let (wallet, credit) = split_forecasts(&order(dec!(0.5), dec!(2), dec!(1)));

        assert_eq!(credit.len(), 2);
        assert_eq!((credit[0].forecast, credit[0].amount), (Forecast::Big, dec!(0.5)));
        assert_eq!((credit[1].forecast, credit[1].amount), (Forecast::Small, dec!(0.5)));

        assert_eq!(wallet.len(), 1);
        assert_eq!((wallet[0].forecast, wallet[0].amount), (Forecast::Small, dec!(1.5)));
    }

    #[test]
    fn test_fully_credit_funded_order_has_no_wallet_leg() {
        let (wallet, credit) = split_forecasts(&order(dec!(1), dec!(0), dec!(1)));
        assert!(wallet.is_empty());
        assert_eq!(credit.len(), 1);
    }

    #[test]
    fn test_merge_lines_sums_duplicates() {
        let line = |epoch, number: &str, big| BetLine {
            epoch,
            number_pair: number.to_string(),
            big_forecast_amount: big,
            small_forecast_amount: dec!(0),
        };

        let merged = merge_lines(vec![line(5, "12", dec!(1)), line(5, "12", dec!(2)), line(6, "12", dec!(1))]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].big_forecast_amount, dec!(3));
    }

    #[test]
    fn test_epoch_window_rules() {
        let now = chrono::Utc::now();
        let masking = chrono::Duration::seconds(60);

        assert!(check_epoch(&open_game(10, 600), 10, 30, masking, now).is_ok());
        assert!(check_epoch(&open_game(40, 600), 10, 30, masking, now).is_ok());

        // Inside the masking interval before close
        assert!(matches!(check_epoch(&open_game(10, 30), 10, 30, masking, now), Err(AppError::InvalidEpoch(_))));
        // Past and too far ahead
        assert!(check_epoch(&open_game(9, 600), 10, 30, masking, now).is_err());
        assert!(check_epoch(&open_game(41, 600), 10, 30, masking, now).is_err());

        let drawn = game::Model { drawn_at: Some(now), ..open_game(10, 600) };
        assert!(check_epoch(&drawn, 10, 30, masking, now).is_err());
    }

    #[test]
    fn test_line_validation() {
        let mut line = BetLine {
            epoch: 1,
            number_pair: "07".to_string(),
            big_forecast_amount: dec!(1),
            small_forecast_amount: dec!(0),
        };
        assert!(validate_line(&line).is_ok());

        line.number_pair = "7a".to_string();
        assert!(validate_line(&line).is_err());

        line.number_pair = "07".to_string();
        line.big_forecast_amount = dec!(0);
        assert!(validate_line(&line).is_err());
    }
}
