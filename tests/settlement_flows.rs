mod common;

use chrono::Utc;
use game_ledger::db::entity::{
    bet_order,
    credit_wallet_tx,
    deposit_tx,
    draw_result,
    game,
    game_usd_tx,
    redeem_tx,
    user,
    wallet_tx,
};
use game_ledger::enums::{ CreditTxType, Forecast, TxStatus, WalletTxType };
use game_ledger::pipelines::bet::{ BetLine, BetRequest };
use game_ledger::pipelines::credit::CreditGrant;
use game_ledger::pipelines::deposit::DepositRequest;
use game_ledger::pipelines::redeem::{ RedeemReceipt, RedeemRequest, RedeemReview, PAYOUT_SUCCESS };
use game_ledger::pipelines::{ job_id, PROCESS_REDEEM_JOB, REVOKE_CREDIT_JOB, SUBMIT_CLAIM_JOB };
use game_ledger::providers::{ ContractCall, ForecastParam };
use game_ledger::services::gas_reload_service::reload_job_id;
use game_ledger::AppError;
use rust_decimal_macros::dec;
use sea_orm::{ entity::prelude::*, sea_query::Expr, QueryOrder, Set, TransactionTrait };
use uuid::Uuid;

use common::{ random_address, setup, CHAIN_ID };

/// Longer than the sweep backoff after the second failed attempt.
const RETRY_WAIT: std::time::Duration = std::time::Duration::from_millis(150);

fn deposit_request(receiver: &str, amount: Decimal) -> DepositRequest {
    DepositRequest {
        chain_id: CHAIN_ID,
        sender_address: random_address(),
        receiver_address: receiver.to_string(),
        amount,
        tx_hash: format!("0x{:064x}", Uuid::new_v4().as_u128()),
    }
}

#[tokio::test]
async fn test_deposit_mints_and_pays_referrer() {
    let Some(h) = setup().await else {
        return;
    };

    let (referrer, referrer_wallet) = h.create_user(None, 2).await;
    let (_, wallet) = h.create_user(Some(referrer.id), 1).await;

    let deposit = h.deposits.process_deposit(deposit_request(&wallet.wallet_address, dec!(50))).await.unwrap();
    assert_eq!(deposit.status, TxStatus::Pending.as_str());

    h.deposits.run_escrow_sweep().await.unwrap();
    let escrowed = deposit_tx::Entity::find_by_id(deposit.id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(escrowed.status, TxStatus::Success.as_str());
    assert!(escrowed.escrow_tx_hash.is_some());

    // First pass mints the deposit, second pass mints the commission it booked
    h.deposits.run_mint_sweep().await.unwrap();
    h.deposits.run_mint_sweep().await.unwrap();

    let deposit_row = wallet_tx::Entity::find_by_id(deposit.wallet_tx_id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(deposit_row.status, TxStatus::Success.as_str());
    assert_eq!(deposit_row.starting_balance, Some(dec!(0)));
    assert_eq!(deposit_row.ending_balance, Some(dec!(50)));
    assert_eq!(h.wallet(wallet.id).await.wallet_balance, dec!(50));

    let referral = wallet_tx::Entity
        ::find()
        .filter(wallet_tx::Column::UserWalletId.eq(referrer_wallet.id))
        .filter(wallet_tx::Column::TxType.eq(WalletTxType::Referral.as_str()))
        .one(&h.db).await
        .unwrap()
        .unwrap();
    assert_eq!(referral.amount, dec!(7.5));
    assert_eq!(referral.status, TxStatus::Success.as_str());

    let referrer_wallet = h.wallet(referrer_wallet.id).await;
    assert_eq!(referrer_wallet.wallet_balance, dec!(7.5));
    assert_eq!(referrer_wallet.redeemable_balance, dec!(7.5));

    assert_eq!(h.chain.calls_named("transfer").len(), 1);
    assert_eq!(h.chain.calls_named("deposit").len(), 2);

    for id in [wallet.id, referrer_wallet.id] {
        assert!(h.ctx.ledger.audit_wallet(id).await.unwrap().is_consistent());
    }
}

#[tokio::test]
async fn test_replayed_deposit_is_recorded_once() {
    let Some(h) = setup().await else {
        return;
    };

    let (_, wallet) = h.create_user(None, 1).await;
    let request = deposit_request(&wallet.wallet_address, dec!(20));

    let first = h.deposits.process_deposit(request.clone()).await.unwrap();
    let second = h.deposits.process_deposit(request).await.unwrap();
    assert_eq!(first.id, second.id);

    let below = h.deposits.process_deposit(deposit_request(&wallet.wallet_address, dec!(5))).await;
    assert!(matches!(below, Err(AppError::BelowMinimum { .. })));
}

#[tokio::test]
async fn test_escrow_gives_up_after_retry_ceiling() {
    let Some(h) = setup().await else {
        return;
    };

    let (_, wallet) = h.create_user(None, 1).await;
    let deposit = h.deposits.process_deposit(deposit_request(&wallet.wallet_address, dec!(50))).await.unwrap();

    *h.chain.fail_calls.lock().unwrap() = true;
    let mut counts = Vec::new();
    for _ in 0..5 {
        h.deposits.run_escrow_sweep().await.unwrap();
        tokio::time::sleep(RETRY_WAIT).await;
        let row = deposit_tx::Entity::find_by_id(deposit.id).one(&h.db).await.unwrap().unwrap();
        counts.push(row.retry_count);
    }

    // Ceiling is 3 in the test configuration
    assert_eq!(counts, vec![1, 2, 3, 3, 3]);

    let row = deposit_tx::Entity::find_by_id(deposit.id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(row.status, TxStatus::Failed.as_str());
    let ledger_row = wallet_tx::Entity::find_by_id(deposit.wallet_tx_id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(ledger_row.status, TxStatus::Failed.as_str());

    let escalations = h.notifier.escalations_for(deposit.wallet_tx_id);
    assert_eq!(escalations.len(), 1);
    assert_eq!(escalations[0].kind, "deposit_escrow_failed");
    assert_eq!(h.wallet(wallet.id).await.wallet_balance, dec!(0));
}

#[tokio::test]
async fn test_finalizing_twice_applies_once() {
    let Some(h) = setup().await else {
        return;
    };

    let (_, wallet) = h.create_user(None, 1).await;
    let deposit = h.deposits.process_deposit(deposit_request(&wallet.wallet_address, dec!(30))).await.unwrap();

    for _ in 0..2 {
        let txn = h.db.begin().await.unwrap();
        h.ctx.ledger.finalize_wallet_tx(&txn, deposit.wallet_tx_id, None).await.unwrap();
        txn.commit().await.unwrap();
    }

    assert_eq!(h.wallet(wallet.id).await.wallet_balance, dec!(30));
    assert!(h.ctx.ledger.audit_wallet(wallet.id).await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_bet_settles_and_respects_number_cap() {
    let Some(h) = setup().await else {
        return;
    };

    let now = Utc::now();
    (game::ActiveModel {
        epoch: Set(1),
        start_at: Set(now - chrono::Duration::minutes(1)),
        end_at: Set(now + chrono::Duration::minutes(10)),
        min_bet_amount: Set(dec!(1)),
        max_bet_amount: Set(dec!(100)),
        max_amount_per_number: Set(dec!(20)),
        drawn_at: Set(None),
    }).insert(&h.db).await.unwrap();

    let (user, wallet) = h.create_user(None, 1).await;
    h.fund(&wallet, dec!(100), dec!(0)).await;

    let line = |big, small| BetLine {
        epoch: 1,
        number_pair: "1234".to_string(),
        big_forecast_amount: big,
        small_forecast_amount: small,
    };

    let receipt = h.bets.place_bets(BetRequest { user_id: user.id, bets: vec![line(dec!(10), dec!(5))] }).await.unwrap();
    assert_eq!(receipt.wallet_amount, dec!(15));
    assert_eq!(receipt.orders, 1);

    let sold_out = h.bets.place_bets(BetRequest { user_id: user.id, bets: vec![line(dec!(10), dec!(0))] }).await;
    assert!(matches!(sold_out, Err(AppError::InvalidInput(_))));

    let future = h.bets.place_bets(BetRequest {
        user_id: user.id,
        bets: vec![BetLine { epoch: 99, ..line(dec!(1), dec!(0)) }],
    }).await;
    assert!(matches!(future, Err(AppError::InvalidEpoch(_))));

    h.drain_jobs().await;

    let play = wallet_tx::Entity::find_by_id(receipt.wallet_tx_id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(play.status, TxStatus::Success.as_str());
    assert_eq!(play.ending_balance, Some(dec!(85)));
    assert_eq!(h.wallet(wallet.id).await.wallet_balance, dec!(85));

    let bets = h.chain.calls_named("bet");
    assert_eq!(bets.len(), 1);
    let ContractCall::Bet { bets: params, .. } = &bets[0] else {
        panic!("expected a bet call");
    };
    assert_eq!(params.len(), 2);
    assert!(h.ctx.ledger.audit_wallet(wallet.id).await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_claim_pays_category_two_prize() {
    let Some(h) = setup().await else {
        return;
    };

    let now = Utc::now();
    (game::ActiveModel {
        epoch: Set(7),
        start_at: Set(now - chrono::Duration::hours(2)),
        end_at: Set(now - chrono::Duration::hours(1)),
        min_bet_amount: Set(dec!(1)),
        max_bet_amount: Set(dec!(100)),
        max_amount_per_number: Set(dec!(1000)),
        drawn_at: Set(Some(now)),
    }).insert(&h.db).await.unwrap();
    (draw_result::ActiveModel {
        id: Set(Uuid::new_v4()),
        epoch: Set(7),
        number_pair: Set("4321".to_string()),
        prize_category: Set("2".to_string()),
        created_at: Set(now),
    }).insert(&h.db).await.unwrap();

    let (user, wallet) = h.create_user(None, 1).await;

    // A bet that already settled on chain
    let play = (wallet_tx::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_wallet_id: Set(wallet.id),
        tx_type: Set(WalletTxType::Play.to_string()),
        amount: Set(dec!(10)),
        starting_balance: Set(Some(dec!(10))),
        ending_balance: Set(Some(dec!(0))),
        status: Set(TxStatus::Success.to_string()),
        tx_hash: Set(Some("0xbet".to_string())),
        game_usd_tx_id: Set(None),
        escalated: Set(false),
        created_at: Set(now),
        updated_at: Set(now),
    }).insert(&h.db).await.unwrap();
    (bet_order::ActiveModel {
        id: Set(Uuid::new_v4()),
        wallet_tx_id: Set(play.id),
        credit_wallet_tx_id: Set(None),
        user_wallet_id: Set(wallet.id),
        epoch: Set(7),
        number_pair: Set("4321".to_string()),
        big_forecast_amount: Set(dec!(10)),
        small_forecast_amount: Set(dec!(0)),
        credit_amount: Set(dec!(0)),
        claim_wallet_tx_id: Set(None),
        created_at: Set(now),
    }).insert(&h.db).await.unwrap();

    let receipt = h.claims.claim(user.id).await.unwrap().unwrap();
    assert_eq!(receipt.claim_amount, dec!(10000));
    assert_eq!(receipt.point_amount, dec!(200000000));
    assert_eq!(receipt.winning_orders, 1);

    // Reserved orders cannot be claimed again
    assert!(h.claims.claim(user.id).await.unwrap().is_none());

    h.drain_jobs().await;

    let claim = wallet_tx::Entity::find_by_id(receipt.wallet_tx_id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(claim.status, TxStatus::Success.as_str());

    let wallet = h.wallet(wallet.id).await;
    assert_eq!(wallet.wallet_balance, dec!(10000));
    assert_eq!(wallet.redeemable_balance, dec!(10000));
    assert_eq!(wallet.point_balance, dec!(200000000));

    let claims = h.chain.calls_named("claim");
    assert_eq!(claims.len(), 1);
    let ContractCall::Claim { claims: params, .. } = &claims[0] else {
        panic!("expected a claim call");
    };
    assert_eq!(params, &vec![ForecastParam {
        epoch: 7,
        number: "4321".to_string(),
        forecast: Forecast::Big,
        amount: dec!(10),
    }]);
}

#[tokio::test]
async fn test_redeem_auto_approval_and_review() {
    let Some(h) = setup().await else {
        return;
    };

    *h.chain.stable_balance.lock().unwrap() = Some(dec!(10000));
    let (user, wallet) = h.create_user(None, 1).await;
    h.fund(&wallet, dec!(500), dec!(500)).await;
    let destination = random_address();

    let small = h.redeems.request_redeem(RedeemRequest {
        user_id: user.id,
        amount: dec!(50),
        destination_address: destination.clone(),
    }).await.unwrap();
    assert!(small.auto_approved);
    assert_eq!(small.status, TxStatus::Pending);
    assert!(h.queue.job_exists(&job_id(PROCESS_REDEEM_JOB, small.wallet_tx_id)).await.unwrap());

    let large = h.redeems.request_redeem(RedeemRequest {
        user_id: user.id,
        amount: dec!(150),
        destination_address: destination.clone(),
    }).await.unwrap();
    assert!(!large.auto_approved);
    assert_eq!(large.status, TxStatus::PendingAdmin);
    assert!(!h.queue.job_exists(&job_id(PROCESS_REDEEM_JOB, large.wallet_tx_id)).await.unwrap());

    // Leg a, then the payout sweep picks up the signed payout for leg b
    h.drain_jobs().await;
    assert_eq!(h.redeems.run_payout_sweep().await.unwrap(), 1);
    h.drain_jobs().await;

    let redeem = redeem_tx::Entity::find_by_id(small.redeem_tx_id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(redeem.payout_status.as_deref(), Some(PAYOUT_SUCCESS));
    assert!(redeem.redeem_tx_hash.is_some());
    assert!(redeem.payout_tx_hash.is_some());

    let payouts = h.chain.calls_named("payout");
    assert_eq!(payouts.len(), 1);
    let ContractCall::Payout { amount, to, .. } = &payouts[0] else {
        panic!("expected a payout call");
    };
    assert_eq!(*amount, dec!(49));
    assert_eq!(to, &destination);

    let wallet_after = h.wallet(wallet.id).await;
    assert_eq!(wallet_after.wallet_balance, dec!(450));
    assert_eq!(wallet_after.redeemable_balance, dec!(450));

    // Rejecting the parked request leaves the balance alone
    h.redeems.review_redeem(large.wallet_tx_id, RedeemReview {
        admin_id: "ops".to_string(),
        approve: false,
        note: None,
    }).await.unwrap();
    let rejected = wallet_tx::Entity::find_by_id(large.wallet_tx_id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(rejected.status, TxStatus::Failed.as_str());
    assert_eq!(h.wallet(wallet.id).await.wallet_balance, dec!(450));
    assert!(h.ctx.ledger.audit_wallet(wallet.id).await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_unreadable_pool_balance_parks_redeem() {
    let Some(h) = setup().await else {
        return;
    };

    let (user, wallet) = h.create_user(None, 1).await;
    h.fund(&wallet, dec!(100), dec!(100)).await;

    let receipt = h.redeems.request_redeem(RedeemRequest {
        user_id: user.id,
        amount: dec!(20),
        destination_address: random_address(),
    }).await.unwrap();
    assert!(!receipt.auto_approved);
    assert_eq!(receipt.status, TxStatus::PendingAdmin);

    let overdraw = h.redeems.request_redeem(RedeemRequest {
        user_id: user.id,
        amount: dec!(90),
        destination_address: random_address(),
    }).await;
    assert!(matches!(overdraw, Err(AppError::InsufficientBalance)));
}

#[tokio::test]
async fn test_credit_expiry_removes_expired_part() {
    let Some(h) = setup().await else {
        return;
    };

    let (_, wallet) = h.create_user(None, 1).await;
    let now = Utc::now();

    let lasting = h.credits.issue_credit(CreditGrant {
        user_wallet_id: wallet.id,
        amount: dec!(60),
        expiration_date: now + chrono::Duration::days(30),
        campaign: Some("loyalty".to_string()),
    }).await.unwrap();
    let expiring = h.credits.issue_credit(CreditGrant {
        user_wallet_id: wallet.id,
        amount: dec!(40),
        expiration_date: now + chrono::Duration::hours(1),
        campaign: Some("welcome".to_string()),
    }).await.unwrap();

    h.drain_jobs().await;
    assert_eq!(h.wallet(wallet.id).await.credit_balance, dec!(100));

    assert_eq!(h.credits.run_credit_expiry(now + chrono::Duration::hours(2)).await.unwrap(), 1);

    assert_eq!(h.wallet(wallet.id).await.credit_balance, dec!(60));

    let expired = credit_wallet_tx::Entity::find_by_id(expiring.id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(expired.status, TxStatus::Expired.as_str());
    let kept = credit_wallet_tx::Entity::find_by_id(lasting.id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(kept.status, TxStatus::Success.as_str());

    let expiry = credit_wallet_tx::Entity
        ::find()
        .filter(credit_wallet_tx::Column::UserWalletId.eq(wallet.id))
        .filter(credit_wallet_tx::Column::TxType.eq(CreditTxType::Expiry.as_str()))
        .order_by_desc(credit_wallet_tx::Column::CreatedAt)
        .one(&h.db).await
        .unwrap()
        .unwrap();
    assert_eq!(expiry.amount, dec!(40));
    assert_eq!(expiry.ending_balance, Some(dec!(60)));
    assert!(h.queue.job_exists(&job_id(REVOKE_CREDIT_JOB, expiry.id)).await.unwrap());

    h.drain_jobs().await;
    assert_eq!(h.chain.calls_named("revokeCredit").len(), 1);
    assert!(h.ctx.ledger.audit_wallet(wallet.id).await.unwrap().is_consistent());

    // Nothing left to expire on the next pass
    assert_eq!(h.credits.run_credit_expiry(now + chrono::Duration::hours(2)).await.unwrap(), 0);
}

#[tokio::test]
async fn test_mint_failure_fails_linked_rows_once() {
    let Some(h) = setup().await else {
        return;
    };

    let (_, wallet) = h.create_user(None, 1).await;
    let deposit = h.deposits.process_deposit(deposit_request(&wallet.wallet_address, dec!(25))).await.unwrap();
    h.deposits.run_escrow_sweep().await.unwrap();

    *h.chain.fail_calls.lock().unwrap() = true;
    for _ in 0..5 {
        h.deposits.run_mint_sweep().await.unwrap();
        tokio::time::sleep(RETRY_WAIT).await;
    }

    let ledger_row = wallet_tx::Entity::find_by_id(deposit.wallet_tx_id).one(&h.db).await.unwrap().unwrap();
    let mint_id = ledger_row.game_usd_tx_id.unwrap();
    let mint = game_usd_tx::Entity::find_by_id(mint_id).one(&h.db).await.unwrap().unwrap();

    assert_eq!(mint.status, TxStatus::Failed.as_str());
    assert_eq!(mint.retry_count, 3);
    assert_eq!(ledger_row.status, TxStatus::Failed.as_str());
    assert_eq!(h.notifier.escalations_for(deposit.wallet_tx_id).len(), 1);
}

#[tokio::test]
async fn test_confirmed_mint_with_broken_referrer_is_not_minted_again() {
    let Some(h) = setup().await else {
        return;
    };

    // A referrer whose wallet was never provisioned
    let referrer = (user::ActiveModel {
        id: Set(Uuid::new_v4()),
        custody_address: Set(random_address()),
        referrer_id: Set(None),
        referral_rank: Set(1),
        created_at: Set(Utc::now()),
    }).insert(&h.db).await.unwrap();
    let (_, wallet) = h.create_user(Some(referrer.id), 1).await;

    let deposit = h.deposits.process_deposit(deposit_request(&wallet.wallet_address, dec!(50))).await.unwrap();
    h.deposits.run_escrow_sweep().await.unwrap();
    for _ in 0..3 {
        h.deposits.run_mint_sweep().await.unwrap();
        tokio::time::sleep(RETRY_WAIT).await;
    }

    assert_eq!(h.chain.calls_named("deposit").len(), 1);
    let deposit_row = wallet_tx::Entity::find_by_id(deposit.wallet_tx_id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(deposit_row.status, TxStatus::Success.as_str());
    assert_eq!(h.wallet(wallet.id).await.wallet_balance, dec!(50));

    let escalations = h.notifier.escalations_for(deposit.wallet_tx_id);
    assert_eq!(escalations.len(), 1);
    assert_eq!(escalations[0].kind, "referral_failed");
}

#[tokio::test]
async fn test_unrecorded_mint_is_held_not_resubmitted() {
    let Some(h) = setup().await else {
        return;
    };

    let (_, wallet) = h.create_user(None, 1).await;
    let deposit = h.deposits.process_deposit(deposit_request(&wallet.wallet_address, dec!(40))).await.unwrap();
    h.deposits.run_escrow_sweep().await.unwrap();

    h.reject_updates("game_usd_tx", "NEW.status = 'success'").await;
    for _ in 0..3 {
        h.deposits.run_mint_sweep().await.unwrap();
        tokio::time::sleep(RETRY_WAIT).await;
    }
    h.allow_updates("game_usd_tx").await;

    assert_eq!(h.chain.calls_named("deposit").len(), 1);

    let ledger_row = wallet_tx::Entity::find_by_id(deposit.wallet_tx_id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(ledger_row.status, TxStatus::PendingDeveloper.as_str());
    assert!(ledger_row.escalated);

    let mint = game_usd_tx::Entity::find_by_id(ledger_row.game_usd_tx_id.unwrap()).one(&h.db).await.unwrap().unwrap();
    assert_eq!(mint.status, TxStatus::PendingDeveloper.as_str());
    assert!(mint.tx_hash.is_some());
    assert_eq!(h.wallet(wallet.id).await.wallet_balance, dec!(0));
}

#[tokio::test]
async fn test_gas_shortage_backs_off_instead_of_burning_retries() {
    let Some(h) = setup().await else {
        return;
    };

    let (_, wallet) = h.create_user(None, 1).await;
    h.chain.set_native_balance(&wallet.wallet_address, dec!(0));
    let deposit = h.deposits.process_deposit(deposit_request(&wallet.wallet_address, dec!(50))).await.unwrap();

    for _ in 0..3 {
        h.deposits.run_escrow_sweep().await.unwrap();
    }

    let row = deposit_tx::Entity::find_by_id(deposit.id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(row.status, TxStatus::Pending.as_str());
    assert_eq!(row.retry_count, 1);
    assert!(h.queue.job_exists(&reload_job_id(&wallet.wallet_address)).await.unwrap());
    assert!(h.chain.calls_named("transfer").is_empty());

    // The reload lands before the next attempt is due
    h.chain.set_native_balance(&wallet.wallet_address, dec!(1));
    tokio::time::sleep(RETRY_WAIT).await;
    h.deposits.run_escrow_sweep().await.unwrap();

    let row = deposit_tx::Entity::find_by_id(deposit.id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(row.status, TxStatus::Success.as_str());
    assert_eq!(h.chain.calls_named("transfer").len(), 1);
}

#[tokio::test]
async fn test_expiry_leaves_credit_reserved_by_pending_bet() {
    let Some(h) = setup().await else {
        return;
    };

    h.open_game(1).await;
    let (user, wallet) = h.create_user(None, 1).await;
    let now = Utc::now();

    h.credits.issue_credit(CreditGrant {
        user_wallet_id: wallet.id,
        amount: dec!(5),
        expiration_date: now + chrono::Duration::hours(1),
        campaign: None,
    }).await.unwrap();
    h.drain_jobs().await;

    // Staked entirely from credit and not yet on chain
    let receipt = h.bets.place_bets(BetRequest {
        user_id: user.id,
        bets: vec![BetLine {
            epoch: 1,
            number_pair: "0707".to_string(),
            big_forecast_amount: dec!(1),
            small_forecast_amount: dec!(0),
        }],
    }).await.unwrap();
    assert_eq!(receipt.credit_amount, dec!(1));
    assert_eq!(receipt.wallet_amount, dec!(0));

    h.credits.run_credit_expiry(now + chrono::Duration::hours(2)).await.unwrap();

    let expiry = credit_wallet_tx::Entity
        ::find()
        .filter(credit_wallet_tx::Column::UserWalletId.eq(wallet.id))
        .filter(credit_wallet_tx::Column::TxType.eq(CreditTxType::Expiry.as_str()))
        .one(&h.db).await
        .unwrap()
        .unwrap();
    assert_eq!(expiry.amount, dec!(4));
    assert_eq!(h.wallet(wallet.id).await.credit_balance, dec!(1));

    h.drain_jobs().await;

    let play = wallet_tx::Entity::find_by_id(receipt.wallet_tx_id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(play.status, TxStatus::Success.as_str());
    assert_eq!(h.chain.calls_named("betWithCredit").len(), 1);
    assert_eq!(h.wallet(wallet.id).await.credit_balance, dec!(0));
    assert!(h.ctx.ledger.audit_wallet(wallet.id).await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_unrecorded_bet_hash_parks_instead_of_betting_twice() {
    let Some(h) = setup().await else {
        return;
    };

    h.open_game(1).await;
    let (user, wallet) = h.create_user(None, 1).await;
    h.fund(&wallet, dec!(100), dec!(0)).await;

    let receipt = h.bets.place_bets(BetRequest {
        user_id: user.id,
        bets: vec![BetLine {
            epoch: 1,
            number_pair: "5555".to_string(),
            big_forecast_amount: dec!(10),
            small_forecast_amount: dec!(0),
        }],
    }).await.unwrap();

    h.reject_updates("wallet_tx", "OLD.tx_hash IS NULL AND NEW.tx_hash IS NOT NULL").await;
    h.drain_jobs().await;
    h.allow_updates("wallet_tx").await;
    h.drain_jobs().await;

    assert_eq!(h.chain.calls_named("bet").len(), 1);

    let play = wallet_tx::Entity::find_by_id(receipt.wallet_tx_id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(play.status, TxStatus::PendingDeveloper.as_str());
    assert!(play.escalated);

    let escalations = h.notifier.escalations_for(receipt.wallet_tx_id);
    assert_eq!(escalations.len(), 1);
    assert_eq!(escalations[0].kind, "ledger_rollback");

    // Still reserved, so it cannot be spent again
    let wallet = h.wallet(wallet.id).await;
    assert_eq!(wallet.wallet_balance, dec!(100));
    assert_eq!(h.ctx.ledger.available_wallet_balance(&h.db, &wallet).await.unwrap(), dec!(90));
}

async fn redeem_through_leg_a(h: &common::Harness) -> RedeemReceipt {
    *h.chain.stable_balance.lock().unwrap() = Some(dec!(10000));
    let (user, wallet) = h.create_user(None, 1).await;
    h.fund(&wallet, dec!(200), dec!(200)).await;

    let receipt = h.redeems.request_redeem(RedeemRequest {
        user_id: user.id,
        amount: dec!(30),
        destination_address: random_address(),
    }).await.unwrap();
    assert!(receipt.auto_approved);
    h.drain_jobs().await;

    receipt
}

#[tokio::test]
async fn test_unrecorded_payout_is_held_not_paid_twice() {
    let Some(h) = setup().await else {
        return;
    };

    let receipt = redeem_through_leg_a(&h).await;

    h.reject_updates("redeem_tx", "NEW.payout_status = 'success'").await;
    assert_eq!(h.redeems.run_payout_sweep().await.unwrap(), 1);
    h.drain_jobs().await;
    h.allow_updates("redeem_tx").await;

    // Held rows are no longer swept
    assert_eq!(h.redeems.run_payout_sweep().await.unwrap(), 0);
    h.drain_jobs().await;

    assert_eq!(h.chain.calls_named("payout").len(), 1);

    let redeem = redeem_tx::Entity::find_by_id(receipt.redeem_tx_id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(redeem.payout_status.as_deref(), Some(TxStatus::PendingDeveloper.as_str()));
    assert!(redeem.payout_tx_hash.is_some());

    let escalations = h.notifier.escalations_for(receipt.wallet_tx_id);
    assert_eq!(escalations.len(), 1);
    assert_eq!(escalations[0].kind, "payout_rollback");
}

#[tokio::test]
async fn test_payout_with_recorded_hash_is_not_resent() {
    let Some(h) = setup().await else {
        return;
    };

    let receipt = redeem_through_leg_a(&h).await;

    // A previous attempt sent the payout and stored its hash
    redeem_tx::Entity
        ::update_many()
        .col_expr(redeem_tx::Column::PayoutTxHash, Expr::value("0xsent"))
        .filter(redeem_tx::Column::Id.eq(receipt.redeem_tx_id))
        .exec(&h.db).await
        .unwrap();

    assert_eq!(h.redeems.run_payout_sweep().await.unwrap(), 1);
    h.drain_jobs().await;

    assert!(h.chain.calls_named("payout").is_empty());
    let redeem = redeem_tx::Entity::find_by_id(receipt.redeem_tx_id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(redeem.payout_status.as_deref(), Some(PAYOUT_SUCCESS));
    assert_eq!(redeem.payout_tx_hash.as_deref(), Some("0xsent"));
}

#[tokio::test]
async fn test_points_only_win_skips_the_chain() {
    let Some(h) = setup().await else {
        return;
    };

    let now = Utc::now();
    (game::ActiveModel {
        epoch: Set(9),
        start_at: Set(now - chrono::Duration::hours(2)),
        end_at: Set(now - chrono::Duration::hours(1)),
        min_bet_amount: Set(dec!(1)),
        max_bet_amount: Set(dec!(100)),
        max_amount_per_number: Set(dec!(1000)),
        drawn_at: Set(Some(now)),
    }).insert(&h.db).await.unwrap();
    (draw_result::ActiveModel {
        id: Set(Uuid::new_v4()),
        epoch: Set(9),
        number_pair: Set("2468".to_string()),
        prize_category: Set("S".to_string()),
        created_at: Set(now),
    }).insert(&h.db).await.unwrap();

    let (user, wallet) = h.create_user(None, 1).await;
    let play = (wallet_tx::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_wallet_id: Set(wallet.id),
        tx_type: Set(WalletTxType::Play.to_string()),
        amount: Set(dec!(2)),
        starting_balance: Set(Some(dec!(2))),
        ending_balance: Set(Some(dec!(0))),
        status: Set(TxStatus::Success.to_string()),
        tx_hash: Set(Some("0xbet".to_string())),
        game_usd_tx_id: Set(None),
        escalated: Set(false),
        created_at: Set(now),
        updated_at: Set(now),
    }).insert(&h.db).await.unwrap();
    (bet_order::ActiveModel {
        id: Set(Uuid::new_v4()),
        wallet_tx_id: Set(play.id),
        credit_wallet_tx_id: Set(None),
        user_wallet_id: Set(wallet.id),
        epoch: Set(9),
        number_pair: Set("2468".to_string()),
        big_forecast_amount: Set(dec!(0)),
        small_forecast_amount: Set(dec!(2)),
        credit_amount: Set(dec!(0)),
        claim_wallet_tx_id: Set(None),
        created_at: Set(now),
    }).insert(&h.db).await.unwrap();

    let receipt = h.claims.claim(user.id).await.unwrap().unwrap();
    assert_eq!(receipt.claim_amount, dec!(0));
    assert!(receipt.point_amount > dec!(0));

    assert!(!h.queue.job_exists(&job_id(SUBMIT_CLAIM_JOB, receipt.wallet_tx_id)).await.unwrap());
    h.drain_jobs().await;
    assert!(h.chain.calls_named("claim").is_empty());

    let claim = wallet_tx::Entity::find_by_id(receipt.wallet_tx_id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(claim.status, TxStatus::Success.as_str());
    assert!(claim.tx_hash.is_none());

    let wallet = h.wallet(wallet.id).await;
    assert_eq!(wallet.point_balance, receipt.point_amount);
    assert_eq!(wallet.wallet_balance, dec!(0));

    // The orders are settled and do not come back
    assert!(h.claims.claim(user.id).await.unwrap().is_none());
}
