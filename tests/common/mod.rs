#![allow(dead_code)]

use async_trait::async_trait;
use game_ledger::config::{ ChainConfig, SettlementConfig };
use game_ledger::db::entity::{ game, user, user_wallet, wallet_tx };
use game_ledger::enums::{ TxStatus, WalletTxType };
use game_ledger::pipelines::{
    self,
    BetPipeline,
    ClaimPipeline,
    CreditPipeline,
    DepositPipeline,
    PipelineContext,
    RedeemPipeline,
};
use game_ledger::providers::{ ContractCall, KeyCustody, Receipt, SettlementChain };
use game_ledger::queue::{ InMemoryJobStore, JobOptions, JobQueue, SETTLEMENT_QUEUE };
use game_ledger::services::{ AdminNotification, Notifier, SettlementAdapter, UserNotification };
use game_ledger::{ AppError, Result };
use migration::MigratorTrait;
use sea_orm::{ entity::prelude::*, ConnectionTrait, Database, DatabaseConnection, Set, TransactionTrait };
use std::collections::HashMap;
use std::sync::atomic::{ AtomicUsize, Ordering };
use std::sync::{ Arc, Mutex };
use std::time::Duration;
use uuid::Uuid;

/// Scenarios share one database, so they run one at a time.
static DB_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

pub const CHAIN_ID: u64 = 31337;

pub fn chain_config() -> ChainConfig {
    ChainConfig {
        rpc_urls: vec!["http://localhost:8545".to_string()],
        chain_id: CHAIN_ID,
        stable_token: "0x00000000000000000000000000000000000000a1".to_string(),
        stable_token_decimals: 6,
        game_usd_contract: "0x00000000000000000000000000000000000000a2".to_string(),
        betting_contract: "0x00000000000000000000000000000000000000a3".to_string(),
        credit_contract: "0x00000000000000000000000000000000000000a4".to_string(),
        pool_contract: "0x00000000000000000000000000000000000000a5".to_string(),
        escrow_address: "0x00000000000000000000000000000000000000b1".to_string(),
        deposit_bot_address: "0x00000000000000000000000000000000000000b2".to_string(),
        pool_address: "0x00000000000000000000000000000000000000b3".to_string(),
        payout_signer_address: "0x00000000000000000000000000000000000000b4".to_string(),
        gas_bank_address: "0x00000000000000000000000000000000000000b5".to_string(),
        receipt_timeout: Duration::from_millis(500),
        gas_padding_percent: 30,
        min_native_gas: Decimal::new(1, 2),
        gas_reload_amount: Decimal::new(5, 2),
    }
}

pub fn random_address() -> String {
    format!("0x{:040x}", Uuid::new_v4().as_u128())
}

/// In-process chain. Every call confirms unless `fail_calls` is set.
#[derive(Default)]
pub struct FakeChain {
    pub calls: Mutex<Vec<ContractCall>>,
    pub fail_calls: Mutex<bool>,
    pub stable_balance: Mutex<Option<Decimal>>,
    native_balances: Mutex<HashMap<String, Decimal>>,
    counter: AtomicUsize,
}

impl FakeChain {
    pub fn calls_named(&self, name: &str) -> Vec<ContractCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.function_name() == name)
            .cloned()
            .collect()
    }

    pub fn set_native_balance(&self, address: &str, balance: Decimal) {
        self.native_balances.lock().unwrap().insert(address.to_lowercase(), balance);
    }

    fn next_hash(&self) -> String {
        format!("0x{:064x}", self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl SettlementChain for FakeChain {
    async fn send_call(&self, _private_key: &str, call: &ContractCall) -> Result<String> {
        if *self.fail_calls.lock().unwrap() {
            return Err(AppError::Rpc("connection refused".to_string()));
        }
        self.calls.lock().unwrap().push(call.clone());
        Ok(self.next_hash())
    }

    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>> {
        Ok(Some(Receipt { tx_hash: tx_hash.to_string(), success: true, block_number: Some(1) }))
    }

    async fn native_balance(&self, address: &str) -> Result<Decimal> {
        Ok(
            self.native_balances
                .lock()
                .unwrap()
                .get(&address.to_lowercase())
                .copied()
                .unwrap_or(Decimal::ONE)
        )
    }

    async fn stable_balance(&self, _address: &str) -> Result<Decimal> {
        (*self.stable_balance.lock().unwrap()).ok_or_else(|| AppError::Rpc("balance unavailable".to_string()))
    }

    async fn send_native(&self, _private_key: &str, _to: &str, _amount: Decimal) -> Result<String> {
        Ok(self.next_hash())
    }

    async fn sign_payout(&self, _private_key: &str, to: &str, amount: Decimal, reference: &str) -> Result<String> {
        Ok(format!("sig:{}:{}:{}", to, amount, reference))
    }

    fn validate_address(&self, address: &str) -> bool {
        address.starts_with("0x") && address.len() == 42
    }
}

pub struct FakeCustody;

#[async_trait]
impl KeyCustody for FakeCustody {
    async fn retrieve_private_key(&self, _address: &str) -> Result<String> {
        Ok("0x0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef".to_string())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub admin: Mutex<Vec<AdminNotification>>,
    pub users: Mutex<Vec<(Uuid, UserNotification)>>,
}

impl RecordingNotifier {
    pub fn escalations_for(&self, wallet_tx_id: Uuid) -> Vec<AdminNotification> {
        self.admin
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.escalate && n.wallet_tx_id == Some(wallet_tx_id))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn set_admin_notification(&self, notification: AdminNotification) {
        self.admin.lock().unwrap().push(notification);
    }

    async fn set_user_notification(&self, user_id: Uuid, notification: UserNotification) {
        self.users.lock().unwrap().push((user_id, notification));
    }
}

/// Tables a scenario may make reject writes to simulate a failed commit.
const GUARDED_TABLES: [&str; 5] = ["wallet_tx", "redeem_tx", "credit_wallet_tx", "game_usd_tx", "deposit_tx"];

pub struct Harness {
    pub db: DatabaseConnection,
    pub ctx: Arc<PipelineContext>,
    pub queue: Arc<JobQueue>,
    pub chain: Arc<FakeChain>,
    pub notifier: Arc<RecordingNotifier>,
    pub deposits: Arc<DepositPipeline>,
    pub bets: Arc<BetPipeline>,
    pub claims: Arc<ClaimPipeline>,
    pub redeems: Arc<RedeemPipeline>,
    pub credits: Arc<CreditPipeline>,
    _guard: tokio::sync::MutexGuard<'static, ()>,
}

pub fn settlement_config() -> SettlementConfig {
    SettlementConfig {
        escrow_max_retries: 3,
        mint_max_retries: 3,
        job_attempts: 2,
        job_backoff: Duration::ZERO,
        sweep_retry_backoff: Duration::from_millis(50),
        ..SettlementConfig::default()
    }
}

/// Fresh schema-migrated database, or `None` when `TEST_DATABASE_URL` is unset.
pub async fn setup() -> Option<Harness> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return None;
    };

    let guard = DB_LOCK.lock().await;

    let db = Database::connect(&url).await.expect("connect to test database");
    migration::Migrator::up(&db, None).await.expect("run migrations");
    for table in GUARDED_TABLES {
        db.execute_unprepared(&format!("DROP TRIGGER IF EXISTS reject_update ON {}", table)).await.expect(
            "drop update guard"
        );
    }
    db.execute_unprepared(
        r#"TRUNCATE claim_detail, bet_order, draw_result, game, deposit_tx, redeem_tx,
           credit_wallet_tx, wallet_tx, game_usd_tx, notification, job, custody_key,
           user_wallet, "user" CASCADE"#
    ).await.expect("reset tables");

    let chain = Arc::new(FakeChain::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let settlement = settlement_config();

    let queue = Arc::new(
        JobQueue::new(Arc::new(InMemoryJobStore::new()), JobOptions {
            attempts: settlement.job_attempts,
            backoff: Duration::ZERO,
            delay: Duration::ZERO,
        })
    );
    let adapter = Arc::new(
        SettlementAdapter::new(chain.clone(), Arc::new(FakeCustody), queue.clone(), chain_config())
            .with_receipt_poll(Duration::from_millis(10))
    );
    let ctx = Arc::new(
        PipelineContext::new(db.clone(), adapter, queue.clone(), notifier.clone(), settlement)
    );

    let deposits = Arc::new(DepositPipeline::new(ctx.clone()));
    let bets = Arc::new(BetPipeline::new(ctx.clone()));
    let claims = Arc::new(ClaimPipeline::new(ctx.clone()));
    let redeems = Arc::new(RedeemPipeline::new(ctx.clone()));
    let credits = Arc::new(CreditPipeline::new(ctx.clone()));

    queue.register_handler(SETTLEMENT_QUEUE, pipelines::SUBMIT_BET_JOB, bets.clone()).await;
    queue.register_handler(SETTLEMENT_QUEUE, pipelines::SUBMIT_CLAIM_JOB, claims.clone()).await;
    queue.register_handler(SETTLEMENT_QUEUE, pipelines::PROCESS_REDEEM_JOB, redeems.clone()).await;
    queue.register_handler(SETTLEMENT_QUEUE, pipelines::PROCESS_PAYOUT_JOB, redeems.clone()).await;
    queue.register_handler(SETTLEMENT_QUEUE, pipelines::MINT_CREDIT_JOB, credits.clone()).await;
    queue.register_handler(SETTLEMENT_QUEUE, pipelines::REVOKE_CREDIT_JOB, credits.clone()).await;

    Some(Harness {
        db,
        ctx,
        queue,
        chain,
        notifier,
        deposits,
        bets,
        claims,
        redeems,
        credits,
        _guard: guard,
    })
}

impl Harness {
    /// Run queued jobs until none is due.
    pub async fn drain_jobs(&self) {
        while self.queue.run_once().await.expect("run job") {}
    }

    pub async fn create_user(&self, referrer_id: Option<Uuid>, rank: i32) -> (user::Model, user_wallet::Model) {
        self.ctx.users.create(&random_address(), referrer_id, rank).await.expect("create user")
    }

    pub async fn wallet(&self, id: Uuid) -> user_wallet::Model {
        self.ctx.users.find_wallet(id).await.expect("find wallet")
    }

    /// Give a wallet settled funds: a DEPOSIT for the plain part and a
    /// REFERRAL for the redeemable part, both finalized through the ledger.
    pub async fn fund(&self, wallet: &user_wallet::Model, balance: Decimal, redeemable: Decimal) {
        assert!(redeemable <= balance, "redeemable funds are part of the balance");

        for (tx_type, amount) in [
            (WalletTxType::Deposit, balance - redeemable),
            (WalletTxType::Referral, redeemable),
        ] {
            if amount.is_zero() {
                continue;
            }

            let now = chrono::Utc::now();
            let txn = self.db.begin().await.expect("begin");
            let row = (wallet_tx::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_wallet_id: Set(wallet.id),
                tx_type: Set(tx_type.to_string()),
                amount: Set(amount),
                starting_balance: Set(None),
                ending_balance: Set(None),
                status: Set(TxStatus::Pending.to_string()),
                tx_hash: Set(None),
                game_usd_tx_id: Set(None),
                escalated: Set(false),
                created_at: Set(now),
                updated_at: Set(now),
            }).insert(&txn).await.expect("book funding");
            self.ctx.ledger.finalize_wallet_tx(&txn, row.id, None).await.expect("settle funding");
            txn.commit().await.expect("commit funding");
        }
    }

    /// Open betting round `epoch` for the next ten minutes.
    pub async fn open_game(&self, epoch: i64) {
        let now = chrono::Utc::now();
        (game::ActiveModel {
            epoch: Set(epoch),
            start_at: Set(now - chrono::Duration::minutes(1)),
            end_at: Set(now + chrono::Duration::minutes(10)),
            min_bet_amount: Set(Decimal::ONE),
            max_bet_amount: Set(Decimal::from(100)),
            max_amount_per_number: Set(Decimal::from(1000)),
            drawn_at: Set(None),
        }).insert(&self.db).await.expect("open game");
    }

    /// Make updates to `table` matching `condition` (over `OLD` and `NEW`)
    /// fail, the way a lost connection or constraint error would.
    pub async fn reject_updates(&self, table: &str, condition: &str) {
        self.db.execute_unprepared(
            r#"CREATE OR REPLACE FUNCTION reject_update() RETURNS trigger AS $$
               BEGIN
                   RAISE EXCEPTION 'update of % rejected', TG_TABLE_NAME;
               END;
               $$ LANGUAGE plpgsql"#
        ).await.expect("create update guard function");
        self.db.execute_unprepared(
            &format!(
                "CREATE TRIGGER reject_update BEFORE UPDATE ON {} FOR EACH ROW WHEN ({}) EXECUTE FUNCTION reject_update()",
                table,
                condition
            )
        ).await.expect("create update guard");
    }

    pub async fn allow_updates(&self, table: &str) {
        self.db.execute_unprepared(&format!("DROP TRIGGER IF EXISTS reject_update ON {}", table)).await.expect(
            "drop update guard"
        );
    }
}
