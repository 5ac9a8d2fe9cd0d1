use std::env;
use std::str::FromStr;
use std::time::Duration;

use sea_orm::prelude::Decimal;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub enum NetworkMode {
    Testnet,
    Mainnet,
}

/// Chain endpoints plus the contracts and operator addresses the pipelines sign for.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub rpc_urls: Vec<String>,
    pub chain_id: u64,
    /// External stable asset users deposit and get paid out in.
    pub stable_token: String,
    pub stable_token_decimals: u32,
    /// GameUSD custody contract: `deposit`, `redeem`.
    pub game_usd_contract: String,
    pub betting_contract: String,
    pub credit_contract: String,
    pub pool_contract: String,
    pub escrow_address: String,
    pub deposit_bot_address: String,
    pub pool_address: String,
    pub payout_signer_address: String,
    pub gas_bank_address: String,
    pub receipt_timeout: Duration,
    pub gas_padding_percent: u64,
    pub min_native_gas: Decimal,
    pub gas_reload_amount: Decimal,
}

/// Business limits and cadence of the settlement pipelines.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub min_deposit: Decimal,
    pub escrow_max_retries: i32,
    pub mint_max_retries: i32,
    pub max_credit_per_bet: Decimal,
    pub bet_masking_seconds: i64,
    pub epoch_lookahead: i64,
    pub redeem_auto_approve_below: Decimal,
    pub redeem_cooldown: chrono::Duration,
    pub withdrawal_fee: Decimal,
    pub job_attempts: i32,
    pub job_backoff: Duration,
    pub job_retention: Duration,
    pub job_lease: Duration,
    pub job_heartbeat: Duration,
    pub worker_concurrency: usize,
    pub escrow_sweep_interval: Duration,
    pub mint_sweep_interval: Duration,
    pub sweep_retry_backoff: Duration,
    pub payout_sweep_interval: Duration,
    pub credit_expiry_interval: Duration,
    pub reconcile_interval: Duration,
    pub stuck_threshold: chrono::Duration,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            min_deposit: Decimal::from(10),
            escrow_max_retries: 10,
            mint_max_retries: 5,
            max_credit_per_bet: Decimal::from(1),
            bet_masking_seconds: 60,
            epoch_lookahead: 30,
            redeem_auto_approve_below: Decimal::from(100),
            redeem_cooldown: chrono::Duration::hours(24),
            withdrawal_fee: Decimal::from(1),
            job_attempts: 5,
            job_backoff: Duration::from_secs(5),
            job_retention: Duration::from_secs(600),
            job_lease: Duration::from_secs(300),
            job_heartbeat: Duration::from_secs(30),
            worker_concurrency: 4,
            escrow_sweep_interval: Duration::from_secs(1),
            mint_sweep_interval: Duration::from_secs(1),
            sweep_retry_backoff: Duration::from_secs(5),
            payout_sweep_interval: Duration::from_secs(10),
            credit_expiry_interval: Duration::from_secs(3600),
            reconcile_interval: Duration::from_secs(60),
            stuck_threshold: chrono::Duration::minutes(15),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub network_mode: NetworkMode,
    pub database_url: String,
    pub encryption_key: Vec<u8>,
    pub chain: ChainConfig,
    pub settlement: SettlementConfig,
    pub server_host: String,
    pub server_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenv::dotenv().ok();

        let network_mode = match env::var("NETWORK_MODE")?.to_lowercase().as_str() {
            "mainnet" => NetworkMode::Mainnet,
            "testnet" => NetworkMode::Testnet,
            _ => {
                return Err("NETWORK_MODE must be 'testnet' or 'mainnet'".into());
            }
        };

        let database_url = env::var("DATABASE_URL")?;

        let encryption_key_hex = env::var("ENCRYPTION_KEY")?;
        let encryption_key = hex::decode(&encryption_key_hex)
            .map_err(|_| "ENCRYPTION_KEY must be a valid hex string")?;

        if encryption_key.len() != 32 {
            return Err("ENCRYPTION_KEY must be 32 bytes (64 hex characters)".into());
        }

        let default_chain_id = match network_mode {
            NetworkMode::Testnet => 11155111,
            NetworkMode::Mainnet => 1,
        };

        let chain = ChainConfig {
            rpc_urls: Self::parse_rpc_urls(&env::var("RPC_URLS")?)?,
            chain_id: env_or("CHAIN_ID", default_chain_id)?,
            stable_token: env_address("STABLE_TOKEN_ADDRESS")?,
            stable_token_decimals: env_or("STABLE_TOKEN_DECIMALS", 6)?,
            game_usd_contract: env_address("GAME_USD_CONTRACT")?,
            betting_contract: env_address("BETTING_CONTRACT")?,
            credit_contract: env_address("CREDIT_CONTRACT")?,
            pool_contract: env_address("POOL_CONTRACT")?,
            escrow_address: env_address("ESCROW_ADDRESS")?,
            deposit_bot_address: env_address("DEPOSIT_BOT_ADDRESS")?,
            pool_address: env_address("POOL_ADDRESS")?,
            payout_signer_address: env_address("PAYOUT_SIGNER_ADDRESS")?,
            gas_bank_address: env_address("GAS_BANK_ADDRESS")?,
            receipt_timeout: Duration::from_secs(env_or("RECEIPT_TIMEOUT_SECS", 120)?),
            gas_padding_percent: env_or("GAS_PADDING_PERCENT", 30)?,
            min_native_gas: env_or("MIN_NATIVE_GAS", Decimal::new(5, 3))?,
            gas_reload_amount: env_or("GAS_RELOAD_AMOUNT", Decimal::new(2, 2))?,
        };

        let defaults = SettlementConfig::default();
        let settlement = SettlementConfig {
            min_deposit: env_or("MIN_DEPOSIT", defaults.min_deposit)?,
            escrow_max_retries: env_or("ESCROW_MAX_RETRIES", defaults.escrow_max_retries)?,
            mint_max_retries: env_or("MINT_MAX_RETRIES", defaults.mint_max_retries)?,
            max_credit_per_bet: env_or("MAX_CREDIT_PER_BET", defaults.max_credit_per_bet)?,
            bet_masking_seconds: env_or("BET_MASKING_SECONDS", defaults.bet_masking_seconds)?,
            epoch_lookahead: env_or("EPOCH_LOOKAHEAD", defaults.epoch_lookahead)?,
            redeem_auto_approve_below: env_or(
                "REDEEM_AUTO_APPROVE_BELOW",
                defaults.redeem_auto_approve_below
            )?,
            redeem_cooldown: chrono::Duration::hours(env_or("REDEEM_COOLDOWN_HOURS", 24)?),
            withdrawal_fee: env_or("WITHDRAWAL_FEE", defaults.withdrawal_fee)?,
            job_attempts: env_or("JOB_ATTEMPTS", defaults.job_attempts)?,
            job_backoff: Duration::from_millis(env_or("JOB_BACKOFF_MS", 5_000)?),
            job_retention: Duration::from_secs(env_or("JOB_RETENTION_SECS", 600)?),
            job_lease: Duration::from_secs(env_or("JOB_LEASE_SECS", 300)?),
            job_heartbeat: Duration::from_secs(env_or("JOB_HEARTBEAT_SECS", 30)?),
            sweep_retry_backoff: Duration::from_millis(env_or("SWEEP_RETRY_BACKOFF_MS", 5_000)?),
            worker_concurrency: env_or("WORKER_CONCURRENCY", defaults.worker_concurrency)?,
            stuck_threshold: chrono::Duration::minutes(env_or("STUCK_THRESHOLD_MINUTES", 15)?),
            ..defaults
        };

        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let server_port = env_or("SERVER_PORT", 8080)?;

        Ok(Config {
            network_mode,
            database_url,
            encryption_key,
            chain,
            settlement,
            server_host,
            server_port,
        })
    }

    fn parse_rpc_urls(urls_str: &str) -> Result<Vec<String>, Box<dyn std::error::Error>> {
        let urls: Vec<String> = urls_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if urls.is_empty() {
            return Err("RPC URLs list cannot be empty".into());
        }

        Ok(urls)
    }

    /// Whether we are running in testnet mode.
    pub fn is_testnet(&self) -> bool {
        matches!(self.network_mode, NetworkMode::Testnet)
    }
}

/// Addresses are compared and stored lowercase throughout.
fn env_address(key: &str) -> Result<String, Box<dyn std::error::Error>> {
    let raw = env::var(key).map_err(|_| format!("{} must be set", key))?;
    Ok(raw.trim().to_lowercase())
}

/// Read an optional variable, falling back to `default` when unset.
fn env_or<T>(key: &str, default: T) -> Result<T, Box<dyn std::error::Error>>
    where T: FromStr, <T as FromStr>::Err: std::fmt::Display
{
    match env::var(key) {
        Ok(raw) =>
            raw
                .trim()
                .parse::<T>()
                .map_err(|e| format!("{} has an invalid value '{}': {}", key, raw, e).into()),
        Err(_) => Ok(default),
    }
}
