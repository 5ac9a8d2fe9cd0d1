use async_trait::async_trait;
use serde::{ Deserialize, Serialize };
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ AppError, Result };
use crate::queue::{ Job, JobHandler, JobOptions, JobQueue, GAS_QUEUE };
use crate::services::notification_service::{ AdminNotification, Notifier };
use crate::services::settlement_adapter::SettlementAdapter;

pub const RELOAD_GAS_JOB: &str = "reload_gas";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadGasPayload {
    pub address: String,
    pub chain_id: u64,
}

pub fn reload_job_id(address: &str) -> String {
    format!("reload_gas_{}", address.to_lowercase())
}

/// Ask for a native gas top-up of `address`. Repeated requests collapse into
/// the job already queued for that address.
pub async fn request_reload(queue: &JobQueue, address: &str, chain_id: u64) -> Result<bool> {
    let payload = ReloadGasPayload {
        address: address.to_lowercase(),
        chain_id,
    };

    queue.add_job(
        GAS_QUEUE,
        RELOAD_GAS_JOB,
        &reload_job_id(address),
        &payload,
        Some(JobOptions {
            attempts: 3,
            backoff: Duration::from_secs(10),
            delay: Duration::ZERO,
        })
    ).await
}

/// Tops up custody wallets from the gas bank.
pub struct GasReloadService {
    adapter: Arc<SettlementAdapter>,
    notifier: Arc<dyn Notifier>,
}

impl GasReloadService {
    pub fn new(adapter: Arc<SettlementAdapter>, notifier: Arc<dyn Notifier>) -> Self {
        Self { adapter, notifier }
    }
}

#[async_trait]
impl JobHandler for GasReloadService {
    async fn handle(&self, job: &Job) -> Result<()> {
        let payload: ReloadGasPayload = job.payload()?;
        let config = self.adapter.chain_config();

        if payload.chain_id != config.chain_id {
            return Err(AppError::InvalidInput(format!("Unknown chain {}", payload.chain_id)));
        }

        // Someone else may have topped it up since the request
        let balance = self.adapter.native_balance(&payload.address).await?;
        if balance >= config.min_native_gas {
            tracing::debug!(address = %payload.address, balance = %balance, "Gas already sufficient");
            return Ok(());
        }

        let tx_hash = self.adapter.send_native(
            &config.gas_bank_address,
            &payload.address,
            config.gas_reload_amount
        ).await?;

        tracing::info!(
            address = %payload.address,
            amount = %config.gas_reload_amount,
            tx_hash = %tx_hash,
            "Gas reloaded"
        );

        Ok(())
    }

    async fn on_failure(&self, job: &Job, error: &AppError) -> Result<()> {
        let payload: ReloadGasPayload = job.payload()?;

        self.notifier.set_admin_notification(
            AdminNotification::escalation(
                "gas_reload_failed",
                "Gas reload failed",
                format!("Could not top up {}: {}", payload.address, error),
                None
            )
        ).await;

        Ok(())
    }
}
