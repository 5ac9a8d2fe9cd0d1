use sea_orm::prelude::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::ChainConfig;
use crate::error::{ AppError, Result };
use crate::providers::{ ContractCall, KeyCustody, Receipt, SettlementChain };
use crate::queue::JobQueue;
use crate::services::gas_reload_service;

const DEFAULT_RECEIPT_POLL: Duration = Duration::from_secs(2);

/// Submits contract calls for the pipelines and waits for their receipts.
///
/// Holds no settlement state. Signers are rebuilt from custody for every call,
/// and each signer address has one submission in flight at a time so two
/// sweeps never race for the same nonce.
pub struct SettlementAdapter {
    chain: Arc<dyn SettlementChain>,
    custody: Arc<dyn KeyCustody>,
    queue: Arc<JobQueue>,
    config: ChainConfig,
    address_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    receipt_poll: Duration,
}

impl SettlementAdapter {
    pub fn new(
        chain: Arc<dyn SettlementChain>,
        custody: Arc<dyn KeyCustody>,
        queue: Arc<JobQueue>,
        config: ChainConfig
    ) -> Self {
        Self {
            chain,
            custody,
            queue,
            config,
            address_locks: Mutex::new(HashMap::new()),
            receipt_poll: DEFAULT_RECEIPT_POLL,
        }
    }

    pub fn with_receipt_poll(mut self, receipt_poll: Duration) -> Self {
        self.receipt_poll = receipt_poll;
        self
    }

    pub fn chain_config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn validate_address(&self, address: &str) -> bool {
        self.chain.validate_address(address)
    }

    async fn address_lock(&self, address: &str) -> Arc<Mutex<()>> {
        let mut locks = self.address_locks.lock().await;
        locks.entry(address.to_lowercase()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Sign and broadcast `call` from `signer_address`.
    pub async fn submit(&self, signer_address: &str, call: &ContractCall) -> Result<String> {
        let lock = self.address_lock(signer_address).await;
        let _guard = lock.lock().await;

        let private_key = self.custody.retrieve_private_key(signer_address).await?;
        let tx_hash = self.chain.send_call(&private_key, call).await?;

        tracing::info!(
            signer = %signer_address,
            function = call.function_name(),
            tx_hash = %tx_hash,
            "Contract call submitted"
        );

        Ok(tx_hash)
    }

    /// Poll for the receipt until it appears or the receipt timeout passes.
    pub async fn await_receipt(&self, tx_hash: &str) -> Result<Receipt> {
        let poll = async {
            loop {
                match self.chain.get_receipt(tx_hash).await {
                    Ok(Some(receipt)) => {
                        return receipt;
                    }
                    Ok(None) => {}
                    Err(e) => tracing::debug!(tx_hash, error = %e, "Receipt poll failed"),
                }
                tokio::time::sleep(self.receipt_poll).await;
            }
        };

        tokio::time
            ::timeout(self.config.receipt_timeout, poll).await
            .map_err(|_| AppError::ReceiptTimeout(tx_hash.to_string()))
    }

    /// Submit, wait, and turn a reverted receipt into `OnChainFailure`.
    pub async fn submit_and_confirm(&self, signer_address: &str, call: &ContractCall) -> Result<String> {
        let tx_hash = self.submit(signer_address, call).await?;
        let receipt = self.await_receipt(&tx_hash).await?;

        if !receipt.success {
            tracing::warn!(
                tx_hash = %tx_hash,
                function = call.function_name(),
                "Transaction reverted on chain"
            );
            return Err(AppError::OnChainFailure { tx_hash });
        }

        Ok(tx_hash)
    }

    /// Check the signer can pay for gas; if not, request a top-up and defer.
    pub async fn ensure_gas(&self, address: &str) -> Result<()> {
        let balance = self.chain.native_balance(address).await?;
        if balance >= self.config.min_native_gas {
            return Ok(());
        }

        tracing::warn!(address, balance = %balance, "Native gas below minimum, requesting reload");
        gas_reload_service::request_reload(&self.queue, address, self.config.chain_id).await?;

        Err(AppError::InsufficientGas(address.to_string()))
    }

    /// Send native coin from `signer_address`, confirmed like any other call.
    pub async fn send_native(&self, signer_address: &str, to: &str, amount: Decimal) -> Result<String> {
        let tx_hash = {
            let lock = self.address_lock(signer_address).await;
            let _guard = lock.lock().await;

            let private_key = self.custody.retrieve_private_key(signer_address).await?;
            self.chain.send_native(&private_key, to, amount).await?
        };

        let receipt = self.await_receipt(&tx_hash).await?;
        if !receipt.success {
            return Err(AppError::OnChainFailure { tx_hash });
        }

        Ok(tx_hash)
    }

    pub async fn native_balance(&self, address: &str) -> Result<Decimal> {
        self.chain.native_balance(address).await
    }

    pub async fn stable_balance(&self, address: &str) -> Result<Decimal> {
        self.chain.stable_balance(address).await
    }

    /// Payout authorisation from the configured payout signer.
    pub async fn sign_payout(&self, to: &str, amount: Decimal, reference: &str) -> Result<String> {
        let private_key = self.custody.retrieve_private_key(&self.config.payout_signer_address).await?;
        self.chain.sign_payout(&private_key, to, amount, reference).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::{ chain_config, FakeChain, FakeCustody };
    use crate::queue::{ InMemoryJobStore, JobOptions };
    use rust_decimal_macros::dec;

    fn adapter(chain: Arc<FakeChain>) -> (SettlementAdapter, Arc<JobQueue>) {
        let queue = Arc::new(
            JobQueue::new(Arc::new(InMemoryJobStore::new()), JobOptions {
                attempts: 3,
                backoff: Duration::ZERO,
                delay: Duration::ZERO,
            })
        );
        let adapter = SettlementAdapter::new(
            chain,
            Arc::new(FakeCustody),
            queue.clone(),
            chain_config()
        ).with_receipt_poll(Duration::from_millis(10));
        (adapter, queue)
    }

    fn deposit_call() -> ContractCall {
        ContractCall::Deposit {
            user: "0x00000000000000000000000000000000000000c1".to_string(),
            amount: dec!(50),
        }
    }

    #[tokio::test]
    async fn test_submit_and_confirm_returns_hash() {
        let chain = Arc::new(FakeChain::default());
        let (adapter, _) = adapter(chain.clone());

        let tx_hash = adapter.submit_and_confirm("0x00000000000000000000000000000000000000b2", &deposit_call()).await.unwrap();

        assert!(tx_hash.starts_with("0x"));
        assert_eq!(chain.calls.lock().unwrap().as_slice(), &[deposit_call()]);
    }

    #[tokio::test]
    async fn test_reverted_receipt_keeps_hash() {
        let chain = Arc::new(FakeChain::default());
        *chain.revert.lock().unwrap() = true;
        let (adapter, _) = adapter(chain);

        let err = adapter.submit_and_confirm("0x00000000000000000000000000000000000000b2", &deposit_call()).await.unwrap_err();

        let AppError::OnChainFailure { tx_hash } = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(err.failed_hash(), Some(tx_hash.as_str()));
    }

    #[tokio::test]
    async fn test_unmined_transaction_times_out() {
        let chain = Arc::new(FakeChain::default());
        *chain.never_mined.lock().unwrap() = true;
        let (adapter, _) = adapter(chain);

        let err = adapter.submit_and_confirm("0x00000000000000000000000000000000000000b2", &deposit_call()).await.unwrap_err();

        assert!(matches!(err, AppError::ReceiptTimeout(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_low_gas_requests_single_reload() {
        let chain = Arc::new(FakeChain::default());
        let user = "0x00000000000000000000000000000000000000C1";
        chain.set_native_balance(user, dec!(0.001));
        let (adapter, queue) = adapter(chain);

        for _ in 0..2 {
            let err = adapter.ensure_gas(user).await.unwrap_err();
            assert!(matches!(err, AppError::InsufficientGas(_)));
        }

        let job = queue.get_job(&gas_reload_service::reload_job_id(user)).await.unwrap().unwrap();
        assert_eq!(job.job_type, gas_reload_service::RELOAD_GAS_JOB);
        assert_eq!(job.payload::<gas_reload_service::ReloadGasPayload>().unwrap().address, user.to_lowercase());
    }

    #[tokio::test]
    async fn test_funded_signer_needs_no_reload() {
        let chain = Arc::new(FakeChain::default());
        let (adapter, queue) = adapter(chain);
        let user = "0x00000000000000000000000000000000000000c2";

        adapter.ensure_gas(user).await.unwrap();
        assert!(!queue.job_exists(&gas_reload_service::reload_job_id(user)).await.unwrap());
    }

    #[tokio::test]
    async fn test_one_submission_per_signer_at_a_time() {
        let chain = Arc::new(FakeChain::default());
        *chain.send_delay.lock().unwrap() = Some(Duration::from_millis(20));
        let (adapter, _) = adapter(chain.clone());
        let adapter = Arc::new(adapter);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let adapter = adapter.clone();
                tokio::spawn(async move {
                    adapter.submit("0x00000000000000000000000000000000000000B2", &deposit_call()).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(chain.max_in_flight.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(chain.calls.lock().unwrap().len(), 4);
    }
}
