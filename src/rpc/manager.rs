use async_trait::async_trait;
use sea_orm::prelude::Decimal;
use std::sync::atomic::{ AtomicUsize, Ordering };
use std::sync::Arc;

use crate::chains::evm::EvmProvider;
use crate::config::ChainConfig;
use crate::error::{ AppError, Result };
use crate::providers::{ ContractCall, Receipt, SettlementChain };

/// Round-robin over the configured RPC endpoints of the settlement chain.
pub struct RpcManager {
    providers: Vec<Arc<EvmProvider>>,
    current_index: AtomicUsize,
}

impl RpcManager {
    pub fn new(config: &ChainConfig) -> Result<Self> {
        let mut providers = Vec::new();

        for url in &config.rpc_urls {
            match EvmProvider::new(url, config) {
                Ok(provider) => providers.push(Arc::new(provider)),
                Err(e) => tracing::warn!("Failed to create provider for {}: {}", url, e),
            }
        }

        if providers.is_empty() {
            return Err(AppError::Config("No valid RPC providers configured".to_string()));
        }

        tracing::info!(chain_id = config.chain_id, "Loaded {} RPC providers", providers.len());

        Ok(Self {
            providers,
            current_index: AtomicUsize::new(0),
        })
    }

    pub fn get_provider(&self) -> Result<Arc<EvmProvider>> {
        if self.providers.is_empty() {
            return Err(AppError::Rpc("No providers available".to_string()));
        }

        // Round-robin to next provider for next request
        let index = self.current_index.fetch_add(1, Ordering::Relaxed) % self.providers.len();
        Ok(self.providers[index].clone())
    }

    /// Skip the next endpoint in line after one failed us.
    pub fn rotate_provider(&self) {
        let index = self.current_index.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        tracing::info!("Rotated RPC provider to index {}", index % self.providers.len().max(1));
    }

    fn observe<T>(&self, provider: &EvmProvider, result: Result<T>) -> Result<T> {
        if let Err(AppError::Rpc(message)) = &result {
            tracing::warn!(url = provider.url(), error = %message, "RPC endpoint failed");
            self.rotate_provider();
        }
        result
    }
}

#[async_trait]
impl SettlementChain for RpcManager {
    async fn send_call(&self, private_key: &str, call: &ContractCall) -> Result<String> {
        let provider = self.get_provider()?;
        let result = provider.send_call(private_key, call).await;
        self.observe(&provider, result)
    }

    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>> {
        let provider = self.get_provider()?;
        let result = provider.get_receipt(tx_hash).await;
        self.observe(&provider, result)
    }

    async fn native_balance(&self, address: &str) -> Result<Decimal> {
        let provider = self.get_provider()?;
        let result = provider.native_balance(address).await;
        self.observe(&provider, result)
    }

    async fn stable_balance(&self, address: &str) -> Result<Decimal> {
        let provider = self.get_provider()?;
        let result = provider.stable_balance(address).await;
        self.observe(&provider, result)
    }

    async fn send_native(&self, private_key: &str, to: &str, amount: Decimal) -> Result<String> {
        let provider = self.get_provider()?;
        let result = provider.send_native(private_key, to, amount).await;
        self.observe(&provider, result)
    }

    async fn sign_payout(
        &self,
        private_key: &str,
        to: &str,
        amount: Decimal,
        reference: &str
    ) -> Result<String> {
        let provider = self.get_provider()?;
        provider.sign_payout(private_key, to, amount, reference).await
    }

    fn validate_address(&self, address: &str) -> bool {
        crate::chains::evm::wallet::validate_address(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn chain_config(urls: &[&str]) -> ChainConfig {
        ChainConfig {
            rpc_urls: urls.iter().map(|u| u.to_string()).collect(),
            chain_id: 31337,
            stable_token: "0x0000000000000000000000000000000000000001".to_string(),
            stable_token_decimals: 6,
            game_usd_contract: "0x0000000000000000000000000000000000000002".to_string(),
            betting_contract: "0x0000000000000000000000000000000000000003".to_string(),
            credit_contract: "0x0000000000000000000000000000000000000004".to_string(),
            pool_contract: "0x0000000000000000000000000000000000000005".to_string(),
            escrow_address: "0x0000000000000000000000000000000000000006".to_string(),
            deposit_bot_address: "0x0000000000000000000000000000000000000007".to_string(),
            pool_address: "0x0000000000000000000000000000000000000008".to_string(),
            payout_signer_address: "0x0000000000000000000000000000000000000009".to_string(),
            gas_bank_address: "0x000000000000000000000000000000000000000a".to_string(),
            receipt_timeout: Duration::from_secs(5),
            gas_padding_percent: 30,
            min_native_gas: Decimal::new(5, 3),
            gas_reload_amount: Decimal::new(2, 2),
        }
    }

    #[test]
    fn test_round_robin_and_rotation() {
        let manager = RpcManager::new(
            &chain_config(&["http://127.0.0.1:8545", "http://127.0.0.1:8546"])
        ).unwrap();

        let first = manager.get_provider().unwrap();
        let second = manager.get_provider().unwrap();
        let third = manager.get_provider().unwrap();
        assert_eq!(first.url(), "http://127.0.0.1:8545");
        assert_eq!(second.url(), "http://127.0.0.1:8546");
        assert_eq!(third.url(), first.url());

        manager.rotate_provider();
        assert_eq!(manager.get_provider().unwrap().url(), "http://127.0.0.1:8545");
    }

    #[test]
    fn test_rejects_empty_provider_list() {
        assert!(RpcManager::new(&chain_config(&["not a url"])).is_err());
    }
}
