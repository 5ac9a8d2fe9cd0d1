use async_trait::async_trait;
use ethers::{
    abi::Token,
    prelude::*,
    providers::{ Http, Provider },
    types::{ TransactionRequest as EthTxRequest, U256 },
};
use sea_orm::prelude::Decimal;
use std::sync::Arc;

use crate::chains::evm::contracts::{ self, ContractKind, GAME_TOKEN_DECIMALS };
use crate::chains::evm::wallet;
use crate::config::ChainConfig;
use crate::error::{ AppError, Result };
use crate::providers::{ ContractCall, Receipt, SettlementChain };

const NATIVE_DECIMALS: u32 = 18;

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// One JSON-RPC endpoint of the settlement chain.
#[derive(Clone)]
pub struct EvmProvider {
    provider: Provider<Http>,
    config: ChainConfig,
    url: String,
}

impl EvmProvider {
    pub fn new(rpc_url: &str, config: &ChainConfig) -> Result<Self> {
        let provider = Provider::<Http>
            ::try_from(rpc_url)
            .map_err(|e| AppError::Rpc(format!("Failed to create provider: {}", e)))?;

        Ok(Self {
            provider,
            config: config.clone(),
            url: rpc_url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn signer_client(&self, private_key: &str) -> Result<Arc<SignerClient>> {
        let signer = wallet::signer_from_private_key(private_key)?;

        Ok(
            Arc::new(
                SignerMiddleware::new(
                    self.provider.clone(),
                    signer.with_chain_id(self.config.chain_id)
                )
            )
        )
    }

    /// Resolve the target contract and encoded arguments of a call.
    fn encode_call(&self, call: &ContractCall) -> Result<(ContractKind, String, Vec<Token>)> {
        let stable = self.config.stable_token_decimals;

        let encoded = match call {
            ContractCall::Transfer { to, amount } =>
                (
                    ContractKind::Erc20,
                    self.config.stable_token.clone(),
                    vec![contracts::address_token(to)?, Token::Uint(contracts::to_units(*amount, stable)?)],
                ),
            ContractCall::Deposit { user, amount } =>
                (
                    ContractKind::GameUsd,
                    self.config.game_usd_contract.clone(),
                    vec![
                        contracts::address_token(user)?,
                        Token::Uint(contracts::to_units(*amount, GAME_TOKEN_DECIMALS)?)
                    ],
                ),
            ContractCall::DepositCredit { user, amount } | ContractCall::RevokeCredit { user, amount } =>
                (
                    ContractKind::Credit,
                    self.config.credit_contract.clone(),
                    vec![
                        contracts::address_token(user)?,
                        Token::Uint(contracts::to_units(*amount, GAME_TOKEN_DECIMALS)?)
                    ],
                ),
            | ContractCall::Bet { user, bets }
            | ContractCall::BetWithCredit { user, bets }
            | ContractCall::Claim { user, claims: bets } =>
                (
                    ContractKind::Betting,
                    self.config.betting_contract.clone(),
                    vec![contracts::address_token(user)?, contracts::forecast_tokens(bets)?],
                ),
            ContractCall::Redeem { amount, to } =>
                (
                    ContractKind::GameUsd,
                    self.config.game_usd_contract.clone(),
                    vec![
                        Token::Uint(contracts::to_units(*amount, GAME_TOKEN_DECIMALS)?),
                        contracts::address_token(to)?
                    ],
                ),
            ContractCall::Payout { amount, to, signature } => {
                let signature = ethers::utils::hex
                    ::decode(signature.trim_start_matches("0x"))
                    .map_err(|_| AppError::InvalidInput("Invalid payout signature".to_string()))?;

                (
                    ContractKind::Pool,
                    self.config.pool_contract.clone(),
                    vec![
                        Token::Uint(contracts::to_units(*amount, stable)?),
                        contracts::address_token(to)?,
                        Token::Bytes(signature)
                    ],
                )
            }
        };

        Ok(encoded)
    }

    fn pad_gas(&self, estimate: U256) -> U256 {
        (estimate * U256::from(100 + self.config.gas_padding_percent)) / U256::from(100)
    }
}

#[async_trait]
impl SettlementChain for EvmProvider {
    async fn send_call(&self, private_key: &str, call: &ContractCall) -> Result<String> {
        let client = self.signer_client(private_key)?;
        let (kind, address, args) = self.encode_call(call)?;
        let contract = contracts::contract(kind, &address, client)?;

        let mut method = contract
            .method::<_, ()>(call.function_name(), &args[..])
            .map_err(|e| AppError::Chain(format!("Failed to prepare {}: {}", call.function_name(), e)))?;

        // Step 1: Estimate and pad gas against fee movement between estimate and inclusion
        let estimate = method
            .estimate_gas().await
            .map_err(|e| AppError::Chain(format!("Gas estimation failed: {}", e)))?;
        method.tx.set_gas(self.pad_gas(estimate));

        // Step 2: Broadcast
        let pending_tx = method
            .send().await
            .map_err(|e| AppError::Chain(format!("Transaction failed: {}", e)))?;

        Ok(format!("{:?}", pending_tx.tx_hash()))
    }

    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>> {
        let hash: TxHash = tx_hash
            .parse()
            .map_err(|_| AppError::InvalidInput(format!("Invalid tx hash: {}", tx_hash)))?;

        let receipt = self.provider
            .get_transaction_receipt(hash).await
            .map_err(|e| AppError::Rpc(format!("Failed to get receipt: {}", e)))?;

        Ok(
            receipt.map(|r| Receipt {
                tx_hash: tx_hash.to_string(),
                success: r.status == Some(U64::from(1)),
                block_number: r.block_number.map(|b| b.as_u64()),
            })
        )
    }

    async fn native_balance(&self, address: &str) -> Result<Decimal> {
        let addr: Address = address.parse().map_err(|_| AppError::InvalidAddress)?;

        let balance = self.provider
            .get_balance(addr, None).await
            .map_err(|e| AppError::Rpc(format!("Failed to get balance: {}", e)))?;

        contracts::from_units(balance, NATIVE_DECIMALS)
    }

    async fn stable_balance(&self, address: &str) -> Result<Decimal> {
        let holder: Address = address.parse().map_err(|_| AppError::InvalidAddress)?;
        let contract = contracts::contract(
            ContractKind::Erc20,
            &self.config.stable_token,
            Arc::new(self.provider.clone())
        )?;

        let balance: U256 = contract
            .method::<_, U256>("balanceOf", holder)
            .map_err(|e| AppError::Chain(format!("Failed to call balanceOf: {}", e)))?
            .call().await
            .map_err(|e| AppError::Rpc(format!("balanceOf call failed: {}", e)))?;

        contracts::from_units(balance, self.config.stable_token_decimals)
    }

    async fn send_native(&self, private_key: &str, to: &str, amount: Decimal) -> Result<String> {
        let client = self.signer_client(private_key)?;
        let to: Address = to.parse().map_err(|_| AppError::InvalidAddress)?;
        let value = contracts::to_units(amount, NATIVE_DECIMALS)?;

        let tx = EthTxRequest::new().to(to).value(value);

        let pending_tx = client
            .send_transaction(tx, None).await
            .map_err(|e| AppError::Chain(format!("Transaction failed: {}", e)))?;

        Ok(format!("{:?}", pending_tx.tx_hash()))
    }

    async fn sign_payout(
        &self,
        private_key: &str,
        to: &str,
        amount: Decimal,
        reference: &str
    ) -> Result<String> {
        let to: Address = to.parse().map_err(|_| AppError::InvalidAddress)?;
        let units = contracts::to_units(amount, self.config.stable_token_decimals)?;

        wallet::sign_payout(private_key, to, units, reference).await
    }

    fn validate_address(&self, address: &str) -> bool {
        wallet::validate_address(address)
    }
}
