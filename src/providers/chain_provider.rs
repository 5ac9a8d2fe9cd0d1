use async_trait::async_trait;
use sea_orm::prelude::Decimal;
use serde::{ Deserialize, Serialize };

use crate::enums::Forecast;
use crate::error::Result;

/// One `(epoch, number, forecast, amount)` entry of a bet or claim batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastParam {
    pub epoch: i64,
    pub number: String,
    pub forecast: Forecast,
    pub amount: Decimal,
}

/// Contract calls the settlement pipelines submit. Target contracts are
/// resolved by the chain implementation from its configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractCall {
    /// ERC20 `transfer(to, amount)` on the stable token.
    Transfer {
        to: String,
        amount: Decimal,
    },
    /// GameUSD `deposit(user, amount)`.
    Deposit {
        user: String,
        amount: Decimal,
    },
    DepositCredit {
        user: String,
        amount: Decimal,
    },
    RevokeCredit {
        user: String,
        amount: Decimal,
    },
    Bet {
        user: String,
        bets: Vec<ForecastParam>,
    },
    BetWithCredit {
        user: String,
        bets: Vec<ForecastParam>,
    },
    Claim {
        user: String,
        claims: Vec<ForecastParam>,
    },
    /// GameUSD `redeem(amount, to)`, moving the user's tokens into the pool.
    Redeem {
        amount: Decimal,
        to: String,
    },
    /// Pool `payout(amount, to, signature)` releasing stable tokens.
    Payout {
        amount: Decimal,
        to: String,
        signature: String,
    },
}

impl ContractCall {
    pub fn function_name(&self) -> &'static str {
        match self {
            ContractCall::Transfer { .. } => "transfer",
            ContractCall::Deposit { .. } => "deposit",
            ContractCall::DepositCredit { .. } => "depositCredit",
            ContractCall::RevokeCredit { .. } => "revokeCredit",
            ContractCall::Bet { .. } => "bet",
            ContractCall::BetWithCredit { .. } => "betWithCredit",
            ContractCall::Claim { .. } => "claim",
            ContractCall::Redeem { .. } => "redeem",
            ContractCall::Payout { .. } => "payout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: String,
    /// Receipt status 1.
    pub success: bool,
    pub block_number: Option<u64>,
}

/// The external network as the pipelines see it.
#[async_trait]
pub trait SettlementChain: Send + Sync {
    /// Sign and broadcast a contract call, returning its hash.
    async fn send_call(&self, private_key: &str, call: &ContractCall) -> Result<String>;

    /// `None` while the transaction is not mined yet.
    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>>;

    /// Native coin balance in whole units.
    async fn native_balance(&self, address: &str) -> Result<Decimal>;

    /// Stable token balance in whole units.
    async fn stable_balance(&self, address: &str) -> Result<Decimal>;

    /// Plain value transfer of native coin, used for gas top-ups.
    async fn send_native(&self, private_key: &str, to: &str, amount: Decimal) -> Result<String>;

    /// Signature authorising a pool payout of `amount` to `to`.
    async fn sign_payout(
        &self,
        private_key: &str,
        to: &str,
        amount: Decimal,
        reference: &str
    ) -> Result<String>;

    fn validate_address(&self, address: &str) -> bool;
}
