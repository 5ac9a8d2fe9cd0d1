use async_trait::async_trait;
use sea_orm::prelude::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{ AtomicUsize, Ordering };
use std::sync::Mutex;
use std::time::Duration;

use crate::config::ChainConfig;
use crate::error::{ AppError, Result };
use crate::providers::{ ContractCall, KeyCustody, Receipt, SettlementChain };

pub fn chain_config() -> ChainConfig {
    ChainConfig {
        rpc_urls: vec!["http://localhost:8545".to_string()],
        chain_id: 31337,
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
        receipt_timeout: Duration::from_millis(200),
        gas_padding_percent: 20,
        min_native_gas: Decimal::new(1, 2),
        gas_reload_amount: Decimal::new(5, 2),
    }
}

/// Scriptable chain: every call succeeds unless told otherwise.
#[derive(Default)]
pub struct FakeChain {
    pub calls: Mutex<Vec<ContractCall>>,
    pub native_sends: Mutex<Vec<(String, Decimal)>>,
    pub native_balances: Mutex<HashMap<String, Decimal>>,
    pub stable_balance: Mutex<Option<Decimal>>,
    pub revert: Mutex<bool>,
    pub never_mined: Mutex<bool>,
    pub send_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    counter: AtomicUsize,
}

impl FakeChain {
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
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.send_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.calls.lock().unwrap().push(call.clone());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(self.next_hash())
    }

    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>> {
        if *self.never_mined.lock().unwrap() {
            return Ok(None);
        }

        Ok(
            Some(Receipt {
                tx_hash: tx_hash.to_string(),
                success: !*self.revert.lock().unwrap(),
                block_number: Some(1),
            })
        )
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

    async fn send_native(&self, _private_key: &str, to: &str, amount: Decimal) -> Result<String> {
        self.native_sends.lock().unwrap().push((to.to_lowercase(), amount));
        Ok(self.next_hash())
    }

    async fn sign_payout(
        &self,
        _private_key: &str,
        to: &str,
        amount: Decimal,
        reference: &str
    ) -> Result<String> {
        Ok(format!("sig:{}:{}:{}", to, amount, reference))
    }

    fn validate_address(&self, address: &str) -> bool {
        address.starts_with("0x") && address.len() == 42
    }
}

/// Hands out a fixed key for every address it knows.
pub struct FakeCustody;

#[async_trait]
impl KeyCustody for FakeCustody {
    async fn retrieve_private_key(&self, address: &str) -> Result<String> {
        if address.is_empty() {
            return Err(AppError::Custody("no key for empty address".to_string()));
        }
        Ok("0x0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef".to_string())
    }
}

/// Keeps every notification in memory.
#[derive(Default)]
pub struct RecordingNotifier {
    pub admin: Mutex<Vec<crate::services::AdminNotification>>,
    pub users: Mutex<Vec<(uuid::Uuid, crate::services::UserNotification)>>,
}

#[async_trait]
impl crate::services::Notifier for RecordingNotifier {
    async fn set_admin_notification(&self, notification: crate::services::AdminNotification) {
        self.admin.lock().unwrap().push(notification);
    }

    async fn set_user_notification(&self, user_id: uuid::Uuid, notification: crate::services::UserNotification) {
        self.users.lock().unwrap().push((user_id, notification));
    }
}
