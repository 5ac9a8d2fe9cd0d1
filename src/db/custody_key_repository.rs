use async_trait::async_trait;
use sea_orm::{ entity::prelude::*, sea_query::OnConflict, DatabaseConnection, Set };
use std::sync::Arc;

use crate::chains::evm::wallet;
use crate::crypto::Encryptor;
use crate::db::entity::custody_key;
use crate::error::{ AppError, Result };
use crate::providers::KeyCustody;

/// Encrypted private keys of custody and operator wallets.
pub struct CustodyKeyRepository {
    db: DatabaseConnection,
    encryptor: Arc<Encryptor>,
}

impl CustodyKeyRepository {
    pub fn new(db: DatabaseConnection, encryptor: Arc<Encryptor>) -> Self {
        Self { db, encryptor }
    }

    /// Store (or replace) the key for the address it derives to.
    pub async fn register_key(&self, private_key: &str) -> Result<String> {
        let address = wallet::address_from_private_key(private_key)?.to_lowercase();
        let sealed = self.encryptor.seal_private_key(private_key)?;

        let model = custody_key::ActiveModel {
            address: Set(address.clone()),
            encrypted_private_key: Set(sealed),
            created_at: Set(chrono::Utc::now()),
        };

        custody_key::Entity
            ::insert(model)
            .on_conflict(
                OnConflict::column(custody_key::Column::Address)
                    .update_column(custody_key::Column::EncryptedPrivateKey)
                    .to_owned()
            )
            .exec_without_returning(&self.db).await?;

        tracing::info!(address = %address, "Custody key registered");
        Ok(address)
    }

    /// Generate a fresh custody wallet and keep its key.
    pub async fn provision_wallet(&self) -> Result<String> {
        let generated = wallet::generate_wallet();
        self.register_key(&generated.private_key).await
    }
}

#[async_trait]
impl KeyCustody for CustodyKeyRepository {
    async fn retrieve_private_key(&self, address: &str) -> Result<String> {
        let record = custody_key::Entity
            ::find_by_id(address.to_lowercase())
            .one(&self.db).await?
            .ok_or_else(|| AppError::Custody(format!("No custody key for {}", address)))?;

        self.encryptor.open_private_key(&record.encrypted_private_key)
    }
}
