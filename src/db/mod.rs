use sea_orm::{ entity::prelude::*, DatabaseConnection, Set, TransactionTrait };
use uuid::Uuid;

use crate::error::{ AppError, Result };

pub mod entity;
pub use entity::*;

mod custody_key_repository;
pub use custody_key_repository::CustodyKeyRepository;

mod job_repository;
pub use job_repository::SeaOrmJobStore;

/// Players and their materialized wallets.
pub struct UserRepository {
    db: DatabaseConnection,
}

impl UserRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Create a user with an empty wallet bound to its custody address.
    pub async fn create(
        &self,
        custody_address: &str,
        referrer_id: Option<Uuid>,
        referral_rank: i32
    ) -> Result<(entity::user::Model, entity::user_wallet::Model)> {
        let now = chrono::Utc::now();
        let txn = self.db.begin().await?;

        let user = (entity::user::ActiveModel {
            id: Set(Uuid::new_v4()),
            custody_address: Set(custody_address.to_lowercase()),
            referrer_id: Set(referrer_id),
            referral_rank: Set(referral_rank),
            created_at: Set(now),
        }).insert(&txn).await?;

        let wallet = (entity::user_wallet::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user.id),
            wallet_address: Set(custody_address.to_lowercase()),
            wallet_balance: Set(Decimal::ZERO),
            credit_balance: Set(Decimal::ZERO),
            redeemable_balance: Set(Decimal::ZERO),
            point_balance: Set(Decimal::ZERO),
            updated_at: Set(now),
        }).insert(&txn).await?;

        txn.commit().await?;
        Ok((user, wallet))
    }

    pub async fn find_user(&self, id: Uuid) -> Result<entity::user::Model> {
        entity::user::Entity
            ::find_by_id(id)
            .one(&self.db).await?
            .ok_or_else(|| AppError::NotFound(format!("user {}", id)))
    }

    pub async fn find_wallet(&self, id: Uuid) -> Result<entity::user_wallet::Model> {
        entity::user_wallet::Entity
            ::find_by_id(id)
            .one(&self.db).await?
            .ok_or_else(|| AppError::NotFound(format!("wallet {}", id)))
    }

    pub async fn find_wallet_by_user(&self, user_id: Uuid) -> Result<entity::user_wallet::Model> {
        entity::user_wallet::Entity
            ::find()
            .filter(entity::user_wallet::Column::UserId.eq(user_id))
            .one(&self.db).await?
            .ok_or_else(|| AppError::NotFound(format!("wallet of user {}", user_id)))
    }

    pub async fn find_wallet_by_address(
        &self,
        address: &str
    ) -> Result<Option<entity::user_wallet::Model>> {
        let wallet = entity::user_wallet::Entity
            ::find()
            .filter(entity::user_wallet::Column::WalletAddress.eq(address.to_lowercase()))
            .one(&self.db).await?;

        Ok(wallet)
    }
}
