use sea_orm::entity::prelude::*;
use serde::{ Deserialize, Serialize };

/// On-chain GameUSD leg backing one or more wallet ledger rows.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "game_usd_tx")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub amount: Decimal,
    pub chain_id: i64,
    pub sender_address: String,
    pub receiver_address: String,
    pub status: String,
    pub tx_hash: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::wallet_tx::Entity")]
    WalletTx,
}

impl Related<super::wallet_tx::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WalletTx.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
