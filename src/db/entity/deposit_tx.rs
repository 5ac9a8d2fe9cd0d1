use sea_orm::entity::prelude::*;
use serde::{ Deserialize, Serialize };

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "deposit_tx")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub wallet_tx_id: Uuid,
    pub chain_id: i64,
    pub sender_address: String,
    pub receiver_address: String, // user custody address the funds arrived at
    pub amount: Decimal,
    #[sea_orm(unique)]
    pub tx_hash: String,
    pub escrow_tx_hash: Option<String>,
    pub status: String,
    pub retry_count: i32,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::wallet_tx::Entity",
        from = "Column::WalletTxId",
        to = "super::wallet_tx::Column::Id"
    )]
    WalletTx,
}

impl Related<super::wallet_tx::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WalletTx.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
