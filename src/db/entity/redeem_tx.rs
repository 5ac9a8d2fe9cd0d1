use sea_orm::entity::prelude::*;
use serde::{ Deserialize, Serialize };

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "redeem_tx")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub wallet_tx_id: Uuid,
    pub destination_address: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub chain_id: i64,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTimeUtc>,
    pub review_note: Option<String>,
    pub payout_can_proceed: Option<bool>,
    pub redeem_tx_hash: Option<String>,
    pub payout_signature: Option<String>,
    pub payout_tx_hash: Option<String>,
    pub payout_status: Option<String>,
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
