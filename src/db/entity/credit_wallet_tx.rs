use sea_orm::entity::prelude::*;
use serde::{ Deserialize, Serialize };

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "credit_wallet_tx")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_wallet_id: Uuid,
    pub tx_type: String, // "CREDIT", "PLAY", "EXPIRY"
    pub amount: Decimal,
    pub starting_balance: Option<Decimal>,
    pub ending_balance: Option<Decimal>,
    pub status: String,
    pub campaign: Option<String>,
    pub expiration_date: Option<DateTimeUtc>,
    pub wallet_tx_id: Option<Uuid>,
    pub tx_hash: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user_wallet::Entity",
        from = "Column::UserWalletId",
        to = "super::user_wallet::Column::Id"
    )]
    UserWallet,
}

impl Related<super::user_wallet::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserWallet.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
