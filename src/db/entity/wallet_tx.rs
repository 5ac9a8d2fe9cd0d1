use sea_orm::entity::prelude::*;
use serde::{ Deserialize, Serialize };

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "wallet_tx")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_wallet_id: Uuid,
    pub tx_type: String,
    pub amount: Decimal,
    // Fixed only once the row reaches success
    pub starting_balance: Option<Decimal>,
    pub ending_balance: Option<Decimal>,
    pub status: String,
    pub tx_hash: Option<String>,
    pub game_usd_tx_id: Option<Uuid>,
    pub escalated: bool,
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
    #[sea_orm(
        belongs_to = "super::game_usd_tx::Entity",
        from = "Column::GameUsdTxId",
        to = "super::game_usd_tx::Column::Id"
    )]
    GameUsdTx,
    #[sea_orm(has_one = "super::deposit_tx::Entity")]
    DepositTx,
    #[sea_orm(has_one = "super::redeem_tx::Entity")]
    RedeemTx,
    #[sea_orm(has_many = "super::bet_order::Entity")]
    BetOrder,
    #[sea_orm(has_many = "super::claim_detail::Entity")]
    ClaimDetail,
}

impl Related<super::user_wallet::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserWallet.def()
    }
}

impl Related<super::game_usd_tx::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::GameUsdTx.def()
    }
}

impl Related<super::deposit_tx::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DepositTx.def()
    }
}

impl Related<super::redeem_tx::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RedeemTx.def()
    }
}

impl Related<super::bet_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BetOrder.def()
    }
}

impl Related<super::claim_detail::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ClaimDetail.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
