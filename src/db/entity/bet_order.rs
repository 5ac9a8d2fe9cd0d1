use sea_orm::entity::prelude::*;
use serde::{ Deserialize, Serialize };

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bet_order")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub wallet_tx_id: Uuid,
    pub credit_wallet_tx_id: Option<Uuid>,
    pub user_wallet_id: Uuid,
    pub epoch: i64,
    pub number_pair: String,
    pub big_forecast_amount: Decimal,
    pub small_forecast_amount: Decimal,
    pub credit_amount: Decimal, // portion of the stake funded by promotional credit
    pub claim_wallet_tx_id: Option<Uuid>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::wallet_tx::Entity",
        from = "Column::WalletTxId",
        to = "super::wallet_tx::Column::Id"
    )]
    WalletTx,
    #[sea_orm(
        belongs_to = "super::game::Entity",
        from = "Column::Epoch",
        to = "super::game::Column::Epoch"
    )]
    Game,
}

impl Related<super::wallet_tx::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WalletTx.def()
    }
}

impl Related<super::game::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Game.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
