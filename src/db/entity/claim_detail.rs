use sea_orm::entity::prelude::*;
use serde::{ Deserialize, Serialize };

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "claim_detail")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub wallet_tx_id: Uuid,
    pub bet_order_id: Uuid,
    pub draw_result_id: Uuid,
    pub prize_category: String,
    pub claim_amount: Decimal,
    pub point_amount: Decimal,
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
}

impl Related<super::wallet_tx::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WalletTx.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
