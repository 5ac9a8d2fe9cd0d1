use sea_orm::entity::prelude::*;
use serde::{ Deserialize, Serialize };

/// One betting round (epoch).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "game")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub epoch: i64,
    pub start_at: DateTimeUtc,
    pub end_at: DateTimeUtc,
    pub min_bet_amount: Decimal,
    pub max_bet_amount: Decimal,
    pub max_amount_per_number: Decimal,
    pub drawn_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::draw_result::Entity")]
    DrawResult,
}

impl Related<super::draw_result::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DrawResult.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
