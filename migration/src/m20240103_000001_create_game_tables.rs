use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.create_table(
            Table::create()
                .table(Game::Table)
                .if_not_exists()
                .col(ColumnDef::new(Game::Epoch).big_integer().not_null().primary_key())
                .col(ColumnDef::new(Game::StartAt).timestamp_with_time_zone().not_null())
                .col(ColumnDef::new(Game::EndAt).timestamp_with_time_zone().not_null())
                .col(ColumnDef::new(Game::MinBetAmount).decimal().not_null())
                .col(ColumnDef::new(Game::MaxBetAmount).decimal().not_null())
                .col(ColumnDef::new(Game::MaxAmountPerNumber).decimal().not_null())
                .col(ColumnDef::new(Game::DrawnAt).timestamp_with_time_zone().null())
                .to_owned()
        ).await?;

        manager.create_table(
            Table::create()
                .table(DrawResult::Table)
                .if_not_exists()
                .col(ColumnDef::new(DrawResult::Id).uuid().not_null().primary_key())
                .col(ColumnDef::new(DrawResult::Epoch).big_integer().not_null())
                .col(ColumnDef::new(DrawResult::NumberPair).string_len(8).not_null())
                .col(ColumnDef::new(DrawResult::PrizeCategory).string_len(2).not_null())
                .col(ColumnDef::new(DrawResult::CreatedAt).timestamp_with_time_zone().not_null())
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_draw_result_game")
                        .from(DrawResult::Table, DrawResult::Epoch)
                        .to(Game::Table, Game::Epoch)
                        .on_delete(ForeignKeyAction::Cascade)
                )
                .to_owned()
        ).await?;

        manager.create_index(
            Index::create()
                .if_not_exists()
                .name("idx_draw_result_epoch_number")
                .table(DrawResult::Table)
                .col(DrawResult::Epoch)
                .col(DrawResult::NumberPair)
                .to_owned()
        ).await?;

        manager.create_table(
            Table::create()
                .table(BetOrder::Table)
                .if_not_exists()
                .col(ColumnDef::new(BetOrder::Id).uuid().not_null().primary_key())
                .col(ColumnDef::new(BetOrder::WalletTxId).uuid().not_null())
                .col(ColumnDef::new(BetOrder::CreditWalletTxId).uuid().null())
                .col(ColumnDef::new(BetOrder::UserWalletId).uuid().not_null())
                .col(ColumnDef::new(BetOrder::Epoch).big_integer().not_null())
                .col(ColumnDef::new(BetOrder::NumberPair).string_len(8).not_null())
                .col(ColumnDef::new(BetOrder::BigForecastAmount).decimal().not_null())
                .col(ColumnDef::new(BetOrder::SmallForecastAmount).decimal().not_null())
                .col(ColumnDef::new(BetOrder::CreditAmount).decimal().not_null().default(0))
                .col(ColumnDef::new(BetOrder::ClaimWalletTxId).uuid().null())
                .col(ColumnDef::new(BetOrder::CreatedAt).timestamp_with_time_zone().not_null())
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_bet_order_wallet_tx")
                        .from(BetOrder::Table, BetOrder::WalletTxId)
                        .to(WalletTx::Table, WalletTx::Id)
                        .on_delete(ForeignKeyAction::Cascade)
                )
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_bet_order_game")
                        .from(BetOrder::Table, BetOrder::Epoch)
                        .to(Game::Table, Game::Epoch)
                        .on_delete(ForeignKeyAction::Restrict)
                )
                .to_owned()
        ).await?;

        // Per-number exposure cap is checked on every bet
        manager.create_index(
            Index::create()
                .if_not_exists()
                .name("idx_bet_order_epoch_number")
                .table(BetOrder::Table)
                .col(BetOrder::Epoch)
                .col(BetOrder::NumberPair)
                .to_owned()
        ).await?;

        manager.create_index(
            Index::create()
                .if_not_exists()
                .name("idx_bet_order_user_wallet")
                .table(BetOrder::Table)
                .col(BetOrder::UserWalletId)
                .to_owned()
        ).await?;

        manager.create_table(
            Table::create()
                .table(ClaimDetail::Table)
                .if_not_exists()
                .col(ColumnDef::new(ClaimDetail::Id).uuid().not_null().primary_key())
                .col(ColumnDef::new(ClaimDetail::WalletTxId).uuid().not_null())
                .col(ColumnDef::new(ClaimDetail::BetOrderId).uuid().not_null())
                .col(ColumnDef::new(ClaimDetail::DrawResultId).uuid().not_null())
                .col(ColumnDef::new(ClaimDetail::PrizeCategory).string_len(2).not_null())
                .col(ColumnDef::new(ClaimDetail::ClaimAmount).decimal().not_null())
                .col(ColumnDef::new(ClaimDetail::PointAmount).decimal().not_null())
                .col(ColumnDef::new(ClaimDetail::CreatedAt).timestamp_with_time_zone().not_null())
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_claim_detail_wallet_tx")
                        .from(ClaimDetail::Table, ClaimDetail::WalletTxId)
                        .to(WalletTx::Table, WalletTx::Id)
                        .on_delete(ForeignKeyAction::Cascade)
                )
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_claim_detail_bet_order")
                        .from(ClaimDetail::Table, ClaimDetail::BetOrderId)
                        .to(BetOrder::Table, BetOrder::Id)
                        .on_delete(ForeignKeyAction::Cascade)
                )
                .to_owned()
        ).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(ClaimDetail::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(BetOrder::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(DrawResult::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(Game::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum WalletTx {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Game {
    Table,
    Epoch,
    StartAt,
    EndAt,
    MinBetAmount,
    MaxBetAmount,
    MaxAmountPerNumber,
    DrawnAt,
}

#[derive(DeriveIden)]
enum DrawResult {
    Table,
    Id,
    Epoch,
    NumberPair,
    PrizeCategory,
    CreatedAt,
}

#[derive(DeriveIden)]
enum BetOrder {
    Table,
    Id,
    WalletTxId,
    CreditWalletTxId,
    UserWalletId,
    Epoch,
    NumberPair,
    BigForecastAmount,
    SmallForecastAmount,
    CreditAmount,
    ClaimWalletTxId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum ClaimDetail {
    Table,
    Id,
    WalletTxId,
    BetOrderId,
    DrawResultId,
    PrizeCategory,
    ClaimAmount,
    PointAmount,
    CreatedAt,
}
