use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.create_table(
            Table::create()
                .table(User::Table)
                .if_not_exists()
                .col(ColumnDef::new(User::Id).uuid().not_null().primary_key())
                .col(ColumnDef::new(User::CustodyAddress).string().not_null().unique_key())
                .col(ColumnDef::new(User::ReferrerId).uuid().null())
                .col(ColumnDef::new(User::ReferralRank).integer().not_null().default(1))
                .col(
                    ColumnDef::new(User::CreatedAt)
                        .timestamp_with_time_zone()
                        .not_null()
                        .default(Expr::current_timestamp())
                )
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_user_referrer")
                        .from(User::Table, User::ReferrerId)
                        .to(User::Table, User::Id)
                        .on_delete(ForeignKeyAction::SetNull)
                )
                .to_owned()
        ).await?;

        manager.create_table(
            Table::create()
                .table(UserWallet::Table)
                .if_not_exists()
                .col(ColumnDef::new(UserWallet::Id).uuid().not_null().primary_key())
                .col(ColumnDef::new(UserWallet::UserId).uuid().not_null().unique_key())
                .col(ColumnDef::new(UserWallet::WalletAddress).string().not_null())
                .col(ColumnDef::new(UserWallet::WalletBalance).decimal().not_null().default(0))
                .col(ColumnDef::new(UserWallet::CreditBalance).decimal().not_null().default(0))
                .col(
                    ColumnDef::new(UserWallet::RedeemableBalance).decimal().not_null().default(0)
                )
                .col(ColumnDef::new(UserWallet::PointBalance).decimal().not_null().default(0))
                .col(
                    ColumnDef::new(UserWallet::UpdatedAt)
                        .timestamp_with_time_zone()
                        .not_null()
                        .default(Expr::current_timestamp())
                )
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_user_wallet_user")
                        .from(UserWallet::Table, UserWallet::UserId)
                        .to(User::Table, User::Id)
                        .on_delete(ForeignKeyAction::Cascade)
                )
                .to_owned()
        ).await?;

        // Custody address lookups from deposit webhooks
        manager.create_index(
            Index::create()
                .if_not_exists()
                .name("idx_user_wallet_address")
                .table(UserWallet::Table)
                .col(UserWallet::WalletAddress)
                .to_owned()
        ).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(UserWallet::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(User::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum User {
    Table,
    Id,
    CustodyAddress,
    ReferrerId,
    ReferralRank,
    CreatedAt,
}

#[derive(DeriveIden)]
enum UserWallet {
    Table,
    Id,
    UserId,
    WalletAddress,
    WalletBalance,
    CreditBalance,
    RedeemableBalance,
    PointBalance,
    UpdatedAt,
}
