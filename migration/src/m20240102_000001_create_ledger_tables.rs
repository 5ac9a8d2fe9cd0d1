use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.create_table(
            Table::create()
                .table(GameUsdTx::Table)
                .if_not_exists()
                .col(ColumnDef::new(GameUsdTx::Id).uuid().not_null().primary_key())
                .col(ColumnDef::new(GameUsdTx::Amount).decimal().not_null())
                .col(ColumnDef::new(GameUsdTx::ChainId).big_integer().not_null())
                .col(ColumnDef::new(GameUsdTx::SenderAddress).string().not_null())
                .col(ColumnDef::new(GameUsdTx::ReceiverAddress).string().not_null())
                .col(ColumnDef::new(GameUsdTx::Status).string_len(20).not_null())
                .col(ColumnDef::new(GameUsdTx::TxHash).string().null())
                .col(ColumnDef::new(GameUsdTx::RetryCount).integer().not_null().default(0))
                .col(ColumnDef::new(GameUsdTx::CreatedAt).timestamp_with_time_zone().not_null())
                .col(ColumnDef::new(GameUsdTx::UpdatedAt).timestamp_with_time_zone().not_null())
                .to_owned()
        ).await?;

        manager.create_table(
            Table::create()
                .table(WalletTx::Table)
                .if_not_exists()
                .col(ColumnDef::new(WalletTx::Id).uuid().not_null().primary_key())
                .col(ColumnDef::new(WalletTx::UserWalletId).uuid().not_null())
                .col(ColumnDef::new(WalletTx::TxType).string_len(20).not_null())
                .col(ColumnDef::new(WalletTx::Amount).decimal().not_null())
                .col(ColumnDef::new(WalletTx::StartingBalance).decimal().null())
                .col(ColumnDef::new(WalletTx::EndingBalance).decimal().null())
                .col(ColumnDef::new(WalletTx::Status).string_len(20).not_null())
                .col(ColumnDef::new(WalletTx::TxHash).string().null())
                .col(ColumnDef::new(WalletTx::GameUsdTxId).uuid().null())
                .col(ColumnDef::new(WalletTx::Escalated).boolean().not_null().default(false))
                .col(ColumnDef::new(WalletTx::CreatedAt).timestamp_with_time_zone().not_null())
                .col(ColumnDef::new(WalletTx::UpdatedAt).timestamp_with_time_zone().not_null())
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_wallet_tx_user_wallet")
                        .from(WalletTx::Table, WalletTx::UserWalletId)
                        .to(UserWallet::Table, UserWallet::Id)
                        .on_delete(ForeignKeyAction::Restrict)
                )
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_wallet_tx_game_usd_tx")
                        .from(WalletTx::Table, WalletTx::GameUsdTxId)
                        .to(GameUsdTx::Table, GameUsdTx::Id)
                        .on_delete(ForeignKeyAction::SetNull)
                )
                .to_owned()
        ).await?;

        // Ledger walks rows per wallet in creation order
        manager.create_index(
            Index::create()
                .if_not_exists()
                .name("idx_wallet_tx_wallet_created")
                .table(WalletTx::Table)
                .col(WalletTx::UserWalletId)
                .col(WalletTx::CreatedAt)
                .to_owned()
        ).await?;

        manager.create_index(
            Index::create()
                .if_not_exists()
                .name("idx_wallet_tx_status")
                .table(WalletTx::Table)
                .col(WalletTx::Status)
                .col(WalletTx::TxType)
                .to_owned()
        ).await?;

        manager.create_table(
            Table::create()
                .table(CreditWalletTx::Table)
                .if_not_exists()
                .col(ColumnDef::new(CreditWalletTx::Id).uuid().not_null().primary_key())
                .col(ColumnDef::new(CreditWalletTx::UserWalletId).uuid().not_null())
                .col(ColumnDef::new(CreditWalletTx::TxType).string_len(20).not_null())
                .col(ColumnDef::new(CreditWalletTx::Amount).decimal().not_null())
                .col(ColumnDef::new(CreditWalletTx::StartingBalance).decimal().null())
                .col(ColumnDef::new(CreditWalletTx::EndingBalance).decimal().null())
                .col(ColumnDef::new(CreditWalletTx::Status).string_len(20).not_null())
                .col(ColumnDef::new(CreditWalletTx::Campaign).string().null())
                .col(ColumnDef::new(CreditWalletTx::ExpirationDate).timestamp_with_time_zone().null())
                .col(ColumnDef::new(CreditWalletTx::WalletTxId).uuid().null())
                .col(ColumnDef::new(CreditWalletTx::TxHash).string().null())
                .col(
                    ColumnDef::new(CreditWalletTx::CreatedAt).timestamp_with_time_zone().not_null()
                )
                .col(
                    ColumnDef::new(CreditWalletTx::UpdatedAt).timestamp_with_time_zone().not_null()
                )
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_credit_wallet_tx_user_wallet")
                        .from(CreditWalletTx::Table, CreditWalletTx::UserWalletId)
                        .to(UserWallet::Table, UserWallet::Id)
                        .on_delete(ForeignKeyAction::Restrict)
                )
                .to_owned()
        ).await?;

        manager.create_index(
            Index::create()
                .if_not_exists()
                .name("idx_credit_wallet_tx_expiry")
                .table(CreditWalletTx::Table)
                .col(CreditWalletTx::Status)
                .col(CreditWalletTx::ExpirationDate)
                .to_owned()
        ).await?;

        manager.create_table(
            Table::create()
                .table(DepositTx::Table)
                .if_not_exists()
                .col(ColumnDef::new(DepositTx::Id).uuid().not_null().primary_key())
                .col(ColumnDef::new(DepositTx::WalletTxId).uuid().not_null().unique_key())
                .col(ColumnDef::new(DepositTx::ChainId).big_integer().not_null())
                .col(ColumnDef::new(DepositTx::SenderAddress).string().not_null())
                .col(ColumnDef::new(DepositTx::ReceiverAddress).string().not_null())
                .col(ColumnDef::new(DepositTx::Amount).decimal().not_null())
                .col(ColumnDef::new(DepositTx::TxHash).string().not_null().unique_key())
                .col(ColumnDef::new(DepositTx::EscrowTxHash).string().null())
                .col(ColumnDef::new(DepositTx::Status).string_len(20).not_null())
                .col(ColumnDef::new(DepositTx::RetryCount).integer().not_null().default(0))
                .col(ColumnDef::new(DepositTx::CreatedAt).timestamp_with_time_zone().not_null())
                .col(ColumnDef::new(DepositTx::UpdatedAt).timestamp_with_time_zone().not_null())
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_deposit_tx_wallet_tx")
                        .from(DepositTx::Table, DepositTx::WalletTxId)
                        .to(WalletTx::Table, WalletTx::Id)
                        .on_delete(ForeignKeyAction::Cascade)
                )
                .to_owned()
        ).await?;

        manager.create_table(
            Table::create()
                .table(RedeemTx::Table)
                .if_not_exists()
                .col(ColumnDef::new(RedeemTx::Id).uuid().not_null().primary_key())
                .col(ColumnDef::new(RedeemTx::WalletTxId).uuid().not_null().unique_key())
                .col(ColumnDef::new(RedeemTx::DestinationAddress).string().not_null())
                .col(ColumnDef::new(RedeemTx::Amount).decimal().not_null())
                .col(ColumnDef::new(RedeemTx::Fee).decimal().not_null())
                .col(ColumnDef::new(RedeemTx::ChainId).big_integer().not_null())
                .col(ColumnDef::new(RedeemTx::ReviewedBy).string().null())
                .col(ColumnDef::new(RedeemTx::ReviewedAt).timestamp_with_time_zone().null())
                .col(ColumnDef::new(RedeemTx::ReviewNote).text().null())
                .col(ColumnDef::new(RedeemTx::PayoutCanProceed).boolean().null())
                .col(ColumnDef::new(RedeemTx::RedeemTxHash).string().null())
                .col(ColumnDef::new(RedeemTx::PayoutSignature).text().null())
                .col(ColumnDef::new(RedeemTx::PayoutTxHash).string().null())
                .col(ColumnDef::new(RedeemTx::PayoutStatus).string_len(20).null())
                .col(ColumnDef::new(RedeemTx::CreatedAt).timestamp_with_time_zone().not_null())
                .col(ColumnDef::new(RedeemTx::UpdatedAt).timestamp_with_time_zone().not_null())
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_redeem_tx_wallet_tx")
                        .from(RedeemTx::Table, RedeemTx::WalletTxId)
                        .to(WalletTx::Table, WalletTx::Id)
                        .on_delete(ForeignKeyAction::Cascade)
                )
                .to_owned()
        ).await?;

        manager.create_index(
            Index::create()
                .if_not_exists()
                .name("idx_redeem_tx_payout")
                .table(RedeemTx::Table)
                .col(RedeemTx::PayoutStatus)
                .to_owned()
        ).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(RedeemTx::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(DepositTx::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(CreditWalletTx::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(WalletTx::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(GameUsdTx::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum UserWallet {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum GameUsdTx {
    Table,
    Id,
    Amount,
    ChainId,
    SenderAddress,
    ReceiverAddress,
    Status,
    TxHash,
    RetryCount,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum WalletTx {
    Table,
    Id,
    UserWalletId,
    TxType,
    Amount,
    StartingBalance,
    EndingBalance,
    Status,
    TxHash,
    GameUsdTxId,
    Escalated,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum CreditWalletTx {
    Table,
    Id,
    UserWalletId,
    TxType,
    Amount,
    StartingBalance,
    EndingBalance,
    Status,
    Campaign,
    ExpirationDate,
    WalletTxId,
    TxHash,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum DepositTx {
    Table,
    Id,
    WalletTxId,
    ChainId,
    SenderAddress,
    ReceiverAddress,
    Amount,
    TxHash,
    EscrowTxHash,
    Status,
    RetryCount,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum RedeemTx {
    Table,
    Id,
    WalletTxId,
    DestinationAddress,
    Amount,
    Fee,
    ChainId,
    ReviewedBy,
    ReviewedAt,
    ReviewNote,
    PayoutCanProceed,
    RedeemTxHash,
    PayoutSignature,
    PayoutTxHash,
    PayoutStatus,
    CreatedAt,
    UpdatedAt,
}
