use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.create_table(
            Table::create()
                .table(Notification::Table)
                .if_not_exists()
                .col(ColumnDef::new(Notification::Id).uuid().not_null().primary_key())
                .col(ColumnDef::new(Notification::Audience).string_len(10).not_null())
                .col(ColumnDef::new(Notification::UserId).uuid().null())
                .col(ColumnDef::new(Notification::Kind).string_len(50).not_null())
                .col(ColumnDef::new(Notification::Title).string().not_null())
                .col(ColumnDef::new(Notification::Message).text().not_null())
                .col(ColumnDef::new(Notification::Broadcast).boolean().not_null().default(false))
                .col(ColumnDef::new(Notification::Escalate).boolean().not_null().default(false))
                .col(ColumnDef::new(Notification::WalletTxId).uuid().null())
                .col(
                    ColumnDef::new(Notification::CreatedAt)
                        .timestamp_with_time_zone()
                        .not_null()
                        .default(Expr::current_timestamp())
                )
                .to_owned()
        ).await?;

        manager.create_index(
            Index::create()
                .if_not_exists()
                .name("idx_notification_user")
                .table(Notification::Table)
                .col(Notification::UserId)
                .col(Notification::CreatedAt)
                .to_owned()
        ).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(Notification::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum Notification {
    Table,
    Id,
    Audience,
    UserId,
    Kind,
    Title,
    Message,
    Broadcast,
    Escalate,
    WalletTxId,
    CreatedAt,
}
