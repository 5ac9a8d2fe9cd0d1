use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.create_table(
            Table::create()
                .table(Job::Table)
                .if_not_exists()
                .col(ColumnDef::new(Job::Id).string().not_null().primary_key())
                .col(ColumnDef::new(Job::Queue).string_len(50).not_null())
                .col(ColumnDef::new(Job::JobType).string_len(50).not_null())
                .col(ColumnDef::new(Job::Payload).json_binary().not_null())
                .col(ColumnDef::new(Job::Status).string_len(20).not_null())
                .col(ColumnDef::new(Job::AttemptsMade).integer().not_null().default(0))
                .col(ColumnDef::new(Job::MaxAttempts).integer().not_null())
                .col(ColumnDef::new(Job::BackoffMs).big_integer().not_null())
                .col(ColumnDef::new(Job::RunAt).timestamp_with_time_zone().not_null())
                .col(ColumnDef::new(Job::LockedAt).timestamp_with_time_zone().null())
                .col(ColumnDef::new(Job::LastError).text().null())
                .col(ColumnDef::new(Job::CreatedAt).timestamp_with_time_zone().not_null())
                .col(ColumnDef::new(Job::UpdatedAt).timestamp_with_time_zone().not_null())
                .to_owned()
        ).await?;

        // Workers poll by status and due time
        manager.create_index(
            Index::create()
                .if_not_exists()
                .name("idx_job_status_run_at")
                .table(Job::Table)
                .col(Job::Status)
                .col(Job::RunAt)
                .to_owned()
        ).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(Job::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum Job {
    Table,
    Id,
    Queue,
    JobType,
    Payload,
    Status,
    AttemptsMade,
    MaxAttempts,
    BackoffMs,
    RunAt,
    LockedAt,
    LastError,
    CreatedAt,
    UpdatedAt,
}
