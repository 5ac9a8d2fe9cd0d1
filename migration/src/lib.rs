pub use sea_orm_migration::prelude::*;

mod m20240101_000001_create_users_table;
mod m20240102_000001_create_ledger_tables;
mod m20240103_000001_create_game_tables;
mod m20240104_000001_create_job_table;
mod m20240105_000001_create_notification_table;
mod m20240105_000002_create_custody_key_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_users_table::Migration),
            Box::new(m20240102_000001_create_ledger_tables::Migration),
            Box::new(m20240103_000001_create_game_tables::Migration),
            Box::new(m20240104_000001_create_job_table::Migration),
            Box::new(m20240105_000001_create_notification_table::Migration),
            Box::new(m20240105_000002_create_custody_key_table::Migration)
        ]
    }
}
