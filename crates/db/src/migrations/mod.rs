//! Database migrations for the federation core.

use sea_orm_migration::prelude::*;

mod m20250301_000001_create_remote_actors_table;
mod m20250301_000002_create_followers_table;
mod m20250301_000003_create_follow_tables;
mod m20250301_000004_create_delivery_jobs_table;
mod m20250301_000005_create_settings_table;

/// Migration runner.
pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_remote_actors_table::Migration),
            Box::new(m20250301_000002_create_followers_table::Migration),
            Box::new(m20250301_000003_create_follow_tables::Migration),
            Box::new(m20250301_000004_create_delivery_jobs_table::Migration),
            Box::new(m20250301_000005_create_settings_table::Migration),
        ]
    }
}
