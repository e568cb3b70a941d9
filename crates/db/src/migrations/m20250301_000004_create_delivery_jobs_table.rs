//! Create delivery jobs table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DeliveryJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DeliveryJobs::Id)
                            .string_len(36)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DeliveryJobs::ActivityJson).text().not_null())
                    .col(
                        ColumnDef::new(DeliveryJobs::InboxUrl)
                            .string_len(1024)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DeliveryJobs::ActorUri)
                            .string_len(1024)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DeliveryJobs::Status)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DeliveryJobs::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(DeliveryJobs::LastError).string_len(1000))
                    .col(ColumnDef::new(DeliveryJobs::NextRetryAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(DeliveryJobs::DeliveredAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(DeliveryJobs::InsertedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(DeliveryJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Partial unique index: at most one live (pending/failed) job per
        // (inbox_url, actor_uri). This is the authoritative dedup primitive
        // for outbound delivery; sea-query's index builder cannot express
        // the WHERE clause, so raw SQL it is.
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE UNIQUE INDEX idx_delivery_jobs_live_dedup \
                 ON delivery_jobs (inbox_url, actor_uri) \
                 WHERE status IN ('pending', 'failed')",
            )
            .await?;

        // Index: status + next_retry_at (worker poll)
        manager
            .create_index(
                Index::create()
                    .name("idx_delivery_jobs_status_retry")
                    .table(DeliveryJobs::Table)
                    .col(DeliveryJobs::Status)
                    .col(DeliveryJobs::NextRetryAt)
                    .to_owned(),
            )
            .await?;

        // Index: inserted_at (poll ordering)
        manager
            .create_index(
                Index::create()
                    .name("idx_delivery_jobs_inserted_at")
                    .table(DeliveryJobs::Table)
                    .col(DeliveryJobs::InsertedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DeliveryJobs::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum DeliveryJobs {
    Table,
    Id,
    ActivityJson,
    InboxUrl,
    ActorUri,
    Status,
    Attempts,
    LastError,
    NextRetryAt,
    DeliveredAt,
    InsertedAt,
    UpdatedAt,
}
