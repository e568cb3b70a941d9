//! Create remote actors table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RemoteActors::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RemoteActors::Id)
                            .string_len(36)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(RemoteActors::ApId)
                            .string_len(1024)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RemoteActors::Username)
                            .string_len(256)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RemoteActors::Domain)
                            .string_len(256)
                            .not_null(),
                    )
                    .col(ColumnDef::new(RemoteActors::DisplayName).string_len(256))
                    .col(ColumnDef::new(RemoteActors::AvatarUrl).string_len(1024))
                    .col(ColumnDef::new(RemoteActors::Summary).text())
                    .col(ColumnDef::new(RemoteActors::PublicKeyPem).text().not_null())
                    .col(
                        ColumnDef::new(RemoteActors::Inbox)
                            .string_len(1024)
                            .not_null(),
                    )
                    .col(ColumnDef::new(RemoteActors::SharedInbox).string_len(1024))
                    .col(
                        ColumnDef::new(RemoteActors::ActorType)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RemoteActors::FetchedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RemoteActors::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Unique index: ap_id (the global actor identity)
        manager
            .create_index(
                Index::create()
                    .name("idx_remote_actors_ap_id")
                    .table(RemoteActors::Table)
                    .col(RemoteActors::ApId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Unique index: (username, domain)
        manager
            .create_index(
                Index::create()
                    .name("idx_remote_actors_username_domain")
                    .table(RemoteActors::Table)
                    .col(RemoteActors::Username)
                    .col(RemoteActors::Domain)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Index: fetched_at (for the stale cleaner scan)
        manager
            .create_index(
                Index::create()
                    .name("idx_remote_actors_fetched_at")
                    .table(RemoteActors::Table)
                    .col(RemoteActors::FetchedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RemoteActors::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum RemoteActors {
    Table,
    Id,
    ApId,
    Username,
    Domain,
    DisplayName,
    AvatarUrl,
    Summary,
    PublicKeyPem,
    Inbox,
    SharedInbox,
    ActorType,
    FetchedAt,
    CreatedAt,
}
