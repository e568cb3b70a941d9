//! Create followers table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Followers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Followers::Id)
                            .string_len(36)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Followers::ActorUri)
                            .string_len(1024)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Followers::FollowerUri)
                            .string_len(1024)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Followers::RemoteActorId)
                            .string_len(36)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Followers::ActivityId)
                            .string_len(1024)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Followers::AcceptedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Followers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_followers_remote_actor")
                            .from(Followers::Table, Followers::RemoteActorId)
                            .to(RemoteActors::Table, RemoteActors::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Unique index: (actor_uri, follower_uri) - one follow per pair
        manager
            .create_index(
                Index::create()
                    .name("idx_followers_actor_follower")
                    .table(Followers::Table)
                    .col(Followers::ActorUri)
                    .col(Followers::FollowerUri)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Index: remote_actor_id (reference checks, actor deletion)
        manager
            .create_index(
                Index::create()
                    .name("idx_followers_remote_actor_id")
                    .table(Followers::Table)
                    .col(Followers::RemoteActorId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Followers::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Followers {
    Table,
    Id,
    ActorUri,
    FollowerUri,
    RemoteActorId,
    ActivityId,
    AcceptedAt,
    CreatedAt,
}

#[derive(Iden)]
enum RemoteActors {
    Table,
    Id,
}
