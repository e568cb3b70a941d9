//! Create user and board follow tables migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UserFollows::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserFollows::Id)
                            .string_len(36)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(UserFollows::UserId)
                            .string_len(36)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserFollows::RemoteActorId)
                            .string_len(36)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserFollows::State)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserFollows::ApId)
                            .string_len(1024)
                            .not_null(),
                    )
                    .col(ColumnDef::new(UserFollows::AcceptedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(UserFollows::RejectedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(UserFollows::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_follows_remote_actor")
                            .from(UserFollows::Table, UserFollows::RemoteActorId)
                            .to(RemoteActors::Table, RemoteActors::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_user_follows_ap_id")
                    .table(UserFollows::Table)
                    .col(UserFollows::ApId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_user_follows_user_remote")
                    .table(UserFollows::Table)
                    .col(UserFollows::UserId)
                    .col(UserFollows::RemoteActorId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(BoardFollows::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BoardFollows::Id)
                            .string_len(36)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(BoardFollows::BoardId)
                            .string_len(36)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BoardFollows::RemoteActorId)
                            .string_len(36)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BoardFollows::State)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BoardFollows::ApId)
                            .string_len(1024)
                            .not_null(),
                    )
                    .col(ColumnDef::new(BoardFollows::AcceptedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(BoardFollows::RejectedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(BoardFollows::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_board_follows_remote_actor")
                            .from(BoardFollows::Table, BoardFollows::RemoteActorId)
                            .to(RemoteActors::Table, RemoteActors::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_board_follows_ap_id")
                    .table(BoardFollows::Table)
                    .col(BoardFollows::ApId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_board_follows_board_remote")
                    .table(BoardFollows::Table)
                    .col(BoardFollows::BoardId)
                    .col(BoardFollows::RemoteActorId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BoardFollows::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(UserFollows::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum UserFollows {
    Table,
    Id,
    UserId,
    RemoteActorId,
    State,
    ApId,
    AcceptedAt,
    RejectedAt,
    CreatedAt,
}

#[derive(Iden)]
enum BoardFollows {
    Table,
    Id,
    BoardId,
    RemoteActorId,
    State,
    ApId,
    AcceptedAt,
    RejectedAt,
    CreatedAt,
}

#[derive(Iden)]
enum RemoteActors {
    Table,
    Id,
}
