//! Follower repository.

use std::sync::Arc;

use crate::entities::{follower, remote_actor, Follower};
use crate::repositories::{insert_outcome, WriteOutcome};
use driftwood_common::{AppError, AppResult, IdGenerator};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set, TransactionTrait,
};

/// Follower repository for database operations.
#[derive(Clone)]
pub struct FollowerRepository {
    db: Arc<DatabaseConnection>,
    id_gen: IdGenerator,
}

impl FollowerRepository {
    /// Create a new follower repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            id_gen: IdGenerator::new(),
        }
    }

    /// Record a remote actor following a local actor URI.
    ///
    /// A duplicate `(actor_uri, follower_uri)` pair is reported as
    /// [`WriteOutcome::AlreadyExists`], not an error.
    pub async fn create(
        &self,
        actor_uri: &str,
        follower_uri: &str,
        remote_actor_id: &str,
        activity_id: &str,
    ) -> AppResult<WriteOutcome> {
        let model = follower::ActiveModel {
            id: Set(self.id_gen.generate()),
            actor_uri: Set(actor_uri.to_string()),
            follower_uri: Set(follower_uri.to_string()),
            remote_actor_id: Set(remote_actor_id.to_string()),
            activity_id: Set(activity_id.to_string()),
            accepted_at: Set(Some(chrono::Utc::now().into())),
            created_at: Set(chrono::Utc::now().into()),
        };

        match model.insert(self.db.as_ref()).await {
            Ok(_) => Ok(WriteOutcome::Created),
            Err(e) => insert_outcome(e),
        }
    }

    /// Find a follow edge by its `(actor_uri, follower_uri)` pair.
    pub async fn find_by_pair(
        &self,
        actor_uri: &str,
        follower_uri: &str,
    ) -> AppResult<Option<follower::Model>> {
        Follower::find()
            .filter(follower::Column::ActorUri.eq(actor_uri))
            .filter(follower::Column::FollowerUri.eq(follower_uri))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Delete a follow edge; returns whether a row was removed.
    pub async fn delete_by_pair(&self, actor_uri: &str, follower_uri: &str) -> AppResult<bool> {
        let result = Follower::delete_many()
            .filter(follower::Column::ActorUri.eq(actor_uri))
            .filter(follower::Column::FollowerUri.eq(follower_uri))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected > 0)
    }

    /// Delete a follow edge by the AP id of its original Follow activity,
    /// scoped to the follower that sent it.
    pub async fn delete_by_activity_id(
        &self,
        activity_id: &str,
        follower_uri: &str,
    ) -> AppResult<bool> {
        let result = Follower::delete_many()
            .filter(follower::Column::ActivityId.eq(activity_id))
            .filter(follower::Column::FollowerUri.eq(follower_uri))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected > 0)
    }

    /// Delete every follow edge held by a remote actor (actor deletion).
    pub async fn delete_all_for_remote_actor(&self, remote_actor_id: &str) -> AppResult<u64> {
        let result = Follower::delete_many()
            .filter(follower::Column::RemoteActorId.eq(remote_actor_id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected)
    }

    /// All follow edges pointing at a local actor URI.
    pub async fn list_for_actor(&self, actor_uri: &str) -> AppResult<Vec<follower::Model>> {
        Follower::find()
            .filter(follower::Column::ActorUri.eq(actor_uri))
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Delivery inboxes for the followers of a local actor.
    ///
    /// Prefers a follower's shared inbox when it is non-empty; the caller
    /// deduplicates across sets.
    pub async fn follower_inboxes(&self, actor_uri: &str) -> AppResult<Vec<String>> {
        let rows = Follower::find()
            .filter(follower::Column::ActorUri.eq(actor_uri))
            .find_also_related(remote_actor::Entity)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter_map(|(_, actor)| actor)
            .map(|actor| match actor.shared_inbox {
                Some(shared) if !shared.is_empty() => shared,
                _ => actor.inbox,
            })
            .collect())
    }

    /// Whether any follow edge references a remote actor.
    pub async fn exists_for_remote_actor(&self, remote_actor_id: &str) -> AppResult<bool> {
        let count = Follower::find()
            .filter(follower::Column::RemoteActorId.eq(remote_actor_id))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(count > 0)
    }

    /// Move all follow edges from one remote actor to another (Move
    /// activity). Edges that would duplicate an existing
    /// `(actor_uri, follower_uri)` pair are dropped instead of moved.
    pub async fn migrate_to(
        &self,
        old_remote_actor_id: &str,
        new_actor: &remote_actor::Model,
    ) -> AppResult<u64> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let rows = Follower::find()
            .filter(follower::Column::RemoteActorId.eq(old_remote_actor_id))
            .all(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let mut migrated = 0u64;
        for row in rows {
            let duplicate = Follower::find()
                .filter(follower::Column::ActorUri.eq(row.actor_uri.clone()))
                .filter(follower::Column::FollowerUri.eq(new_actor.ap_id.clone()))
                .one(&txn)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?
                .is_some();

            if duplicate {
                Follower::delete_by_id(row.id)
                    .exec(&txn)
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
            } else {
                let mut active: follower::ActiveModel = row.into();
                active.follower_uri = Set(new_actor.ap_id.clone());
                active.remote_actor_id = Set(new_actor.id.clone());
                active
                    .update(&txn)
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                migrated += 1;
            }
        }

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(migrated)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn test_follower() -> follower::Model {
        follower::Model {
            id: "f1".to_string(),
            actor_uri: "https://l.ex/ap/users/bob".to_string(),
            follower_uri: "https://r.ex/u/alice".to_string(),
            remote_actor_id: "ra1".to_string(),
            activity_id: "https://r.ex/acts/1".to_string(),
            accepted_at: Some(Utc::now().into()),
            created_at: Utc::now().into(),
        }
    }

    #[tokio::test]
    async fn test_create_follower() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[test_follower()]])
                .into_connection(),
        );

        let repo = FollowerRepository::new(db);
        let outcome = repo
            .create(
                "https://l.ex/ap/users/bob",
                "https://r.ex/u/alice",
                "ra1",
                "https://r.ex/acts/1",
            )
            .await
            .unwrap();

        assert_eq!(outcome, WriteOutcome::Created);
    }

    #[tokio::test]
    async fn test_delete_by_pair() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .into_connection(),
        );

        let repo = FollowerRepository::new(db);
        let deleted = repo
            .delete_by_pair("https://l.ex/ap/users/bob", "https://r.ex/u/alice")
            .await
            .unwrap();

        assert!(deleted);
    }

    #[tokio::test]
    async fn test_exists_for_remote_actor() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[maplit_count(1)]])
                .into_connection(),
        );

        let repo = FollowerRepository::new(db);
        assert!(repo.exists_for_remote_actor("ra1").await.unwrap());
    }

    fn maplit_count(n: i64) -> std::collections::BTreeMap<&'static str, sea_orm::Value> {
        let mut map = std::collections::BTreeMap::new();
        map.insert("num_items", sea_orm::Value::BigInt(Some(n)));
        map
    }
}
