//! Remote actor repository.

use std::sync::Arc;

use crate::entities::{remote_actor, RemoteActor};
use chrono::{DateTime, Utc};
use driftwood_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect,
};

/// Remote actor repository for database operations.
#[derive(Clone)]
pub struct RemoteActorRepository {
    db: Arc<DatabaseConnection>,
}

impl RemoteActorRepository {
    /// Create a new remote actor repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find an actor by its `ActivityPub` ID.
    pub async fn find_by_ap_id(&self, ap_id: &str) -> AppResult<Option<remote_actor::Model>> {
        RemoteActor::find()
            .filter(remote_actor::Column::ApId.eq(ap_id))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find an actor by its row ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<remote_actor::Model>> {
        RemoteActor::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find an actor by `(username, domain)`.
    pub async fn find_by_username_domain(
        &self,
        username: &str,
        domain: &str,
    ) -> AppResult<Option<remote_actor::Model>> {
        RemoteActor::find()
            .filter(remote_actor::Column::Username.eq(username))
            .filter(remote_actor::Column::Domain.eq(domain))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Insert a new actor row.
    pub async fn create(&self, model: remote_actor::ActiveModel) -> AppResult<remote_actor::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Update an existing actor row.
    pub async fn update(&self, model: remote_actor::ActiveModel) -> AppResult<remote_actor::Model> {
        model
            .update(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Actors whose profile was last fetched before `cutoff`, oldest first.
    pub async fn find_stale(
        &self,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> AppResult<Vec<remote_actor::Model>> {
        RemoteActor::find()
            .filter(remote_actor::Column::FetchedAt.lt(cutoff))
            .order_by_asc(remote_actor::Column::FetchedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Delete an actor row.
    pub async fn delete(&self, id: &str) -> AppResult<()> {
        RemoteActor::delete_by_id(id)
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn test_actor(ap_id: &str) -> remote_actor::Model {
        remote_actor::Model {
            id: "ra1".to_string(),
            ap_id: ap_id.to_string(),
            username: "alice".to_string(),
            domain: "r.ex".to_string(),
            display_name: Some("Alice".to_string()),
            avatar_url: None,
            summary: None,
            public_key_pem: "-----BEGIN PUBLIC KEY-----\ntest\n-----END PUBLIC KEY-----"
                .to_string(),
            inbox: "https://r.ex/u/alice/inbox".to_string(),
            shared_inbox: Some("https://r.ex/inbox".to_string()),
            actor_type: "Person".to_string(),
            fetched_at: Utc::now().into(),
            created_at: Utc::now().into(),
        }
    }

    #[tokio::test]
    async fn test_find_by_ap_id_found() {
        let actor = test_actor("https://r.ex/u/alice");

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[actor.clone()]])
                .into_connection(),
        );

        let repo = RemoteActorRepository::new(db);
        let found = repo
            .find_by_ap_id("https://r.ex/u/alice")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(found.username, "alice");
        assert_eq!(found.domain, "r.ex");
    }

    #[tokio::test]
    async fn test_find_by_ap_id_not_found() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<remote_actor::Model>::new()])
                .into_connection(),
        );

        let repo = RemoteActorRepository::new(db);
        let result = repo.find_by_ap_id("https://r.ex/u/nobody").await.unwrap();

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_find_stale() {
        let actor = test_actor("https://r.ex/u/alice");

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[actor]])
                .into_connection(),
        );

        let repo = RemoteActorRepository::new(db);
        let stale = repo.find_stale(Utc::now(), 50).await.unwrap();

        assert_eq!(stale.len(), 1);
    }
}
