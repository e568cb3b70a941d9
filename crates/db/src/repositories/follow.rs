//! Outbound follow repository (user and board follows).

use std::sync::Arc;

use crate::entities::{
    board_follow, user_follow, user_follow::FollowState, BoardFollow, UserFollow,
};
use crate::repositories::{insert_outcome, WriteOutcome};
use driftwood_common::{AppError, AppResult, IdGenerator};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect, Set,
};

/// Which table matched an Accept/Reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowKind {
    User,
    Board,
}

/// Repository for outbound follows from local users and boards.
#[derive(Clone)]
pub struct FollowRepository {
    db: Arc<DatabaseConnection>,
    id_gen: IdGenerator,
}

impl FollowRepository {
    /// Create a new follow repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            id_gen: IdGenerator::new(),
        }
    }

    /// Record a pending outbound follow from a local user.
    pub async fn create_user_follow(
        &self,
        user_id: &str,
        remote_actor_id: &str,
        ap_id: &str,
    ) -> AppResult<WriteOutcome> {
        let model = user_follow::ActiveModel {
            id: Set(self.id_gen.generate()),
            user_id: Set(user_id.to_string()),
            remote_actor_id: Set(remote_actor_id.to_string()),
            state: Set(FollowState::Pending),
            ap_id: Set(ap_id.to_string()),
            accepted_at: Set(None),
            rejected_at: Set(None),
            created_at: Set(chrono::Utc::now().into()),
        };

        match model.insert(self.db.as_ref()).await {
            Ok(_) => Ok(WriteOutcome::Created),
            Err(e) => insert_outcome(e),
        }
    }

    /// Record a pending outbound follow from a local board.
    pub async fn create_board_follow(
        &self,
        board_id: &str,
        remote_actor_id: &str,
        ap_id: &str,
    ) -> AppResult<WriteOutcome> {
        let model = board_follow::ActiveModel {
            id: Set(self.id_gen.generate()),
            board_id: Set(board_id.to_string()),
            remote_actor_id: Set(remote_actor_id.to_string()),
            state: Set(FollowState::Pending),
            ap_id: Set(ap_id.to_string()),
            accepted_at: Set(None),
            rejected_at: Set(None),
            created_at: Set(chrono::Utc::now().into()),
        };

        match model.insert(self.db.as_ref()).await {
            Ok(_) => Ok(WriteOutcome::Created),
            Err(e) => insert_outcome(e),
        }
    }

    /// Transition the follow matching `ap_id` to accepted.
    ///
    /// Searches user follows first, then board follows (the Accept does
    /// not say which side initiated).
    pub async fn accept_by_ap_id(&self, ap_id: &str) -> AppResult<Option<FollowKind>> {
        self.transition(ap_id, FollowState::Accepted).await
    }

    /// Transition the follow matching `ap_id` to rejected.
    pub async fn reject_by_ap_id(&self, ap_id: &str) -> AppResult<Option<FollowKind>> {
        self.transition(ap_id, FollowState::Rejected).await
    }

    async fn transition(&self, ap_id: &str, state: FollowState) -> AppResult<Option<FollowKind>> {
        let now = chrono::Utc::now().into();

        if let Some(row) = UserFollow::find()
            .filter(user_follow::Column::ApId.eq(ap_id))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            let mut active: user_follow::ActiveModel = row.into();
            active.state = Set(state);
            match state {
                FollowState::Accepted => active.accepted_at = Set(Some(now)),
                FollowState::Rejected => active.rejected_at = Set(Some(now)),
                FollowState::Pending => {}
            }
            active
                .update(self.db.as_ref())
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
            return Ok(Some(FollowKind::User));
        }

        if let Some(row) = BoardFollow::find()
            .filter(board_follow::Column::ApId.eq(ap_id))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            let mut active: board_follow::ActiveModel = row.into();
            active.state = Set(state);
            match state {
                FollowState::Accepted => active.accepted_at = Set(Some(now)),
                FollowState::Rejected => active.rejected_at = Set(Some(now)),
                FollowState::Pending => {}
            }
            active
                .update(self.db.as_ref())
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
            return Ok(Some(FollowKind::Board));
        }

        Ok(None)
    }

    /// Whether a board holds an accepted follow of the given remote actor.
    pub async fn has_accepted_board_follow(
        &self,
        board_id: &str,
        remote_actor_id: &str,
    ) -> AppResult<bool> {
        let found = BoardFollow::find()
            .filter(board_follow::Column::BoardId.eq(board_id))
            .filter(board_follow::Column::RemoteActorId.eq(remote_actor_id))
            .filter(board_follow::Column::State.eq(FollowState::Accepted))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(found.is_some())
    }

    /// Local user IDs with an accepted follow of the given remote actor
    /// (the feed-item fan-out set).
    pub async fn user_ids_following(&self, remote_actor_id: &str) -> AppResult<Vec<String>> {
        UserFollow::find()
            .filter(user_follow::Column::RemoteActorId.eq(remote_actor_id))
            .filter(user_follow::Column::State.eq(FollowState::Accepted))
            .select_only()
            .column(user_follow::Column::UserId)
            .into_tuple::<String>()
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Whether any outbound follow references a remote actor.
    pub async fn exists_for_remote_actor(&self, remote_actor_id: &str) -> AppResult<bool> {
        use sea_orm::PaginatorTrait;

        let users = UserFollow::find()
            .filter(user_follow::Column::RemoteActorId.eq(remote_actor_id))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        if users > 0 {
            return Ok(true);
        }

        let boards = BoardFollow::find()
            .filter(board_follow::Column::RemoteActorId.eq(remote_actor_id))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(boards > 0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn pending_user_follow(ap_id: &str) -> user_follow::Model {
        user_follow::Model {
            id: "uf1".to_string(),
            user_id: "u1".to_string(),
            remote_actor_id: "ra1".to_string(),
            state: FollowState::Pending,
            ap_id: ap_id.to_string(),
            accepted_at: None,
            rejected_at: None,
            created_at: Utc::now().into(),
        }
    }

    #[tokio::test]
    async fn test_accept_matches_user_follow_first() {
        let pending = pending_user_follow("https://l.ex/ap/users/bob#follow-1");
        let mut accepted = pending.clone();
        accepted.state = FollowState::Accepted;

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[pending]])
                .append_query_results([[accepted]])
                .into_connection(),
        );

        let repo = FollowRepository::new(db);
        let kind = repo
            .accept_by_ap_id("https://l.ex/ap/users/bob#follow-1")
            .await
            .unwrap();

        assert_eq!(kind, Some(FollowKind::User));
    }

    #[tokio::test]
    async fn test_accept_unknown_ap_id_is_none() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<user_follow::Model>::new()])
                .append_query_results([Vec::<board_follow::Model>::new()])
                .into_connection(),
        );

        let repo = FollowRepository::new(db);
        let kind = repo.accept_by_ap_id("https://l.ex/unknown").await.unwrap();

        assert_eq!(kind, None);
    }
}
