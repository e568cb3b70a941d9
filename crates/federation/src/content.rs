//! Collaborator seam to the local content and social graph.
//!
//! The federation core never touches the host's domain tables directly;
//! every side effect the inbox dispatcher produces goes through this
//! trait. Implementations condition writes on the object's unique AP id
//! and report a duplicate as [`WriteOutcome::AlreadyExists`], which the
//! dispatcher treats as success.

#![allow(missing_docs)]

use async_trait::async_trait;
use driftwood_common::AppResult;
pub use driftwood_db::repositories::WriteOutcome;

/// A local article or comment an inbound reply can attach to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentRef {
    /// A local article.
    Article { id: String, uri: String },
    /// A local comment, threading under its article.
    Comment {
        id: String,
        article_id: String,
        uri: String,
    },
}

/// How a board treats articles from remote actors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardAcceptPolicy {
    /// Any authenticated remote author.
    Anyone,
    /// Only actors with an accepted board follow.
    FollowersOnly,
}

/// A local board as the dispatcher sees it.
#[derive(Debug, Clone)]
pub struct BoardInfo {
    pub id: String,
    pub uri: String,
    pub accept_policy: BoardAcceptPolicy,
    /// Whether guests can view the board (public visibility).
    pub public: bool,
}

/// A sanitized remote comment ready for storage.
#[derive(Debug, Clone)]
pub struct NewRemoteComment {
    pub ap_id: String,
    pub remote_actor_id: String,
    pub article_id: String,
    /// Present when the reply threads under an existing comment.
    pub parent_comment_id: Option<String>,
    pub body_html: String,
}

/// A sanitized remote article ready for storage or cross-post linking.
#[derive(Debug, Clone)]
pub struct NewRemoteArticle {
    pub ap_id: String,
    pub remote_actor_id: String,
    pub board_id: String,
    pub title: String,
    pub body_html: String,
}

/// A direct message from a remote actor to a local user.
#[derive(Debug, Clone)]
pub struct NewDm {
    pub ap_id: String,
    pub remote_actor_id: String,
    pub recipient_user_id: String,
    pub body_html: String,
}

/// A feed entry shown to local users who follow the sender.
#[derive(Debug, Clone)]
pub struct NewFeedItem {
    pub ap_id: String,
    pub remote_actor_id: String,
    pub title: Option<String>,
    pub body_html: String,
}

/// Content and social-graph operations the inbox dispatcher relies on.
#[async_trait]
pub trait ContentApi: Send + Sync {
    /// Whether a URI names a followable local actor (user, board or site).
    async fn local_actor_exists(&self, actor_uri: &str) -> AppResult<bool>;

    /// Find a local article or comment by URI, for reply threading.
    async fn find_parent_by_uri(&self, uri: &str) -> AppResult<Option<ParentRef>>;

    /// Store a remote comment.
    async fn create_remote_comment(&self, comment: NewRemoteComment) -> AppResult<WriteOutcome>;

    /// Resolve a local user id from an actor URI.
    async fn resolve_local_user(&self, actor_uri: &str) -> AppResult<Option<String>>;

    /// Whether the user accepts DMs from this remote actor.
    async fn dm_allowed(&self, user_id: &str, remote_actor_id: &str) -> AppResult<bool>;

    /// Store a direct message.
    async fn create_dm(&self, dm: NewDm) -> AppResult<WriteOutcome>;

    /// Store a feed item for one local follower of the sender.
    async fn create_feed_item(&self, user_id: &str, item: &NewFeedItem) -> AppResult<WriteOutcome>;

    /// Resolve a board from a candidate URI, if one exists.
    async fn resolve_board(&self, uri: &str) -> AppResult<Option<BoardInfo>>;

    /// Store a remote article, or link it as a cross-post when the same
    /// AP id already exists under another board.
    async fn create_or_link_article(&self, article: NewRemoteArticle) -> AppResult<WriteOutcome>;

    /// Find a local article id by its URI.
    async fn find_article_by_uri(&self, uri: &str) -> AppResult<Option<String>>;

    /// Store an article like keyed by the activity AP id.
    async fn create_article_like(
        &self,
        ap_id: &str,
        article_id: &str,
        remote_actor_id: &str,
    ) -> AppResult<WriteOutcome>;

    /// Delete a like by AP id if the actor owns it; false when nothing
    /// matched.
    async fn delete_article_like(&self, ap_id: &str, remote_actor_id: &str) -> AppResult<bool>;

    /// Store an announce (boost) keyed by the activity AP id.
    async fn create_announce(
        &self,
        ap_id: &str,
        object_uri: &str,
        remote_actor_id: &str,
    ) -> AppResult<WriteOutcome>;

    /// Delete an announce by AP id if the actor owns it.
    async fn delete_announce(&self, ap_id: &str, remote_actor_id: &str) -> AppResult<bool>;

    /// Update remote content (article, page or comment) by AP id, only
    /// when the actor owns it. Returns whether anything changed.
    async fn update_remote_content(
        &self,
        ap_id: &str,
        remote_actor_id: &str,
        title: Option<String>,
        body_html: String,
    ) -> AppResult<bool>;

    /// Soft-delete one object by AP id, authorized by ownership.
    async fn soft_delete_by_ap_id(&self, ap_id: &str, remote_actor_id: &str) -> AppResult<bool>;

    /// Soft-delete everything a remote actor authored (actor deletion).
    async fn soft_delete_all_for_actor(&self, remote_actor_id: &str) -> AppResult<u64>;

    /// File a moderation report.
    async fn create_report(
        &self,
        remote_actor_id: &str,
        content: &str,
        object_uris: &[String],
    ) -> AppResult<WriteOutcome>;

    /// Whether any article, comment, like, announce or report references
    /// the remote actor (stale-cleanup reference check).
    async fn references_remote_actor(&self, remote_actor_id: &str) -> AppResult<bool>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod test_support {
    //! In-memory [`ContentApi`] used by the dispatcher tests.

    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct MemoryContent {
        pub local_actors: Mutex<HashSet<String>>,
        pub parents: Mutex<HashMap<String, ParentRef>>,
        pub comments: Mutex<HashMap<String, NewRemoteComment>>,
        pub local_users: Mutex<HashMap<String, String>>,
        pub dm_blocked_users: Mutex<HashSet<String>>,
        pub dms: Mutex<HashMap<String, NewDm>>,
        pub feed_items: Mutex<Vec<(String, NewFeedItem)>>,
        pub boards: Mutex<HashMap<String, BoardInfo>>,
        pub board_articles: Mutex<HashMap<String, NewRemoteArticle>>,
        pub articles_by_uri: Mutex<HashMap<String, String>>,
        pub likes: Mutex<HashMap<String, (String, String)>>,
        pub announces: Mutex<HashMap<String, (String, String)>>,
        pub updated: Mutex<Vec<String>>,
        pub deleted: Mutex<Vec<String>>,
        pub actor_wipes: Mutex<Vec<String>>,
        pub reports: Mutex<Vec<(String, String, Vec<String>)>>,
        pub referenced_actors: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl ContentApi for MemoryContent {
        async fn local_actor_exists(&self, actor_uri: &str) -> AppResult<bool> {
            Ok(self.local_actors.lock().unwrap().contains(actor_uri))
        }

        async fn find_parent_by_uri(&self, uri: &str) -> AppResult<Option<ParentRef>> {
            Ok(self.parents.lock().unwrap().get(uri).cloned())
        }

        async fn create_remote_comment(
            &self,
            comment: NewRemoteComment,
        ) -> AppResult<WriteOutcome> {
            let mut comments = self.comments.lock().unwrap();
            if comments.contains_key(&comment.ap_id) {
                return Ok(WriteOutcome::AlreadyExists);
            }
            comments.insert(comment.ap_id.clone(), comment);
            Ok(WriteOutcome::Created)
        }

        async fn resolve_local_user(&self, actor_uri: &str) -> AppResult<Option<String>> {
            Ok(self.local_users.lock().unwrap().get(actor_uri).cloned())
        }

        async fn dm_allowed(&self, user_id: &str, _remote_actor_id: &str) -> AppResult<bool> {
            Ok(!self.dm_blocked_users.lock().unwrap().contains(user_id))
        }

        async fn create_dm(&self, dm: NewDm) -> AppResult<WriteOutcome> {
            let mut dms = self.dms.lock().unwrap();
            if dms.contains_key(&dm.ap_id) {
                return Ok(WriteOutcome::AlreadyExists);
            }
            dms.insert(dm.ap_id.clone(), dm);
            Ok(WriteOutcome::Created)
        }

        async fn create_feed_item(
            &self,
            user_id: &str,
            item: &NewFeedItem,
        ) -> AppResult<WriteOutcome> {
            let mut items = self.feed_items.lock().unwrap();
            if items
                .iter()
                .any(|(uid, existing)| uid == user_id && existing.ap_id == item.ap_id)
            {
                return Ok(WriteOutcome::AlreadyExists);
            }
            items.push((user_id.to_string(), item.clone()));
            Ok(WriteOutcome::Created)
        }

        async fn resolve_board(&self, uri: &str) -> AppResult<Option<BoardInfo>> {
            Ok(self.boards.lock().unwrap().get(uri).cloned())
        }

        async fn create_or_link_article(
            &self,
            article: NewRemoteArticle,
        ) -> AppResult<WriteOutcome> {
            let mut articles = self.board_articles.lock().unwrap();
            if articles.contains_key(&article.ap_id) {
                return Ok(WriteOutcome::AlreadyExists);
            }
            articles.insert(article.ap_id.clone(), article);
            Ok(WriteOutcome::Created)
        }

        async fn find_article_by_uri(&self, uri: &str) -> AppResult<Option<String>> {
            Ok(self.articles_by_uri.lock().unwrap().get(uri).cloned())
        }

        async fn create_article_like(
            &self,
            ap_id: &str,
            article_id: &str,
            remote_actor_id: &str,
        ) -> AppResult<WriteOutcome> {
            let mut likes = self.likes.lock().unwrap();
            if likes.contains_key(ap_id) {
                return Ok(WriteOutcome::AlreadyExists);
            }
            likes.insert(
                ap_id.to_string(),
                (article_id.to_string(), remote_actor_id.to_string()),
            );
            Ok(WriteOutcome::Created)
        }

        async fn delete_article_like(
            &self,
            ap_id: &str,
            remote_actor_id: &str,
        ) -> AppResult<bool> {
            let mut likes = self.likes.lock().unwrap();
            match likes.get(ap_id) {
                Some((_, owner)) if owner == remote_actor_id => {
                    likes.remove(ap_id);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn create_announce(
            &self,
            ap_id: &str,
            object_uri: &str,
            remote_actor_id: &str,
        ) -> AppResult<WriteOutcome> {
            let mut announces = self.announces.lock().unwrap();
            if announces.contains_key(ap_id) {
                return Ok(WriteOutcome::AlreadyExists);
            }
            announces.insert(
                ap_id.to_string(),
                (object_uri.to_string(), remote_actor_id.to_string()),
            );
            Ok(WriteOutcome::Created)
        }

        async fn delete_announce(&self, ap_id: &str, remote_actor_id: &str) -> AppResult<bool> {
            let mut announces = self.announces.lock().unwrap();
            match announces.get(ap_id) {
                Some((_, owner)) if owner == remote_actor_id => {
                    announces.remove(ap_id);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn update_remote_content(
            &self,
            ap_id: &str,
            _remote_actor_id: &str,
            _title: Option<String>,
            _body_html: String,
        ) -> AppResult<bool> {
            self.updated.lock().unwrap().push(ap_id.to_string());
            Ok(true)
        }

        async fn soft_delete_by_ap_id(
            &self,
            ap_id: &str,
            _remote_actor_id: &str,
        ) -> AppResult<bool> {
            self.deleted.lock().unwrap().push(ap_id.to_string());
            Ok(true)
        }

        async fn soft_delete_all_for_actor(&self, remote_actor_id: &str) -> AppResult<u64> {
            self.actor_wipes.lock().unwrap().push(remote_actor_id.to_string());
            Ok(1)
        }

        async fn create_report(
            &self,
            remote_actor_id: &str,
            content: &str,
            object_uris: &[String],
        ) -> AppResult<WriteOutcome> {
            self.reports.lock().unwrap().push((
                remote_actor_id.to_string(),
                content.to_string(),
                object_uris.to_vec(),
            ));
            Ok(WriteOutcome::Created)
        }

        async fn references_remote_actor(&self, remote_actor_id: &str) -> AppResult<bool> {
            Ok(self
                .referenced_actors
                .lock()
                .unwrap()
                .contains(remote_actor_id))
        }
    }
}
