//! Stale remote actor cleanup.
//!
//! Actors nobody references anymore are deleted once their profile is
//! older than the configured max age; referenced ones get a refresh
//! instead. Runs as a periodic pass from the federation supervisor.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use driftwood_common::AppResult;
use driftwood_db::repositories::{FollowRepository, FollowerRepository, RemoteActorRepository};
use tracing::{info, warn};

use crate::content::ContentApi;
use crate::resolver::ActorResolver;

/// Actors examined per batch.
const BATCH_SIZE: u64 = 50;

/// Result of one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub refreshed: usize,
    pub deleted: usize,
    pub errors: usize,
}

/// Periodic remote-actor cleanup.
#[derive(Clone)]
pub struct StaleCleaner {
    remote_actors: RemoteActorRepository,
    followers: FollowerRepository,
    follows: FollowRepository,
    content: Arc<dyn ContentApi>,
    resolver: ActorResolver,
    max_age_secs: i64,
}

impl StaleCleaner {
    /// Create a cleaner.
    #[must_use]
    pub fn new(
        remote_actors: RemoteActorRepository,
        followers: FollowerRepository,
        follows: FollowRepository,
        content: Arc<dyn ContentApi>,
        resolver: ActorResolver,
        max_age_secs: i64,
    ) -> Self {
        Self {
            remote_actors,
            followers,
            follows,
            content,
            resolver,
            max_age_secs,
        }
    }

    /// Run one cleanup pass over all stale actors, in batches.
    pub async fn run_pass(&self) -> AppResult<CleanupReport> {
        let cutoff = Utc::now() - Duration::seconds(self.max_age_secs);
        let mut report = CleanupReport::default();
        // Refresh errors leave fetched_at untouched, so remember which
        // rows this pass has already seen to avoid reselecting them.
        let mut seen: HashSet<String> = HashSet::new();

        loop {
            let batch = self.remote_actors.find_stale(cutoff, BATCH_SIZE).await?;
            let fresh: Vec<_> = batch
                .into_iter()
                .filter(|actor| seen.insert(actor.id.clone()))
                .collect();
            if fresh.is_empty() {
                break;
            }

            for actor in fresh {
                if self.is_referenced(&actor.id).await? {
                    match self.resolver.refresh(&actor.ap_id).await {
                        Ok(_) => report.refreshed += 1,
                        Err(e) => {
                            warn!(ap_id = %actor.ap_id, error = %e, "Stale actor refresh failed, skipping");
                            report.errors += 1;
                        }
                    }
                } else {
                    self.remote_actors.delete(&actor.id).await?;
                    report.deleted += 1;
                }
            }
        }

        info!(
            refreshed = report.refreshed,
            deleted = report.deleted,
            errors = report.errors,
            "Stale actor cleanup pass finished"
        );
        Ok(report)
    }

    /// Whether anything local still points at this actor: a follower
    /// edge, an outbound follow, or content (articles, comments, likes,
    /// announces, reports).
    async fn is_referenced(&self, remote_actor_id: &str) -> AppResult<bool> {
        if self.followers.exists_for_remote_actor(remote_actor_id).await? {
            return Ok(true);
        }
        if self.follows.exists_for_remote_actor(remote_actor_id).await? {
            return Ok(true);
        }
        self.content.references_remote_actor(remote_actor_id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::content::test_support::MemoryContent;
    use crate::domain_policy::DomainPolicy;
    use crate::keystore::tests::MemoryKeyBackend;
    use crate::keystore::KeyStore;
    use crate::safe_http::tests::StubTransport;
    use crate::safe_http::SafeHttpClient;
    use driftwood_common::{config::FederationConfig, KeyVault};
    use driftwood_db::entities::remote_actor;
    use driftwood_db::repositories::SettingRepository;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use std::collections::BTreeMap;
    use url::Url;

    fn stale_actor() -> remote_actor::Model {
        remote_actor::Model {
            id: "ra-old".to_string(),
            ap_id: "https://gone.ex/u/ghost".to_string(),
            username: "ghost".to_string(),
            domain: "gone.ex".to_string(),
            display_name: None,
            avatar_url: None,
            summary: None,
            public_key_pem: "pem".to_string(),
            inbox: "https://gone.ex/u/ghost/inbox".to_string(),
            shared_inbox: None,
            actor_type: "Person".to_string(),
            fetched_at: (Utc::now() - Duration::days(90)).into(),
            created_at: (Utc::now() - Duration::days(120)).into(),
        }
    }

    fn count_row(n: i64) -> BTreeMap<&'static str, sea_orm::Value> {
        let mut map = BTreeMap::new();
        map.insert("num_items", sea_orm::Value::BigInt(Some(n)));
        map
    }

    #[tokio::test]
    async fn test_unreferenced_stale_actor_deleted() {
        // Stale batch with one actor, then the empty follow-up batch.
        let actor_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[stale_actor()]])
                .append_query_results([Vec::<remote_actor::Model>::new()])
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .into_connection(),
        );
        let follower_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[count_row(0)]])
                .into_connection(),
        );
        let follow_db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[count_row(0)]])
                .append_query_results([[count_row(0)]])
                .into_connection(),
        );
        let setting_db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());

        let config = FederationConfig::default();
        let base = Url::parse("https://l.ex").unwrap();
        let http = SafeHttpClient::with_transport(
            &config,
            "driftwood-test".to_string(),
            Arc::new(StubTransport::new(vec![])),
        );
        let keystore = KeyStore::new(
            KeyVault::new("test master secret"),
            Arc::new(MemoryKeyBackend::default()),
            SettingRepository::new(setting_db.clone()),
            base.clone(),
        );
        let policy = DomainPolicy::new(SettingRepository::new(setting_db));
        let remote_actors = RemoteActorRepository::new(actor_db.clone());
        let resolver = ActorResolver::new(
            RemoteActorRepository::new(actor_db),
            http,
            keystore,
            policy,
            base,
            config.actor_cache_ttl_secs,
        );

        let cleaner = StaleCleaner::new(
            remote_actors,
            FollowerRepository::new(follower_db),
            FollowRepository::new(follow_db),
            Arc::new(MemoryContent::default()),
            resolver,
            config.stale_actor_max_age_secs,
        );

        let report = cleaner.run_pass().await.unwrap();

        assert_eq!(
            report,
            CleanupReport {
                refreshed: 0,
                deleted: 1,
                errors: 0,
            }
        );
    }
}
