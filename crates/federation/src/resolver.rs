//! Remote actor resolution and caching.
//!
//! The `remote_actors` row is the cache: a resolve within the TTL is a
//! single select, anything older refetches the actor document. All of the
//! core goes through this resolver, signature verification included, so
//! SSRF policy and domain blocks apply to every actor fetch.

use chrono::Utc;
use driftwood_common::{AppError, IdGenerator};
use driftwood_db::entities::remote_actor;
use driftwood_db::repositories::RemoteActorRepository;
use sea_orm::Set;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::domain_policy::DomainPolicy;
use crate::keystore::KeyStore;
use crate::safe_http::{SafeHttpClient, SafeHttpError};
use crate::sanitize::{sanitize_display_name, sanitize_html};

/// Actor types this instance accepts.
const KNOWN_ACTOR_TYPES: &[&str] = &["Person", "Group", "Organization", "Application", "Service"];

/// Actor resolution failure.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("invalid_actor_url: {0}")]
    InvalidActorUrl(String),
    #[error("self_referencing: refusing to fetch a local actor")]
    SelfReferencing,
    #[error("domain_blocked: {0}")]
    DomainBlocked(String),
    #[error("no_site_key: authorized fetch requires the site keypair")]
    NoSiteKey,
    #[error("missing_public_key")]
    MissingPublicKey,
    #[error("missing_{0}")]
    MissingField(&'static str),
    #[error("unsupported actor type: {0}")]
    UnsupportedActorType(String),
    #[error("actor fetch returned HTTP {0}")]
    HttpStatus(u16),
    #[error("actor document is not valid JSON: {0}")]
    InvalidJson(String),
    #[error(transparent)]
    Http(#[from] SafeHttpError),
    #[error(transparent)]
    App(#[from] AppError),
}

/// Fetches and caches remote actor profiles.
#[derive(Clone)]
pub struct ActorResolver {
    repo: RemoteActorRepository,
    http: SafeHttpClient,
    keystore: KeyStore,
    policy: DomainPolicy,
    base_url: Url,
    cache_ttl_secs: i64,
    id_gen: IdGenerator,
}

impl ActorResolver {
    /// Create a resolver.
    #[must_use]
    pub fn new(
        repo: RemoteActorRepository,
        http: SafeHttpClient,
        keystore: KeyStore,
        policy: DomainPolicy,
        base_url: Url,
        cache_ttl_secs: i64,
    ) -> Self {
        Self {
            repo,
            http,
            keystore,
            policy,
            base_url,
            cache_ttl_secs,
            id_gen: IdGenerator::new(),
        }
    }

    /// Resolve an actor, returning the cached row while it is fresh.
    pub async fn resolve(&self, ap_id: &str) -> Result<remote_actor::Model, ResolveError> {
        let cached = self.repo.find_by_ap_id(ap_id).await?;

        if let Some(ref actor) = cached {
            let age = Utc::now()
                .signed_duration_since(actor.fetched_at)
                .num_seconds();
            if age <= self.cache_ttl_secs {
                debug!(ap_id, age, "Remote actor cache hit");
                return Ok(actor.clone());
            }
        }

        self.fetch_and_upsert(ap_id, cached).await
    }

    /// Resolve the actor owning a signature key id (fragment stripped).
    pub async fn resolve_by_key_id(
        &self,
        key_id: &str,
    ) -> Result<remote_actor::Model, ResolveError> {
        let mut url = Url::parse(key_id)
            .map_err(|_| ResolveError::InvalidActorUrl(key_id.to_string()))?;
        url.set_fragment(None);
        self.resolve(url.as_str()).await
    }

    /// Force a refetch regardless of cache freshness.
    pub async fn refresh(&self, ap_id: &str) -> Result<remote_actor::Model, ResolveError> {
        let cached = self.repo.find_by_ap_id(ap_id).await?;
        self.fetch_and_upsert(ap_id, cached).await
    }

    async fn fetch_and_upsert(
        &self,
        ap_id: &str,
        cached: Option<remote_actor::Model>,
    ) -> Result<remote_actor::Model, ResolveError> {
        let url =
            Url::parse(ap_id).map_err(|_| ResolveError::InvalidActorUrl(ap_id.to_string()))?;
        let domain = url
            .host_str()
            .ok_or_else(|| ResolveError::InvalidActorUrl(ap_id.to_string()))?
            .to_string();

        if url.host_str() == self.base_url.host_str() {
            return Err(ResolveError::SelfReferencing);
        }
        if self.policy.is_blocked(&domain) {
            return Err(ResolveError::DomainBlocked(domain));
        }

        info!(ap_id, "Fetching remote actor");
        let document = self.fetch_document(&url).await?;
        let actor = self.upsert(&domain, &document, cached).await?;
        Ok(actor)
    }

    /// Unsigned GET first; a 401 triggers one signed retry with the site
    /// key (the authorized-fetch protocol).
    async fn fetch_document(&self, url: &Url) -> Result<Value, ResolveError> {
        let response = self.http.get(url).await?;

        let response = if response.status == 401 {
            debug!(%url, "Actor fetch got 401, retrying with signed GET");
            let signer = self
                .keystore
                .site_signer()
                .await?
                .ok_or(ResolveError::NoSiteKey)?;
            self.http.signed_get(url, &signer).await?
        } else {
            response
        };

        if !response.is_success() {
            return Err(ResolveError::HttpStatus(response.status));
        }

        serde_json::from_slice(&response.body)
            .map_err(|e| ResolveError::InvalidJson(e.to_string()))
    }

    async fn upsert(
        &self,
        domain: &str,
        document: &Value,
        cached: Option<remote_actor::Model>,
    ) -> Result<remote_actor::Model, ResolveError> {
        let doc_id = document
            .get("id")
            .and_then(Value::as_str)
            .ok_or(ResolveError::MissingField("id"))?;

        let actor_type = document
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ResolveError::MissingField("type"))?;
        if !KNOWN_ACTOR_TYPES.contains(&actor_type) {
            return Err(ResolveError::UnsupportedActorType(actor_type.to_string()));
        }

        let username = document
            .get("preferredUsername")
            .and_then(Value::as_str)
            .ok_or(ResolveError::MissingField("preferredUsername"))?;

        let inbox = document
            .get("inbox")
            .and_then(Value::as_str)
            .ok_or(ResolveError::MissingField("inbox"))?;

        let public_key_pem = document
            .get("publicKey")
            .and_then(|pk| pk.get("publicKeyPem"))
            .and_then(Value::as_str)
            .ok_or(ResolveError::MissingPublicKey)?;

        let shared_inbox = document
            .get("endpoints")
            .and_then(|e| e.get("sharedInbox"))
            .and_then(Value::as_str)
            .or_else(|| document.get("sharedInbox").and_then(Value::as_str))
            .map(String::from);

        let display_name = document
            .get("name")
            .and_then(Value::as_str)
            .map(sanitize_display_name)
            .filter(|name| !name.is_empty());

        let summary = document
            .get("summary")
            .and_then(Value::as_str)
            .map(sanitize_html);

        let avatar_url = document
            .get("icon")
            .and_then(|icon| {
                if icon.is_object() {
                    icon.get("url").and_then(Value::as_str)
                } else {
                    icon.as_str()
                }
            })
            .map(String::from);

        let now = Utc::now().into();

        // Prefer the row already known by ap_id, then the one holding the
        // same (username, domain); otherwise this is a new actor.
        let existing = match cached {
            Some(actor) => Some(actor),
            None => self.repo.find_by_username_domain(username, domain).await?,
        };

        let actor = if let Some(existing) = existing {
            let mut active: remote_actor::ActiveModel = existing.into();
            active.ap_id = Set(doc_id.to_string());
            active.username = Set(username.to_string());
            active.domain = Set(domain.to_string());
            active.display_name = Set(display_name);
            active.avatar_url = Set(avatar_url);
            active.summary = Set(summary);
            active.public_key_pem = Set(public_key_pem.to_string());
            active.inbox = Set(inbox.to_string());
            active.shared_inbox = Set(shared_inbox);
            active.actor_type = Set(actor_type.to_string());
            active.fetched_at = Set(now);
            self.repo.update(active).await?
        } else {
            let model = remote_actor::ActiveModel {
                id: Set(self.id_gen.generate()),
                ap_id: Set(doc_id.to_string()),
                username: Set(username.to_string()),
                domain: Set(domain.to_string()),
                display_name: Set(display_name),
                avatar_url: Set(avatar_url),
                summary: Set(summary),
                public_key_pem: Set(public_key_pem.to_string()),
                inbox: Set(inbox.to_string()),
                shared_inbox: Set(shared_inbox),
                actor_type: Set(actor_type.to_string()),
                fetched_at: Set(now),
                created_at: Set(now),
            };
            self.repo.create(model).await?
        };

        info!(
            ap_id = %actor.ap_id,
            username = %actor.username,
            domain = %actor.domain,
            "Upserted remote actor"
        );
        Ok(actor)
    }
}

impl ResolveError {
    /// Log this error at the warning level with context, then return it.
    #[must_use]
    pub fn warned(self, ap_id: &str) -> Self {
        warn!(ap_id, error = %self, "Actor resolution failed");
        self
    }
}

impl From<ResolveError> for AppError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::App(inner) => inner,
            other => Self::Federation(other.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain_policy::FederationMode;
    use crate::keystore::tests::MemoryKeyBackend;
    use crate::safe_http::tests::{response, StubTransport};
    use driftwood_common::config::FederationConfig;
    use driftwood_common::KeyVault;
    use driftwood_db::entities::setting;
    use driftwood_db::repositories::SettingRepository;
    use sea_orm::{DatabaseBackend, MockDatabase};
    use std::sync::Arc;

    fn actor_doc() -> String {
        serde_json::json!({
            "id": "https://r.ex/u/alice",
            "type": "Person",
            "preferredUsername": "alice",
            "name": "Alice <script>x</script>",
            "inbox": "https://r.ex/u/alice/inbox",
            "endpoints": {"sharedInbox": "https://r.ex/inbox"},
            "publicKey": {
                "id": "https://r.ex/u/alice#main-key",
                "publicKeyPem": "-----BEGIN PUBLIC KEY-----\nMIIB\n-----END PUBLIC KEY-----"
            }
        })
        .to_string()
    }

    fn cached_actor(fetched_secs_ago: i64) -> remote_actor::Model {
        remote_actor::Model {
            id: "ra1".to_string(),
            ap_id: "https://r.ex/u/alice".to_string(),
            username: "alice".to_string(),
            domain: "r.ex".to_string(),
            display_name: Some("Alice".to_string()),
            avatar_url: None,
            summary: None,
            public_key_pem: "pem".to_string(),
            inbox: "https://r.ex/u/alice/inbox".to_string(),
            shared_inbox: Some("https://r.ex/inbox".to_string()),
            actor_type: "Person".to_string(),
            fetched_at: (Utc::now() - chrono::Duration::seconds(fetched_secs_ago)).into(),
            created_at: Utc::now().into(),
        }
    }

    struct Fixture {
        resolver: ActorResolver,
        transport: Arc<StubTransport>,
        policy: DomainPolicy,
    }

    fn fixture(
        actor_queries: Vec<Vec<remote_actor::Model>>,
        setting_rows: Vec<Vec<setting::Model>>,
        responses: Vec<crate::safe_http::SafeResponse>,
    ) -> Fixture {
        let mut actor_db = MockDatabase::new(DatabaseBackend::Postgres);
        for rows in actor_queries {
            actor_db = actor_db.append_query_results([rows]);
        }
        let actor_db = Arc::new(actor_db.into_connection());

        let mut setting_db = MockDatabase::new(DatabaseBackend::Postgres);
        for rows in setting_rows {
            setting_db = setting_db.append_query_results([rows]);
        }
        let setting_db = Arc::new(setting_db.into_connection());

        let config = FederationConfig::default();
        let transport = Arc::new(StubTransport::new(responses));
        let http = SafeHttpClient::with_transport(
            &config,
            "driftwood-test".to_string(),
            transport.clone(),
        );
        let base = Url::parse("https://l.ex").unwrap();
        let settings = SettingRepository::new(setting_db.clone());
        let keystore = KeyStore::new(
            KeyVault::new("test master secret"),
            Arc::new(MemoryKeyBackend::default()),
            settings,
            base.clone(),
        );
        let policy = DomainPolicy::new(SettingRepository::new(setting_db));

        Fixture {
            resolver: ActorResolver::new(
                RemoteActorRepository::new(actor_db),
                http,
                keystore,
                policy.clone(),
                base,
                config.actor_cache_ttl_secs,
            ),
            transport,
            policy,
        }
    }

    #[tokio::test]
    async fn test_fresh_cache_hit_skips_fetch() {
        let f = fixture(vec![vec![cached_actor(60)]], vec![], vec![]);

        let actor = f.resolver.resolve("https://r.ex/u/alice").await.unwrap();

        assert_eq!(actor.username, "alice");
        assert_eq!(f.transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_cache_refetches_and_updates() {
        let updated = cached_actor(0);
        let f = fixture(
            // stale cached row, then the UPDATE .. RETURNING row
            vec![vec![cached_actor(100_000)], vec![updated]],
            vec![],
            vec![response(200, &actor_doc())],
        );

        let actor = f.resolver.resolve("https://r.ex/u/alice").await.unwrap();

        assert_eq!(actor.username, "alice");
        assert_eq!(f.transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_key_id_fragment_stripped() {
        let f = fixture(vec![vec![cached_actor(60)]], vec![], vec![]);

        let actor = f
            .resolver
            .resolve_by_key_id("https://r.ex/u/alice#main-key")
            .await
            .unwrap();

        assert_eq!(actor.ap_id, "https://r.ex/u/alice");
    }

    #[tokio::test]
    async fn test_local_actor_rejected() {
        let f = fixture(vec![vec![]], vec![], vec![]);

        let err = f
            .resolver
            .resolve("https://l.ex/ap/users/bob")
            .await
            .unwrap_err();

        assert!(matches!(err, ResolveError::SelfReferencing));
    }

    #[tokio::test]
    async fn test_blocked_domain_rejected() {
        let f = fixture(vec![vec![]], vec![], vec![]);
        f.policy.set_for_test(FederationMode::Blocklist, &["r.ex"]);

        let err = f.resolver.resolve("https://r.ex/u/alice").await.unwrap_err();

        assert!(matches!(err, ResolveError::DomainBlocked(_)));
    }

    #[tokio::test]
    async fn test_authorized_fetch_fallback_without_site_key() {
        let f = fixture(
            vec![vec![]],
            // site public key lookup comes back empty
            vec![vec![]],
            vec![response(401, "")],
        );

        let err = f.resolver.resolve("https://r.ex/u/alice").await.unwrap_err();

        assert!(matches!(err, ResolveError::NoSiteKey));
    }

    #[tokio::test]
    async fn test_authorized_fetch_fallback_with_site_key() {
        // Seed a real site keypair through the vault so the signer works.
        let vault = KeyVault::new("test master secret");
        let keypair = driftwood_common::generate_rsa_keypair().unwrap();
        let encrypted = vault.encrypt(keypair.private_key_pem.as_bytes()).unwrap();
        let encoded =
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, encrypted);

        let now = Utc::now().into();
        let public_row = setting::Model {
            key: "ap_site_public_key".to_string(),
            value: keypair.public_key_pem.clone(),
            updated_at: now,
        };
        let private_row = setting::Model {
            key: "ap_site_private_key_encrypted".to_string(),
            value: encoded,
            updated_at: now,
        };

        let created = cached_actor(0);
        let f = fixture(
            // find_by_ap_id empty, find_by_username_domain empty, INSERT row
            vec![vec![], vec![], vec![created]],
            vec![vec![public_row], vec![private_row]],
            vec![response(401, ""), response(200, &actor_doc())],
        );

        let actor = f.resolver.resolve("https://r.ex/u/alice").await.unwrap();

        assert_eq!(actor.username, "alice");
        assert_eq!(f.transport.request_count(), 2);

        // The retry carried signature headers
        let requests = f.transport.requests.lock().unwrap();
        let names: Vec<&str> = requests[1].headers.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"signature"));
        assert!(names.contains(&"date"));
    }

    #[tokio::test]
    async fn test_missing_public_key_rejected() {
        let doc = serde_json::json!({
            "id": "https://r.ex/u/alice",
            "type": "Person",
            "preferredUsername": "alice",
            "inbox": "https://r.ex/u/alice/inbox",
        })
        .to_string();

        let f = fixture(vec![vec![]], vec![], vec![response(200, &doc)]);

        let err = f.resolver.resolve("https://r.ex/u/alice").await.unwrap_err();
        assert!(matches!(err, ResolveError::MissingPublicKey));
    }

    #[tokio::test]
    async fn test_http_error_propagated() {
        let f = fixture(vec![vec![]], vec![], vec![response(500, "boom")]);

        let err = f.resolver.resolve("https://r.ex/u/alice").await.unwrap_err();
        assert!(matches!(err, ResolveError::HttpStatus(500)));
    }
}
