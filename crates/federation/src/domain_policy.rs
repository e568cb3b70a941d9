//! Cached federation domain allow/blocklist.
//!
//! One process-wide snapshot of `(mode, domain set)` behind an atomic
//! pointer swap. Lookups run on every inbound activity and every outbound
//! delivery, so reads never take a lock; `refresh` re-reads the settings
//! table and swaps the whole record.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use driftwood_db::repositories::{setting_keys, SettingRepository};
use driftwood_common::AppResult;
use tracing::info;

/// Federation policy mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FederationMode {
    /// Every domain is allowed unless listed.
    Blocklist,
    /// Only listed domains are allowed; an empty list blocks everything.
    Allowlist,
}

#[derive(Debug)]
struct PolicyRecord {
    mode: FederationMode,
    domains: HashSet<String>,
}

impl Default for PolicyRecord {
    fn default() -> Self {
        Self {
            mode: FederationMode::Blocklist,
            domains: HashSet::new(),
        }
    }
}

/// Process-wide domain policy cache.
#[derive(Clone)]
pub struct DomainPolicy {
    record: Arc<ArcSwap<PolicyRecord>>,
    settings: SettingRepository,
}

impl DomainPolicy {
    /// Create a policy cache with an empty blocklist; call
    /// [`Self::refresh`] to load the stored settings.
    #[must_use]
    pub fn new(settings: SettingRepository) -> Self {
        Self {
            record: Arc::new(ArcSwap::from_pointee(PolicyRecord::default())),
            settings,
        }
    }

    /// Whether a domain is blocked under the current policy.
    ///
    /// Lock-free; safe to call from any request or worker thread.
    #[must_use]
    pub fn is_blocked(&self, domain: &str) -> bool {
        let domain = domain.to_lowercase();
        let record = self.record.load();
        match record.mode {
            FederationMode::Blocklist => record.domains.contains(&domain),
            FederationMode::Allowlist => {
                record.domains.is_empty() || !record.domains.contains(&domain)
            }
        }
    }

    /// Current mode.
    #[must_use]
    pub fn mode(&self) -> FederationMode {
        self.record.load().mode
    }

    /// URL of the external blocklist audit feed, if the operator set one.
    /// Read-through to settings; shown on the admin surface next to the
    /// per-domain counters.
    pub async fn audit_url(&self) -> AppResult<Option<String>> {
        self.settings.get(setting_keys::BLOCKLIST_AUDIT_URL).await
    }

    /// Re-read the policy from settings and swap the snapshot atomically.
    pub async fn refresh(&self) -> AppResult<()> {
        let mode = match self
            .settings
            .get(setting_keys::FEDERATION_MODE)
            .await?
            .as_deref()
        {
            Some("allowlist") => FederationMode::Allowlist,
            _ => FederationMode::Blocklist,
        };

        let key = match mode {
            FederationMode::Blocklist => setting_keys::DOMAIN_BLOCKLIST,
            FederationMode::Allowlist => setting_keys::DOMAIN_ALLOWLIST,
        };
        let domains = self
            .settings
            .get(key)
            .await?
            .map(|raw| parse_domain_list(&raw))
            .unwrap_or_default();

        info!(?mode, domains = domains.len(), "Domain policy refreshed");
        self.record.store(Arc::new(PolicyRecord { mode, domains }));
        Ok(())
    }

    /// Swap in a policy directly, bypassing settings. Test hook.
    #[doc(hidden)]
    pub fn set_for_test(&self, mode: FederationMode, domains: &[&str]) {
        self.record.store(Arc::new(PolicyRecord {
            mode,
            domains: domains.iter().map(|d| d.to_lowercase()).collect(),
        }));
    }
}

/// Parse a stored domain list: one domain per line, commas tolerated.
fn parse_domain_list(raw: &str) -> HashSet<String> {
    raw.split(|c: char| c == '\n' || c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn policy() -> DomainPolicy {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .into_connection(),
        );
        DomainPolicy::new(SettingRepository::new(db))
    }

    #[test]
    fn test_blocklist_blocks_listed_only() {
        let policy = policy();
        policy.set_for_test(FederationMode::Blocklist, &["bad.example"]);

        assert!(policy.is_blocked("bad.example"));
        assert!(policy.is_blocked("BAD.EXAMPLE"));
        assert!(!policy.is_blocked("good.example"));
    }

    #[test]
    fn test_allowlist_blocks_unlisted() {
        let policy = policy();
        policy.set_for_test(FederationMode::Allowlist, &["friend.example"]);

        assert!(!policy.is_blocked("friend.example"));
        assert!(policy.is_blocked("stranger.example"));
    }

    #[test]
    fn test_empty_allowlist_blocks_everything() {
        let policy = policy();
        policy.set_for_test(FederationMode::Allowlist, &[]);

        assert!(policy.is_blocked("anything.example"));
    }

    #[test]
    fn test_default_is_open_blocklist() {
        let policy = policy();
        assert!(!policy.is_blocked("anything.example"));
    }

    #[test]
    fn test_parse_domain_list() {
        let parsed = parse_domain_list("Bad.Example\nworse.example, spam.example\n\n");
        assert_eq!(parsed.len(), 3);
        assert!(parsed.contains("bad.example"));
        assert!(parsed.contains("worse.example"));
        assert!(parsed.contains("spam.example"));
    }
}
