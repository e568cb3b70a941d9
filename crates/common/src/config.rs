//! Application configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Instance identity.
    pub instance: InstanceConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Federation configuration.
    #[serde(default)]
    pub federation: FederationConfig,
}

/// Instance identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceConfig {
    /// Public base URL of this instance, e.g. `https://example.com`.
    pub url: String,
    /// Master secret used to derive the key-encryption key.
    pub master_secret: String,
}

impl InstanceConfig {
    /// User-Agent string sent on all outbound federation requests.
    #[must_use]
    pub fn user_agent(&self) -> String {
        format!("driftwood/{} (+{})", env!("CARGO_PKG_VERSION"), self.url)
    }
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Federation configuration.
///
/// Built once at startup and handed by the supervisor to every component;
/// no component reads ambient environment after construction.
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Whether federation is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// How long a cached remote actor stays fresh, in seconds.
    #[serde(default = "default_actor_cache_ttl")]
    pub actor_cache_ttl_secs: i64,
    /// Outbound HTTP connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub http_connect_timeout_ms: u64,
    /// Outbound HTTP receive timeout in milliseconds.
    #[serde(default = "default_receive_timeout")]
    pub http_receive_timeout_ms: u64,
    /// Maximum inbound activity payload size in bytes (checked before parsing).
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,
    /// Maximum sanitized content body size in bytes.
    #[serde(default = "default_max_content_size")]
    pub max_content_size: usize,
    /// Maximum outbound HTTP response body size in bytes.
    #[serde(default = "default_max_payload_size")]
    pub max_response_size: usize,
    /// Maximum accepted clock skew for signature Date headers, in seconds.
    #[serde(default = "default_signature_max_age")]
    pub signature_max_age_secs: i64,
    /// Delivery worker poll interval in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub delivery_poll_interval_ms: u64,
    /// Maximum delivery jobs picked per poll.
    #[serde(default = "default_batch_size")]
    pub delivery_batch_size: u64,
    /// Maximum concurrent outbound deliveries.
    #[serde(default = "default_max_concurrency")]
    pub delivery_max_concurrency: usize,
    /// Attempts before a delivery job is abandoned.
    #[serde(default = "default_max_attempts")]
    pub delivery_max_attempts: i32,
    /// Retry backoff schedule in seconds, indexed by attempt count.
    #[serde(default = "default_backoff_schedule")]
    pub delivery_backoff_schedule_secs: Vec<i64>,
    /// Age after which an unreferenced remote actor is removed, in seconds.
    #[serde(default = "default_stale_actor_max_age")]
    pub stale_actor_max_age_secs: i64,
    /// Stale-actor cleanup interval in milliseconds.
    #[serde(default = "default_cleanup_interval")]
    pub stale_actor_cleanup_interval_ms: u64,
    /// Domain policy cache refresh interval in milliseconds.
    #[serde(default = "default_policy_refresh_interval")]
    pub domain_policy_refresh_interval_ms: u64,
    /// Capacity of the background task pool (Accept delivery, DM publish).
    #[serde(default = "default_task_pool_capacity")]
    pub task_pool_capacity: usize,
    /// Grace period for draining in-flight work on shutdown, in milliseconds.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
    /// Allow plain-http requests to loopback addresses (dev/test only).
    #[serde(default)]
    pub allow_insecure_loopback: bool,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            actor_cache_ttl_secs: default_actor_cache_ttl(),
            http_connect_timeout_ms: default_connect_timeout(),
            http_receive_timeout_ms: default_receive_timeout(),
            max_payload_size: default_max_payload_size(),
            max_content_size: default_max_content_size(),
            max_response_size: default_max_payload_size(),
            signature_max_age_secs: default_signature_max_age(),
            delivery_poll_interval_ms: default_poll_interval(),
            delivery_batch_size: default_batch_size(),
            delivery_max_concurrency: default_max_concurrency(),
            delivery_max_attempts: default_max_attempts(),
            delivery_backoff_schedule_secs: default_backoff_schedule(),
            stale_actor_max_age_secs: default_stale_actor_max_age(),
            stale_actor_cleanup_interval_ms: default_cleanup_interval(),
            domain_policy_refresh_interval_ms: default_policy_refresh_interval(),
            task_pool_capacity: default_task_pool_capacity(),
            shutdown_grace_ms: default_shutdown_grace(),
            allow_insecure_loopback: false,
        }
    }
}

impl FederationConfig {
    /// Outbound HTTP connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.http_connect_timeout_ms)
    }

    /// Outbound HTTP receive timeout.
    #[must_use]
    pub const fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.http_receive_timeout_ms)
    }

    /// Delivery worker poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.delivery_poll_interval_ms)
    }

    /// Per-delivery task timeout: receive timeout plus a fixed grace.
    #[must_use]
    pub const fn delivery_task_timeout(&self) -> Duration {
        Duration::from_millis(self.http_receive_timeout_ms + 15_000)
    }

    /// Backoff delay in seconds for a job that has now failed `attempts` times.
    ///
    /// Plateaus at the last schedule entry.
    #[must_use]
    pub fn backoff_secs(&self, attempts: i32) -> i64 {
        let schedule = &self.delivery_backoff_schedule_secs;
        if schedule.is_empty() {
            return 60;
        }
        let idx = usize::try_from(attempts.max(1) - 1).unwrap_or(0);
        schedule[idx.min(schedule.len() - 1)]
    }
}

const fn default_true() -> bool {
    true
}

const fn default_actor_cache_ttl() -> i64 {
    86_400
}

const fn default_connect_timeout() -> u64 {
    10_000
}

const fn default_receive_timeout() -> u64 {
    30_000
}

const fn default_max_payload_size() -> usize {
    262_144
}

const fn default_max_content_size() -> usize {
    65_536
}

const fn default_signature_max_age() -> i64 {
    30
}

const fn default_poll_interval() -> u64 {
    60_000
}

const fn default_batch_size() -> u64 {
    50
}

const fn default_max_concurrency() -> usize {
    10
}

const fn default_max_attempts() -> i32 {
    6
}

fn default_backoff_schedule() -> Vec<i64> {
    vec![60, 300, 1_800, 7_200, 43_200, 86_400]
}

const fn default_stale_actor_max_age() -> i64 {
    2_592_000
}

const fn default_cleanup_interval() -> u64 {
    86_400_000
}

const fn default_policy_refresh_interval() -> u64 {
    60_000
}

const fn default_task_pool_capacity() -> usize {
    32
}

const fn default_shutdown_grace() -> u64 {
    45_000
}

const fn default_max_connections() -> u32 {
    100
}

const fn default_min_connections() -> u32 {
    5
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (based on `DRIFTWOOD_ENV`)
    /// 3. Environment variables with `DRIFTWOOD_` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let env = std::env::var("DRIFTWOOD_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("DRIFTWOOD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("DRIFTWOOD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_federation_defaults() {
        let config = FederationConfig::default();
        assert!(config.enabled);
        assert_eq!(config.actor_cache_ttl_secs, 86_400);
        assert_eq!(config.delivery_max_attempts, 6);
        assert_eq!(
            config.delivery_backoff_schedule_secs,
            vec![60, 300, 1_800, 7_200, 43_200, 86_400]
        );
        assert_eq!(config.max_payload_size, 262_144);
        assert_eq!(config.max_content_size, 65_536);
    }

    #[test]
    fn test_backoff_indexing() {
        let config = FederationConfig::default();
        assert_eq!(config.backoff_secs(1), 60);
        assert_eq!(config.backoff_secs(2), 300);
        assert_eq!(config.backoff_secs(6), 86_400);
        // Plateaus past the end of the schedule
        assert_eq!(config.backoff_secs(20), 86_400);
    }

    #[test]
    fn test_delivery_task_timeout_includes_grace() {
        let config = FederationConfig::default();
        assert_eq!(
            config.delivery_task_timeout(),
            Duration::from_millis(45_000)
        );
    }
}
