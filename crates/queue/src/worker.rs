//! Delivery worker.
//!
//! Polls the durable queue on a jittered interval, dispatches each due
//! job onto a bounded task pool and drives the per-job state machine:
//! 2xx marks delivered, anything else consumes an attempt and backs off,
//! the configured attempt limit abandons the job. A task that outlives
//! its timeout is killed and the row is explicitly marked failed with
//! `task_timeout`, so its attempts and backoff stay monotonic instead of
//! the row being re-picked hot on every poll.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use driftwood_common::config::FederationConfig;
use driftwood_db::entities::delivery_job;
use driftwood_db::repositories::DeliveryJobRepository;
use driftwood_federation::{Deliverer, DomainPolicy};
use rand::Rng;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use url::Url;

/// Drains the outbound delivery queue.
pub struct DeliveryWorker {
    jobs: DeliveryJobRepository,
    deliverer: Arc<Deliverer>,
    policy: DomainPolicy,
    config: FederationConfig,
    stop: watch::Sender<bool>,
}

impl DeliveryWorker {
    /// Create a worker.
    #[must_use]
    pub fn new(
        jobs: DeliveryJobRepository,
        deliverer: Arc<Deliverer>,
        policy: DomainPolicy,
        config: FederationConfig,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            jobs,
            deliverer,
            policy,
            config,
            stop,
        }
    }

    /// Run the poll loop until shutdown.
    pub async fn run(self: Arc<Self>) {
        info!(
            interval_ms = self.config.delivery_poll_interval_ms,
            batch = self.config.delivery_batch_size,
            concurrency = self.config.delivery_max_concurrency,
            "Delivery worker started"
        );

        let mut stop_rx = self.stop.subscribe();
        loop {
            // Shutdown may have been requested before this task first ran.
            if self.is_shutting_down() {
                break;
            }
            tokio::select! {
                _ = stop_rx.changed() => break,
                () = tokio::time::sleep(self.jittered_interval()) => {}
            }
            if self.is_shutting_down() {
                break;
            }

            match self.poll_once().await {
                Ok(0) => {}
                Ok(count) => debug!(count, "Delivery poll dispatched jobs"),
                Err(e) => error!(error = %e, "Delivery poll failed"),
            }
        }

        info!("Delivery worker stopped");
    }

    /// Stop polling. In-flight deliveries finish within their own
    /// timeouts; the current poll drains before `run` returns.
    pub fn shutdown(&self) {
        self.stop.send_replace(true);
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.stop.borrow()
    }

    /// Poll interval with ±10% jitter, so a fleet of instances does not
    /// align its polls.
    fn jittered_interval(&self) -> Duration {
        let base = self.config.delivery_poll_interval_ms as f64;
        let factor = rand::thread_rng().gen_range(0.9..=1.1);
        Duration::from_millis((base * factor) as u64)
    }

    /// Select one batch of due jobs and deliver them concurrently.
    /// Returns how many jobs were dispatched.
    pub async fn poll_once(self: &Arc<Self>) -> driftwood_common::AppResult<usize> {
        let due = self
            .jobs
            .due_jobs(Utc::now(), self.config.delivery_batch_size)
            .await?;
        if due.is_empty() {
            return Ok(0);
        }

        let dispatched = due.len();
        let semaphore = Arc::new(Semaphore::new(self.config.delivery_max_concurrency));
        let mut tasks = JoinSet::new();

        for job in due {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let worker = Arc::clone(self);
            tasks.spawn(async move {
                worker.deliver_job(job).await;
                drop(permit);
            });
        }

        // Deliveries to different inboxes may finish in any order; the
        // barrier here only bounds the poll, not the commit order.
        while tasks.join_next().await.is_some() {}

        Ok(dispatched)
    }

    async fn deliver_job(&self, job: delivery_job::Model) {
        // Domain block beats HTTP: a blocked destination is abandoned
        // without an attempt.
        if let Some(domain) = Url::parse(&job.inbox_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_lowercase))
        {
            if self.policy.is_blocked(&domain) {
                info!(job_id = %job.id, inbox = %job.inbox_url, "Destination domain blocked, abandoning");
                if let Err(e) = self.jobs.abandon_domain_blocked(&job).await {
                    error!(job_id = %job.id, error = %e, "Failed to abandon blocked job");
                }
                return;
            }
        }

        info!(
            target: "driftwood::delivery",
            event = "delivery.start",
            job_id = %job.id,
            inbox = %job.inbox_url,
            attempt = job.attempts + 1,
        );
        let started = Instant::now();

        let attempt = tokio::time::timeout(
            self.config.delivery_task_timeout(),
            self.deliverer
                .deliver(&job.inbox_url, &job.activity_json, &job.actor_uri),
        )
        .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        let status = match attempt {
            Ok(Ok(())) => {
                if let Err(e) = self.jobs.record_success(&job).await {
                    error!(job_id = %job.id, error = %e, "Failed to record delivery success");
                }
                "delivered".to_string()
            }
            Ok(Err(e)) => self.record_failure(&job, &e.to_string()).await,
            Err(_) => {
                warn!(job_id = %job.id, inbox = %job.inbox_url, "Delivery task timed out, killed");
                self.record_failure(&job, "task_timeout").await
            }
        };

        info!(
            target: "driftwood::delivery",
            event = "delivery.stop",
            job_id = %job.id,
            inbox = %job.inbox_url,
            status = %status,
            duration_ms,
        );
    }

    async fn record_failure(&self, job: &delivery_job::Model, error: &str) -> String {
        match self
            .jobs
            .record_failure(
                job,
                error,
                self.config.delivery_max_attempts,
                &self.config.delivery_backoff_schedule_secs,
            )
            .await
        {
            Ok(status) => format!("{status:?}").to_lowercase(),
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to record delivery failure");
                "unknown".to_string()
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use driftwood_common::KeyVault;
    use driftwood_db::entities::delivery_job::JobStatus;
    use driftwood_db::repositories::SettingRepository;
    use driftwood_federation::safe_http::{
        HttpTransport, SafeHttpClient, SafeHttpError, SafeResponse, TransportRequest,
    };
    use driftwood_federation::{ActorKeyBackend, KeyStore, KeySubject, StoredKeyMaterial};
    use async_trait::async_trait;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use std::collections::HashMap;
    use std::sync::Mutex;

    // A stub transport local to the worker tests (the federation crate's
    // stub is test-gated and not visible here).
    struct StubTransport {
        requests: Mutex<Vec<TransportRequest>>,
        responses: Mutex<Vec<SafeResponse>>,
    }

    #[async_trait]
    impl HttpTransport for StubTransport {
        async fn execute(&self, request: TransportRequest) -> Result<SafeResponse, SafeHttpError> {
            self.requests.lock().unwrap().push(request);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(SafeHttpError::Transport("no stubbed response".to_string()));
            }
            Ok(responses.remove(0))
        }
    }

    struct MemoryKeys {
        keys: Mutex<HashMap<String, StoredKeyMaterial>>,
    }

    #[async_trait]
    impl ActorKeyBackend for MemoryKeys {
        async fn load(
            &self,
            subject: &KeySubject,
        ) -> driftwood_common::AppResult<Option<StoredKeyMaterial>> {
            Ok(self.keys.lock().unwrap().get(&format!("{subject:?}")).cloned())
        }

        async fn store(
            &self,
            subject: &KeySubject,
            material: &StoredKeyMaterial,
        ) -> driftwood_common::AppResult<()> {
            self.keys
                .lock()
                .unwrap()
                .insert(format!("{subject:?}"), material.clone());
            Ok(())
        }
    }

    fn due_job(inbox: &str, attempts: i32) -> delivery_job::Model {
        delivery_job::Model {
            id: "dj1".to_string(),
            activity_json: r#"{"type":"Create"}"#.to_string(),
            inbox_url: inbox.to_string(),
            actor_uri: "https://l.ex/ap/users/bob".to_string(),
            status: if attempts == 0 {
                JobStatus::Pending
            } else {
                JobStatus::Failed
            },
            attempts,
            last_error: None,
            next_retry_at: None,
            delivered_at: None,
            inserted_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        }
    }

    async fn worker(
        jobs: Vec<delivery_job::Model>,
        exec_results: usize,
        responses: Vec<SafeResponse>,
    ) -> (Arc<DeliveryWorker>, Arc<StubTransport>) {
        let mut job_db = MockDatabase::new(DatabaseBackend::Postgres);
        job_db = job_db.append_query_results([jobs]);
        let execs: Vec<MockExecResult> = (0..exec_results)
            .map(|_| MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            })
            .collect();
        let job_db = Arc::new(job_db.append_exec_results(execs).into_connection());

        let setting_db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());

        let config = FederationConfig::default();
        let transport = Arc::new(StubTransport {
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(responses),
        });
        let http = SafeHttpClient::with_transport(
            &config,
            "driftwood-test".to_string(),
            transport.clone(),
        );
        let keystore = KeyStore::new(
            KeyVault::new("test master secret"),
            Arc::new(MemoryKeys {
                keys: Mutex::new(HashMap::new()),
            }),
            SettingRepository::new(setting_db.clone()),
            Url::parse("https://l.ex").unwrap(),
        );
        keystore
            .ensure_keypair(&KeySubject::User("bob".to_string()))
            .await
            .unwrap();

        let worker = Arc::new(DeliveryWorker::new(
            driftwood_db::repositories::DeliveryJobRepository::new(job_db),
            Arc::new(Deliverer::new(http, keystore)),
            DomainPolicy::new(SettingRepository::new(setting_db)),
            config,
        ));
        (worker, transport)
    }

    fn ok_response(status: u16) -> SafeResponse {
        SafeResponse {
            status,
            headers: Vec::new(),
            body: bytes::Bytes::new(),
        }
    }

    #[tokio::test]
    async fn test_poll_delivers_due_job() {
        let (worker, transport) = worker(
            vec![due_job("https://203.0.113.10/inbox", 0)],
            1,
            vec![ok_response(202)],
        )
        .await;

        let dispatched = worker.poll_once().await.unwrap();

        assert_eq!(dispatched, 1);
        assert_eq!(transport.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_poll_records_failure_on_500() {
        let (worker, transport) = worker(
            vec![due_job("https://203.0.113.10/inbox", 0)],
            1,
            vec![ok_response(500)],
        )
        .await;

        let dispatched = worker.poll_once().await.unwrap();

        assert_eq!(dispatched, 1);
        assert_eq!(transport.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_blocked_domain_abandoned_without_http() {
        let (worker, transport) = worker(
            vec![due_job("https://blocked.ex/inbox", 0)],
            1,
            vec![],
        )
        .await;
        worker.policy.set_for_test(
            driftwood_federation::FederationMode::Blocklist,
            &["blocked.ex"],
        );

        worker.poll_once().await.unwrap();

        assert_eq!(transport.requests.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_empty_poll_is_noop() {
        let (worker, transport) = worker(vec![], 0, vec![]).await;

        assert_eq!(worker.poll_once().await.unwrap(), 0);
        assert_eq!(transport.requests.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_flag() {
        let (worker, _) = worker(vec![], 0, vec![]).await;

        assert!(!worker.is_shutting_down());
        worker.shutdown();
        assert!(worker.is_shutting_down());
    }
}
