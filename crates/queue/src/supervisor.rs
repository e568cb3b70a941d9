//! Federation supervisor.
//!
//! Owns the long-lived workers: the delivery worker, the stale-actor
//! cleanup loop (which also purges finished delivery jobs), the domain
//! policy refresh loop, and the bounded task pool that runs Accept
//! deliveries and DM publishes. Everything starts together when
//! federation is enabled and drains together on shutdown.

use std::sync::Arc;
use std::time::Duration;

use driftwood_common::{config::FederationConfig, TaskPool};
use driftwood_db::repositories::DeliveryJobRepository;
use driftwood_federation::{DomainPolicy, StaleCleaner};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::worker::DeliveryWorker;

/// Starts and stops the federation workers.
pub struct FederationSupervisor {
    config: FederationConfig,
    worker: Arc<DeliveryWorker>,
    cleaner: StaleCleaner,
    policy: DomainPolicy,
    jobs: DeliveryJobRepository,
    task_pool: TaskPool,
    stop: watch::Sender<bool>,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl FederationSupervisor {
    /// Create a supervisor. Nothing runs until [`Self::start`].
    #[must_use]
    pub fn new(
        config: FederationConfig,
        worker: Arc<DeliveryWorker>,
        cleaner: StaleCleaner,
        policy: DomainPolicy,
        jobs: DeliveryJobRepository,
        task_pool: TaskPool,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            config,
            worker,
            cleaner,
            policy,
            jobs,
            task_pool,
            stop,
            handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// The task pool for background sub-work (Accept delivery, DM
    /// publishing). Spawning through it keeps the work drainable.
    #[must_use]
    pub fn task_pool(&self) -> TaskPool {
        self.task_pool.clone()
    }

    /// Start the workers. A no-op when federation is disabled.
    pub fn start(&self) {
        if !self.config.enabled {
            info!("Federation disabled, supervisor not starting workers");
            return;
        }

        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());

        handles.push(tokio::spawn(Arc::clone(&self.worker).run()));

        // Stale cleanup + delivery job purge share the daily cadence.
        let cleaner = self.cleaner.clone();
        let jobs = self.jobs.clone();
        let cleanup_interval = Duration::from_millis(self.config.stale_actor_cleanup_interval_ms);
        let mut stop_rx = self.stop.subscribe();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    () = tokio::time::sleep(cleanup_interval) => {}
                }
                match cleaner.run_pass().await {
                    Ok(report) => info!(?report, "Stale actor cleanup pass done"),
                    Err(e) => error!(error = %e, "Stale actor cleanup failed"),
                }
                match jobs.purge_completed_jobs().await {
                    Ok(purged) if purged > 0 => info!(purged, "Purged finished delivery jobs"),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Delivery job purge failed"),
                }
            }
        }));

        let policy = self.policy.clone();
        let refresh_interval =
            Duration::from_millis(self.config.domain_policy_refresh_interval_ms);
        let mut stop_rx = self.stop.subscribe();
        handles.push(tokio::spawn(async move {
            // Load the stored policy before the first tick.
            if let Err(e) = policy.refresh().await {
                error!(error = %e, "Initial domain policy load failed");
            }
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    () = tokio::time::sleep(refresh_interval) => {}
                }
                if let Err(e) = policy.refresh().await {
                    error!(error = %e, "Domain policy refresh failed");
                }
            }
        }));

        info!("Federation supervisor started workers");
    }

    /// Stop all workers: no new polls, in-flight work drains up to the
    /// configured grace, then the loops exit.
    pub async fn shutdown(&self) {
        info!("Federation supervisor shutting down");

        self.worker.shutdown();
        self.stop.send_replace(true);

        let grace = Duration::from_millis(self.config.shutdown_grace_ms);
        if !self.task_pool.shutdown(grace).await {
            warn!("Background task pool did not drain within grace");
        }

        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for handle in handles {
            if tokio::time::timeout(grace, handle).await.is_err() {
                warn!("Worker did not stop within grace, detaching");
            }
        }

        info!("Federation supervisor stopped");
    }
}
