//! Delivery job repository.
//!
//! Owns the durable outbound queue: enqueue with per-inbox dedup, the
//! worker's due-job select, the post-delivery state machine and the
//! operator maintenance commands.

use std::collections::HashSet;
use std::sync::Arc;

use crate::entities::{delivery_job, delivery_job::JobStatus, DeliveryJob};
use crate::repositories::{insert_outcome, WriteOutcome};
use chrono::{DateTime, Duration, Utc};
use driftwood_common::{AppError, AppResult, IdGenerator};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use tracing::debug;

/// Delivered rows older than this are purged.
const PURGE_DELIVERED_AFTER_DAYS: i64 = 7;

/// Abandoned rows older than this are purged.
const PURGE_ABANDONED_AFTER_DAYS: i64 = 30;

/// `last_error` is truncated to this many characters.
const MAX_ERROR_LEN: usize = 1000;

/// Job counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub failed: u64,
    pub delivered: u64,
    pub abandoned: u64,
}

/// Delivery job repository for database operations.
#[derive(Clone)]
pub struct DeliveryJobRepository {
    db: Arc<DatabaseConnection>,
    id_gen: IdGenerator,
}

impl DeliveryJobRepository {
    /// Create a new delivery job repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            id_gen: IdGenerator::new(),
        }
    }

    /// Enqueue one activity for a set of inboxes, signed by `actor_uri`.
    ///
    /// Inboxes are deduplicated by exact string match before insert, and a
    /// live (pending/failed) job for the same `(inbox_url, actor_uri)`
    /// makes the insert a silent skip via the partial unique index.
    /// Returns how many inboxes were actually new.
    pub async fn enqueue(
        &self,
        activity_json: &str,
        actor_uri: &str,
        inboxes: &[String],
    ) -> AppResult<usize> {
        let mut seen = HashSet::new();
        let mut created = 0usize;

        for inbox in inboxes {
            if !seen.insert(inbox.as_str()) {
                continue;
            }

            let now = Utc::now().into();
            let model = delivery_job::ActiveModel {
                id: Set(self.id_gen.generate()),
                activity_json: Set(activity_json.to_string()),
                inbox_url: Set(inbox.clone()),
                actor_uri: Set(actor_uri.to_string()),
                status: Set(JobStatus::Pending),
                attempts: Set(0),
                last_error: Set(None),
                next_retry_at: Set(None),
                delivered_at: Set(None),
                inserted_at: Set(now),
                updated_at: Set(now),
            };

            let outcome = match model.insert(self.db.as_ref()).await {
                Ok(_) => WriteOutcome::Created,
                Err(e) => insert_outcome(e)?,
            };
            if outcome.created() {
                created += 1;
            } else {
                debug!(inbox = %inbox, actor = %actor_uri, "Live delivery job exists, skipping");
            }
        }

        Ok(created)
    }

    /// Jobs ready for delivery, oldest first.
    ///
    /// Picks fresh rows (`pending` with no retry time) and retries whose
    /// `next_retry_at` has passed.
    pub async fn due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> AppResult<Vec<delivery_job::Model>> {
        DeliveryJob::find()
            .filter(
                Condition::any()
                    .add(
                        Condition::all()
                            .add(delivery_job::Column::Status.eq(JobStatus::Pending))
                            .add(delivery_job::Column::NextRetryAt.is_null()),
                    )
                    .add(
                        Condition::all()
                            .add(
                                delivery_job::Column::Status
                                    .is_in([JobStatus::Pending, JobStatus::Failed]),
                            )
                            .add(delivery_job::Column::NextRetryAt.lte(now)),
                    ),
            )
            .order_by_asc(delivery_job::Column::InsertedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find a job by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<delivery_job::Model>> {
        DeliveryJob::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Record a successful delivery (2xx response).
    pub async fn record_success(&self, job: &delivery_job::Model) -> AppResult<()> {
        let now = Utc::now();
        DeliveryJob::update_many()
            .col_expr(
                delivery_job::Column::Status,
                Expr::value(JobStatus::Delivered),
            )
            .col_expr(delivery_job::Column::Attempts, Expr::value(job.attempts + 1))
            .col_expr(delivery_job::Column::DeliveredAt, Expr::value(now))
            .col_expr(delivery_job::Column::UpdatedAt, Expr::value(now))
            .filter(delivery_job::Column::Id.eq(job.id.clone()))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Record a failed attempt and drive the backoff state machine.
    ///
    /// At `max_attempts` the job is abandoned; otherwise it goes to
    /// `failed` with `next_retry_at` from the backoff schedule (plateauing
    /// at the last entry). Returns the resulting status.
    pub async fn record_failure(
        &self,
        job: &delivery_job::Model,
        error: &str,
        max_attempts: i32,
        backoff_schedule_secs: &[i64],
    ) -> AppResult<JobStatus> {
        let attempts = job.attempts + 1;
        let error: String = error.chars().take(MAX_ERROR_LEN).collect();
        let now = Utc::now();

        let (status, next_retry_at) = if attempts >= max_attempts {
            (JobStatus::Abandoned, None)
        } else {
            let idx = usize::try_from(attempts - 1).unwrap_or(0);
            let secs = backoff_schedule_secs
                .get(idx.min(backoff_schedule_secs.len().saturating_sub(1)))
                .copied()
                .unwrap_or(60);
            (JobStatus::Failed, Some(now + Duration::seconds(secs)))
        };

        DeliveryJob::update_many()
            .col_expr(delivery_job::Column::Status, Expr::value(status))
            .col_expr(delivery_job::Column::Attempts, Expr::value(attempts))
            .col_expr(delivery_job::Column::LastError, Expr::value(error))
            .col_expr(delivery_job::Column::NextRetryAt, Expr::value(next_retry_at))
            .col_expr(delivery_job::Column::UpdatedAt, Expr::value(now))
            .filter(delivery_job::Column::Id.eq(job.id.clone()))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(status)
    }

    /// Abandon a job whose destination domain is blocked, without an HTTP
    /// attempt and without consuming an attempt.
    pub async fn abandon_domain_blocked(&self, job: &delivery_job::Model) -> AppResult<()> {
        DeliveryJob::update_many()
            .col_expr(
                delivery_job::Column::Status,
                Expr::value(JobStatus::Abandoned),
            )
            .col_expr(delivery_job::Column::LastError, Expr::value("domain_blocked"))
            .col_expr(delivery_job::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(delivery_job::Column::Id.eq(job.id.clone()))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    // === Operator maintenance ===

    /// Put a failed job back to pending for immediate retry.
    pub async fn retry_job(&self, id: &str) -> AppResult<()> {
        DeliveryJob::update_many()
            .col_expr(delivery_job::Column::Status, Expr::value(JobStatus::Pending))
            .col_expr(
                delivery_job::Column::NextRetryAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(delivery_job::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(delivery_job::Column::Id.eq(id))
            .filter(delivery_job::Column::Status.eq(JobStatus::Failed))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Abandon a single job.
    pub async fn abandon_job(&self, id: &str) -> AppResult<()> {
        DeliveryJob::update_many()
            .col_expr(
                delivery_job::Column::Status,
                Expr::value(JobStatus::Abandoned),
            )
            .col_expr(delivery_job::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(delivery_job::Column::Id.eq(id))
            .filter(delivery_job::Column::Status.is_in([JobStatus::Pending, JobStatus::Failed]))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Retry every failed job whose inbox is on the given domain.
    pub async fn retry_all_failed_for_domain(&self, domain: &str) -> AppResult<u64> {
        let result = DeliveryJob::update_many()
            .col_expr(delivery_job::Column::Status, Expr::value(JobStatus::Pending))
            .col_expr(
                delivery_job::Column::NextRetryAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(delivery_job::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(delivery_job::Column::Status.eq(JobStatus::Failed))
            .filter(Self::domain_condition(domain))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected)
    }

    /// Abandon every live job whose inbox is on the given domain.
    pub async fn abandon_all_for_domain(&self, domain: &str) -> AppResult<u64> {
        let result = DeliveryJob::update_many()
            .col_expr(
                delivery_job::Column::Status,
                Expr::value(JobStatus::Abandoned),
            )
            .col_expr(delivery_job::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(delivery_job::Column::Status.is_in([JobStatus::Pending, JobStatus::Failed]))
            .filter(Self::domain_condition(domain))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected)
    }

    fn domain_condition(domain: &str) -> Condition {
        Condition::any()
            .add(delivery_job::Column::InboxUrl.like(format!("https://{domain}/%")))
            .add(delivery_job::Column::InboxUrl.like(format!("http://{domain}/%")))
    }

    /// Job counts by status, for the operator dashboard.
    pub async fn status_counts(&self) -> AppResult<StatusCounts> {
        Ok(StatusCounts {
            pending: self.count_status(JobStatus::Pending, None).await?,
            failed: self.count_status(JobStatus::Failed, None).await?,
            delivered: self.count_status(JobStatus::Delivered, None).await?,
            abandoned: self.count_status(JobStatus::Abandoned, None).await?,
        })
    }

    /// Share of failed/abandoned outcomes among jobs updated in the last
    /// 24 hours. Zero when nothing happened.
    pub async fn error_rate_24h(&self) -> AppResult<f64> {
        let cutoff = Utc::now() - Duration::seconds(86_400);

        let failed = self.count_status(JobStatus::Failed, Some(cutoff)).await?;
        let abandoned = self.count_status(JobStatus::Abandoned, Some(cutoff)).await?;
        let delivered = self.count_status(JobStatus::Delivered, Some(cutoff)).await?;

        let denominator = failed + abandoned + delivered;
        if denominator == 0 {
            return Ok(0.0);
        }
        Ok((failed + abandoned) as f64 / denominator as f64)
    }

    async fn count_status(
        &self,
        status: JobStatus,
        updated_after: Option<DateTime<Utc>>,
    ) -> AppResult<u64> {
        let mut query = DeliveryJob::find().filter(delivery_job::Column::Status.eq(status));
        if let Some(cutoff) = updated_after {
            query = query.filter(delivery_job::Column::UpdatedAt.gte(cutoff));
        }
        query
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Delete finished rows past their retention window.
    pub async fn purge_completed_jobs(&self) -> AppResult<u64> {
        let now = Utc::now();

        let delivered = DeliveryJob::delete_many()
            .filter(delivery_job::Column::Status.eq(JobStatus::Delivered))
            .filter(
                delivery_job::Column::UpdatedAt
                    .lt(now - Duration::days(PURGE_DELIVERED_AFTER_DAYS)),
            )
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let abandoned = DeliveryJob::delete_many()
            .filter(delivery_job::Column::Status.eq(JobStatus::Abandoned))
            .filter(
                delivery_job::Column::UpdatedAt
                    .lt(now - Duration::days(PURGE_ABANDONED_AFTER_DAYS)),
            )
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(delivered.rows_affected + abandoned.rows_affected)
    }
}
