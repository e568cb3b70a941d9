//! Repositories for database operations.

mod delivery_job;
mod follow;
mod follower;
mod remote_actor;
mod setting;

pub use delivery_job::{DeliveryJobRepository, StatusCounts};
pub use follow::{FollowKind, FollowRepository};
pub use follower::FollowerRepository;
pub use remote_actor::RemoteActorRepository;
pub use setting::{setting_keys, SettingRepository};

use driftwood_common::AppError;
use sea_orm::{DbErr, SqlErr};

/// Outcome of an insert conditioned on a unique AP id.
///
/// Handlers treat `AlreadyExists` as success; it is how unique-violation
/// idempotency surfaces without string-matching database errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The row was inserted.
    Created,
    /// A row with the same unique key already existed; nothing was written.
    AlreadyExists,
}

impl WriteOutcome {
    /// Whether this outcome wrote a new row.
    #[must_use]
    pub const fn created(self) -> bool {
        matches!(self, Self::Created)
    }
}

/// Map an insert error, turning unique-constraint violations into
/// [`WriteOutcome::AlreadyExists`].
pub(crate) fn insert_outcome(err: DbErr) -> Result<WriteOutcome, AppError> {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => Ok(WriteOutcome::AlreadyExists),
        _ => Err(AppError::Database(err.to_string())),
    }
}
