//! Delivery job entity (durable outbound activity deliveries).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Status of a delivery job.
///
/// Transitions form a DAG: pending → {delivered, failed};
/// failed → {delivered, failed, abandoned}; delivered and abandoned are
/// terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "abandoned")]
    Abandoned,
}

/// One (activity, inbox) delivery attempt.
///
/// A partial unique index on `(inbox_url, actor_uri) WHERE status IN
/// ('pending','failed')` keeps at most one live job per destination and
/// signer; the insert conflict is the shared-inbox dedup primitive.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "delivery_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Serialized activity JSON, exactly as it will be POSTed.
    #[sea_orm(column_type = "Text")]
    pub activity_json: String,

    pub inbox_url: String,

    /// Local actor URI whose key signs the delivery.
    pub actor_uri: String,

    pub status: JobStatus,

    pub attempts: i32,

    pub last_error: Option<String>,

    pub next_retry_at: Option<DateTimeWithTimeZone>,
    pub delivered_at: Option<DateTimeWithTimeZone>,

    pub inserted_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
