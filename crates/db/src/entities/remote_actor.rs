//! Remote actor entity (cached `ActivityPub` actor profiles).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A remote `ActivityPub` actor known to this instance.
///
/// The row doubles as the actor cache: `fetched_at` plus the configured TTL
/// decides freshness, and the stale cleaner removes unreferenced rows.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "remote_actors")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Globally unique `ActivityPub` ID (HTTPS URI).
    #[sea_orm(unique)]
    pub ap_id: String,

    pub username: String,
    pub domain: String,

    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub summary: Option<String>,

    /// Public key in PEM format, used for HTTP signature verification.
    #[sea_orm(column_type = "Text")]
    pub public_key_pem: String,

    /// Personal inbox URL.
    pub inbox: String,
    /// Instance-wide shared inbox URL, if advertised.
    pub shared_inbox: Option<String>,

    /// Person, Group, Organization, Application or Service.
    pub actor_type: String,

    /// When the profile was last fetched from the remote instance.
    pub fetched_at: DateTimeWithTimeZone,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::follower::Entity")]
    Follower,
}

impl Related<super::follower::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Follower.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
