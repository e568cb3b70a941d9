//! Follower entity (remote actors following a local actor).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A remote actor following a local actor URI.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "followers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// The local actor being followed (`/ap/users/...` or `/ap/boards/...`).
    pub actor_uri: String,

    /// The remote follower's `ActivityPub` ID.
    pub follower_uri: String,

    pub remote_actor_id: String,

    /// AP id of the original Follow activity, needed to match Undo(Follow).
    pub activity_id: String,

    pub accepted_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::remote_actor::Entity",
        from = "Column::RemoteActorId",
        to = "super::remote_actor::Column::Id",
        on_delete = "Cascade"
    )]
    RemoteActor,
}

impl Related<super::remote_actor::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RemoteActor.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
