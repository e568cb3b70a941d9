//! Board follow entity (outbound follows from local boards to remote actors).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub use super::user_follow::FollowState;

/// An outbound follow from a local board to a remote actor.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "board_follows")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub board_id: String,
    pub remote_actor_id: String,

    pub state: FollowState,

    /// AP id of the outgoing Follow activity; Accept/Reject match on it.
    #[sea_orm(unique)]
    pub ap_id: String,

    pub accepted_at: Option<DateTimeWithTimeZone>,
    pub rejected_at: Option<DateTimeWithTimeZone>,

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
