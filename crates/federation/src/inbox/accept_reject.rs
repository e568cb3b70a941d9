//! Inbound Accept / Reject of our outbound Follows.

use driftwood_common::AppResult;
use driftwood_db::repositories::FollowKind;
use serde_json::Value;
use tracing::{info, warn};

use super::{HandleOutcome, InboxHandler};
use crate::protocol;

/// Transition the matching outbound follow. The inner Follow arrives
/// embedded or as a bare id string; user follows are searched before
/// board follows. An unknown id is logged and ignored, since peers re-send
/// Accepts freely.
pub(super) async fn handle(
    h: &InboxHandler,
    activity: &Value,
    accepted: bool,
) -> AppResult<HandleOutcome> {
    let Some(follow_ap_id) = activity.get("object").and_then(protocol::object_id) else {
        warn!("Accept/Reject without an inner Follow id");
        return Ok(HandleOutcome::default());
    };

    let kind = if accepted {
        h.follows.accept_by_ap_id(follow_ap_id).await?
    } else {
        h.follows.reject_by_ap_id(follow_ap_id).await?
    };

    match kind {
        Some(FollowKind::User) => {
            info!(ap_id = follow_ap_id, accepted, "Transitioned user follow");
        }
        Some(FollowKind::Board) => {
            info!(ap_id = follow_ap_id, accepted, "Transitioned board follow");
        }
        None => {
            warn!(ap_id = follow_ap_id, "Accept/Reject matched no outbound follow");
        }
    }

    Ok(HandleOutcome::default())
}
