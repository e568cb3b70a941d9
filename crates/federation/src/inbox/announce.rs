//! Inbound Announce (boost).

use driftwood_common::AppResult;
use driftwood_db::entities::remote_actor;
use serde_json::Value;
use tracing::{debug, info};

use super::{HandleOutcome, InboxHandler};
use crate::protocol;

/// Store an announce row keyed by the activity AP id.
///
/// The object arrives either as a bare URI (Mastodon) or as an embedded
/// object map (Lemmy); the narrowing takes the inner `id` in both cases.
pub(super) async fn handle(
    h: &InboxHandler,
    activity: &Value,
    verified: &remote_actor::Model,
) -> AppResult<HandleOutcome> {
    let Some(object_uri) = activity.get("object").and_then(protocol::object_id) else {
        debug!("Ignoring Announce without an object id");
        return Ok(HandleOutcome::default());
    };

    let ap_id = protocol::activity_id(activity).unwrap_or_default();
    h.content
        .create_announce(ap_id, object_uri, &verified.id)
        .await?;
    info!(ap_id, object = object_uri, "Stored announce");

    Ok(HandleOutcome::default())
}
