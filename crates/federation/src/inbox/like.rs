//! Inbound Like.

use driftwood_common::AppResult;
use driftwood_db::entities::remote_actor;
use serde_json::Value;
use tracing::{debug, info};

use super::{HandleOutcome, InboxHandler};
use crate::protocol;

/// Store a like on a local article; likes of anything else are ignored.
pub(super) async fn handle(
    h: &InboxHandler,
    activity: &Value,
    verified: &remote_actor::Model,
) -> AppResult<HandleOutcome> {
    let Some(object_uri) = activity.get("object").and_then(protocol::object_id) else {
        debug!("Ignoring Like without an object URI");
        return Ok(HandleOutcome::default());
    };

    if !h.is_local_uri(object_uri) {
        debug!(object = object_uri, "Ignoring Like of a non-local object");
        return Ok(HandleOutcome::default());
    }

    let Some(article_id) = h.content.find_article_by_uri(object_uri).await? else {
        debug!(object = object_uri, "Ignoring Like of an unknown local URI");
        return Ok(HandleOutcome::default());
    };

    let ap_id = protocol::activity_id(activity).unwrap_or_default();
    h.content
        .create_article_like(ap_id, &article_id, &verified.id)
        .await?;
    info!(ap_id, article = %article_id, "Stored article like");

    Ok(HandleOutcome::default())
}
