//! Inbound Delete (objects and whole actors).

use driftwood_common::AppResult;
use driftwood_db::entities::remote_actor;
use serde_json::Value;
use tracing::{debug, info};

use super::{HandleOutcome, InboxHandler};
use crate::protocol;

pub(super) async fn handle(
    h: &InboxHandler,
    activity: &Value,
    verified: &remote_actor::Model,
) -> AppResult<HandleOutcome> {
    let Some(object_uri) = activity.get("object").and_then(protocol::object_id) else {
        debug!("Ignoring Delete without an object id");
        return Ok(HandleOutcome::default());
    };

    if object_uri == verified.ap_id {
        // The actor deleted itself: drop its follow edges and soft-delete
        // everything it authored.
        let follower_rows = h
            .followers
            .delete_all_for_remote_actor(&verified.id)
            .await?;
        let content_rows = h.content.soft_delete_all_for_actor(&verified.id).await?;
        info!(
            actor = %verified.ap_id,
            follower_rows,
            content_rows,
            "Processed actor deletion"
        );
        return Ok(HandleOutcome::default());
    }

    // Single object (bare URI or Tombstone): soft-delete when the signer
    // owns it. Unknown ids are fine; peers broadcast deletes widely.
    let deleted = h.content.soft_delete_by_ap_id(object_uri, &verified.id).await?;
    info!(object = object_uri, deleted, "Processed object deletion");

    Ok(HandleOutcome::default())
}
