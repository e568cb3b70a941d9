//! Inbound Undo (Follow, Like, Announce, Block).

use driftwood_common::AppResult;
use driftwood_db::entities::remote_actor;
use serde_json::Value;
use tracing::{debug, info};

use super::{HandleOutcome, InboxHandler};

/// Reverse an earlier activity of the verified actor.
///
/// The embedded-map form names what is being undone; the bare-URI form
/// only carries the original activity id, so each undoable kind is tried
/// by AP id. Nothing matching is a no-op, not an error.
pub(super) async fn handle(
    h: &InboxHandler,
    activity: &Value,
    verified: &remote_actor::Model,
) -> AppResult<HandleOutcome> {
    match &activity["object"] {
        Value::Object(map) => {
            let inner_type = map.get("type").and_then(Value::as_str).unwrap_or_default();
            let inner_id = map.get("id").and_then(Value::as_str);

            match inner_type {
                "Follow" => {
                    let removed = if let Some(followed) =
                        map.get("object").and_then(Value::as_str)
                    {
                        h.followers
                            .delete_by_pair(followed, &verified.ap_id)
                            .await?
                    } else if let Some(id) = inner_id {
                        h.followers.delete_by_activity_id(id, &verified.ap_id).await?
                    } else {
                        false
                    };
                    info!(follower = %verified.ap_id, removed, "Undo(Follow)");
                }
                "Like" => {
                    if let Some(id) = inner_id {
                        let removed = h.content.delete_article_like(id, &verified.id).await?;
                        info!(ap_id = id, removed, "Undo(Like)");
                    }
                }
                "Announce" => {
                    if let Some(id) = inner_id {
                        let removed = h.content.delete_announce(id, &verified.id).await?;
                        info!(ap_id = id, removed, "Undo(Announce)");
                    }
                }
                "Block" => {
                    info!(actor = %verified.ap_id, "Undo(Block) received (no local effect)");
                }
                other => {
                    debug!(inner_type = other, "Ignoring Undo of unhandled type");
                }
            }
        }
        Value::String(ap_id) => {
            // Bare original-activity URI: probe each undoable kind.
            if h.content.delete_article_like(ap_id, &verified.id).await? {
                info!(ap_id = %ap_id, "Undo(Like) by bare URI");
            } else if h.content.delete_announce(ap_id, &verified.id).await? {
                info!(ap_id = %ap_id, "Undo(Announce) by bare URI");
            } else if h
                .followers
                .delete_by_activity_id(ap_id, &verified.ap_id)
                .await?
            {
                info!(ap_id = %ap_id, "Undo(Follow) by bare URI");
            } else {
                debug!(ap_id = %ap_id, "Undo matched nothing");
            }
        }
        _ => {
            debug!("Ignoring Undo with unhandled object shape");
        }
    }

    Ok(HandleOutcome::default())
}
