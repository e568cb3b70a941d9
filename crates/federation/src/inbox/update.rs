//! Inbound Update (content edits and actor profile changes).

use driftwood_common::AppResult;
use driftwood_db::entities::remote_actor;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{HandleOutcome, InboxHandler};
use crate::protocol;
use crate::sanitize::{sanitize_display_name, sanitize_html};
use crate::validate;

const ACTOR_TYPES: &[&str] = &["Person", "Group", "Organization", "Application", "Service"];

pub(super) async fn handle(
    h: &InboxHandler,
    activity: &Value,
    verified: &remote_actor::Model,
) -> AppResult<HandleOutcome> {
    let Some(object) = activity.get("object").filter(|o| o.is_object()) else {
        debug!("Ignoring Update without an embedded object");
        return Ok(HandleOutcome::default());
    };

    match protocol::object_type(object).unwrap_or_default() {
        "Note" | "Article" | "Page" | "Question" => {
            let Some(ap_id) = object.get("id").and_then(Value::as_str) else {
                debug!("Ignoring Update of an object without id");
                return Ok(HandleOutcome::default());
            };

            let content = object.get("content").and_then(Value::as_str).unwrap_or_default();
            validate::check_content_size(content, h.max_content_size)?;
            let title = object
                .get("name")
                .and_then(Value::as_str)
                .map(sanitize_display_name);

            // Ownership (remote_actor_id on the stored row) is enforced
            // by the content layer; an update of someone else's object
            // changes nothing.
            let changed = h
                .content
                .update_remote_content(ap_id, &verified.id, title, sanitize_html(content))
                .await?;
            info!(ap_id, changed, "Processed content update");
        }
        actor_type if ACTOR_TYPES.contains(&actor_type) => {
            // Profile update: refresh the cached actor. Best effort; a
            // failed refresh keeps the old profile.
            if let Err(e) = h.resolver.refresh(&verified.ap_id).await {
                warn!(ap_id = %verified.ap_id, error = %e, "Actor refresh after Update failed");
            }
        }
        other => {
            debug!(object_type = other, "Ignoring Update of unhandled object type");
        }
    }

    Ok(HandleOutcome::default())
}
