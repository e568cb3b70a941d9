//! Inbound Flag (remote moderation report).

use driftwood_common::AppResult;
use driftwood_db::entities::remote_actor;
use serde_json::Value;
use tracing::{debug, info};

use super::{HandleOutcome, InboxHandler};
use crate::protocol;
use crate::sanitize::sanitize_display_name;

pub(super) async fn handle(
    h: &InboxHandler,
    activity: &Value,
    verified: &remote_actor::Model,
) -> AppResult<HandleOutcome> {
    let Some(content) = activity.get("content").and_then(Value::as_str) else {
        debug!("Ignoring Flag without string content");
        return Ok(HandleOutcome::default());
    };

    // `object` lists what is being reported; local articles/comments among
    // the URIs get linked by the content layer.
    let object_uris: Vec<String> = protocol::addressing(activity.get("object"))
        .into_iter()
        .map(String::from)
        .collect();

    h.content
        .create_report(&verified.id, &sanitize_display_name(content), &object_uris)
        .await?;
    info!(
        reporter = %verified.ap_id,
        objects = object_uris.len(),
        "Stored remote moderation report"
    );

    Ok(HandleOutcome::default())
}
