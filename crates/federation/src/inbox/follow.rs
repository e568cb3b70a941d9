//! Inbound Follow.

use driftwood_common::{AppError, AppResult};
use driftwood_db::entities::remote_actor;
use serde_json::Value;
use tracing::info;

use super::{HandleOutcome, InboxHandler, InboxTarget, OutboundDelivery};
use crate::keystore::KeySubject;
use crate::protocol;

/// Record the follower and schedule an Accept back to the sender.
pub(super) async fn handle(
    h: &InboxHandler,
    activity: &Value,
    verified: &remote_actor::Model,
    target: &InboxTarget,
) -> AppResult<HandleOutcome> {
    let target_uri = match target {
        InboxTarget::User(name) => KeySubject::User(name.clone()).actor_uri(&h.base_url),
        InboxTarget::Board(slug) => KeySubject::Board(slug.clone()).actor_uri(&h.base_url),
        InboxTarget::Shared => activity
            .get("object")
            .and_then(protocol::object_id)
            .ok_or_else(|| AppError::Validation("Follow has no object URI".to_string()))?
            .to_string(),
    };

    if !h.content.local_actor_exists(&target_uri).await? {
        return Err(AppError::NotFound(format!(
            "Follow target is not a local actor: {target_uri}"
        )));
    }

    let activity_id = protocol::activity_id(activity).unwrap_or_default();
    // A duplicate pair is AlreadyExists; the Accept is re-sent either way
    // so a peer that lost our first reply can still converge.
    h.followers
        .create(&target_uri, &verified.ap_id, &verified.id, activity_id)
        .await?;

    info!(
        target = %target_uri,
        follower = %verified.ap_id,
        "Recorded follower"
    );

    let accept = h.builder.accept(&target_uri, activity);
    Ok(HandleOutcome {
        deliveries: vec![OutboundDelivery {
            inbox_url: verified.inbox.clone(),
            activity: accept,
            signer_uri: target_uri,
        }],
    })
}
