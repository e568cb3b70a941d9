//! Inbound Move (account migration).

use driftwood_common::{AppError, AppResult};
use driftwood_db::entities::remote_actor;
use serde_json::Value;
use tracing::info;

use super::{HandleOutcome, InboxHandler};

/// Migrate this actor's local followers to its new account.
///
/// The new actor resolves through the regular resolver, so SSRF policy
/// and domain blocks apply; a blocked or unreachable target aborts the
/// migration with no rows moved. Soft-deleted content stays behind.
pub(super) async fn handle(
    h: &InboxHandler,
    activity: &Value,
    verified: &remote_actor::Model,
) -> AppResult<HandleOutcome> {
    let Some(target_uri) = activity.get("target").and_then(Value::as_str) else {
        return Err(AppError::Validation(
            "Move has no target actor URI".to_string(),
        ));
    };

    let new_actor = h
        .resolver
        .resolve(target_uri)
        .await
        .map_err(|e| e.warned(target_uri))?;

    let migrated = h.followers.migrate_to(&verified.id, &new_actor).await?;
    info!(
        from = %verified.ap_id,
        to = %new_actor.ap_id,
        migrated,
        "Migrated followers after Move"
    );

    Ok(HandleOutcome::default())
}
