//! Inbound activity shape validation.

use driftwood_common::{AppError, AppResult};
use serde_json::Value;
use url::Url;

use crate::protocol;

/// Reject a raw payload that exceeds the configured size cap. Runs before
/// JSON parsing so oversized bodies never reach the parser.
pub fn check_payload_size(raw: &[u8], max_payload_size: usize) -> AppResult<()> {
    if raw.len() > max_payload_size {
        return Err(AppError::PayloadTooLarge(format!(
            "activity payload is {} bytes (limit {max_payload_size})",
            raw.len()
        )));
    }
    Ok(())
}

/// Reject content bodies over the configured limit.
pub fn check_content_size(content: &str, max_content_size: usize) -> AppResult<()> {
    if content.len() > max_content_size {
        return Err(AppError::PayloadTooLarge(format!(
            "content is {} bytes (limit {max_content_size})",
            content.len()
        )));
    }
    Ok(())
}

/// Validate the envelope shape of an inbound activity.
///
/// Checks: `id` and `actor` are HTTPS URIs, `type` is a non-empty string,
/// `object` is present unless the type is `Delete`, and `attributedTo` (if
/// present on the embedded object) narrows to a string URI.
pub fn validate_activity(activity: &Value) -> AppResult<()> {
    let id = protocol::activity_id(activity)
        .ok_or_else(|| AppError::Validation("activity has no id".to_string()))?;
    require_https_uri("id", id)?;

    let actor = protocol::activity_actor(activity)
        .ok_or_else(|| AppError::Validation("activity has no actor".to_string()))?;
    require_https_uri("actor", actor)?;

    let activity_type = protocol::activity_type(activity)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Validation("activity has no type".to_string()))?;

    if activity_type != "Delete" && activity.get("object").is_none() {
        return Err(AppError::Validation(format!(
            "{activity_type} activity has no object"
        )));
    }

    if let Some(object) = activity.get("object") {
        if object.get("attributedTo").is_some() && protocol::attributed_to(object).is_none() {
            return Err(AppError::Validation(
                "attributedTo is neither a string nor an array of strings".to_string(),
            ));
        }
    }

    Ok(())
}

/// Require a field to be an HTTPS URI.
pub fn require_https_uri(field: &str, value: &str) -> AppResult<()> {
    let url = Url::parse(value)
        .map_err(|_| AppError::Validation(format!("{field} is not a valid URI: {value}")))?;
    if url.scheme() != "https" {
        return Err(AppError::Validation(format!(
            "{field} is not an https URI: {value}"
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(AppError::Validation(format!("{field} has no host: {value}")));
    }
    Ok(())
}
