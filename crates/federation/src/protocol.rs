//! ActivityStreams protocol helpers.
//!
//! Inbound activity fields come in several shapes (`object` may be a bare
//! URI, an embedded object or an array; `attributedTo` a string or array).
//! The narrowing functions here enumerate exactly the cases the dispatcher
//! handles; anything else reads as `None` and the caller ignores it.

use serde_json::Value;

/// The ActivityStreams JSON-LD context.
pub const AS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

/// Public addressing marker.
pub const AS_PUBLIC: &str = "https://www.w3.org/ns/activitystreams#Public";

/// The activity `type` as a string, if present.
#[must_use]
pub fn activity_type(activity: &Value) -> Option<&str> {
    activity.get("type").and_then(Value::as_str)
}

/// The activity `id` as a string, if present.
#[must_use]
pub fn activity_id(activity: &Value) -> Option<&str> {
    activity.get("id").and_then(Value::as_str)
}

/// The activity `actor` as a string, if present.
#[must_use]
pub fn activity_actor(activity: &Value) -> Option<&str> {
    activity.get("actor").and_then(Value::as_str)
}

/// Narrow an `object` field to an id URI.
///
/// Handles the bare-string form, the embedded-map form (Lemmy announces an
/// embedded object map) and takes the first usable entry of an array.
#[must_use]
pub fn object_id(object: &Value) -> Option<&str> {
    match object {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get("id").and_then(Value::as_str),
        Value::Array(items) => items.iter().find_map(object_id),
        _ => None,
    }
}

/// The embedded object map, when `object` carries one.
#[must_use]
pub fn object_map(object: &Value) -> Option<&serde_json::Map<String, Value>> {
    object.as_object()
}

/// The `type` of an embedded object, if any.
#[must_use]
pub fn object_type(object: &Value) -> Option<&str> {
    object.get("type").and_then(Value::as_str)
}

/// Narrow `attributedTo` to a single URI: the string form directly, or the
/// first string entry of the array form (peers interleave key and actor
/// objects with the author URI; only bare strings count).
#[must_use]
pub fn attributed_to(object: &Value) -> Option<&str> {
    match object.get("attributedTo") {
        Some(Value::String(s)) => Some(s.as_str()),
        Some(Value::Array(items)) => items.iter().find_map(Value::as_str),
        _ => None,
    }
}

/// Collect an addressing field (`to` / `cc` / `audience`) into URIs.
#[must_use]
pub fn addressing(value: Option<&Value>) -> Vec<&str> {
    match value {
        Some(Value::String(s)) => vec![s.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

/// All recipient URIs of an activity: `to` + `cc` + `audience`.
#[must_use]
pub fn all_recipients(activity: &Value) -> Vec<&str> {
    let mut recipients = addressing(activity.get("audience"));
    recipients.extend(addressing(activity.get("to")));
    recipients.extend(addressing(activity.get("cc")));
    recipients
}

/// Whether an activity is publicly addressed (`as:Public` in to/cc).
#[must_use]
pub fn is_public(activity: &Value) -> bool {
    all_recipients(activity)
        .iter()
        .any(|r| *r == AS_PUBLIC || *r == "as:Public" || *r == "Public")
}
