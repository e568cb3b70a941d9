//! Inbound Create (Note, Article, Page, Question).

use driftwood_common::{AppError, AppResult};
use driftwood_db::entities::remote_actor;
use serde_json::Value;
use tracing::{debug, info};

use super::{HandleOutcome, InboxHandler};
use crate::content::{BoardAcceptPolicy, NewDm, NewFeedItem, NewRemoteArticle, NewRemoteComment, ParentRef};
use crate::protocol;
use crate::sanitize::{sanitize_display_name, sanitize_html};
use crate::validate;

/// Route a Create by its object kind:
/// - a Note replying to local content becomes a comment,
/// - a Note privately addressed to a local user becomes a DM,
/// - an Article/Page aimed at a local board lands there,
/// - anything else from a followed sender becomes feed items.
pub(super) async fn handle(
    h: &InboxHandler,
    activity: &Value,
    verified: &remote_actor::Model,
) -> AppResult<HandleOutcome> {
    let Some(object) = activity.get("object").filter(|o| o.is_object()) else {
        debug!("Ignoring Create without an embedded object");
        return Ok(HandleOutcome::default());
    };

    check_attribution(object, verified)?;

    match protocol::object_type(object).unwrap_or_default() {
        "Note" => handle_note(h, activity, object, verified).await,
        "Article" | "Page" => handle_article(h, activity, object, verified).await,
        "Question" => feed_fanout(h, object, verified).await,
        other => {
            debug!(object_type = other, "Ignoring Create of unhandled object type");
            Ok(HandleOutcome::default())
        }
    }
}

/// `attributedTo` must narrow to the signing actor.
fn check_attribution(object: &Value, verified: &remote_actor::Model) -> AppResult<()> {
    if let Some(author) = protocol::attributed_to(object) {
        if author != verified.ap_id {
            return Err(AppError::Unauthorized(format!(
                "object attributed to {author}, signed by {}",
                verified.ap_id
            )));
        }
    }
    Ok(())
}

async fn handle_note(
    h: &InboxHandler,
    activity: &Value,
    object: &Value,
    verified: &remote_actor::Model,
) -> AppResult<HandleOutcome> {
    // Reply to local content: store as a comment.
    if let Some(reply_target) = object.get("inReplyTo").and_then(Value::as_str) {
        if let Some(parent) = h.content.find_parent_by_uri(reply_target).await? {
            let Some(ap_id) = object.get("id").and_then(Value::as_str) else {
                debug!("Ignoring reply Note without id");
                return Ok(HandleOutcome::default());
            };
            let body_html = sanitized_body(h, object)?;
            let (article_id, parent_comment_id) = match parent {
                ParentRef::Article { id, .. } => (id, None),
                ParentRef::Comment { id, article_id, .. } => (article_id, Some(id)),
            };

            h.content
                .create_remote_comment(NewRemoteComment {
                    ap_id: ap_id.to_string(),
                    remote_actor_id: verified.id.clone(),
                    article_id,
                    parent_comment_id,
                    body_html,
                })
                .await?;
            info!(ap_id, "Stored remote comment");
            return Ok(HandleOutcome::default());
        }
    }

    // Privately addressed Note: a direct message.
    if !protocol::is_public(activity) && !addressed_to_followers(activity) {
        for recipient in protocol::all_recipients(activity) {
            let Some(user_id) = h.content.resolve_local_user(recipient).await? else {
                continue;
            };
            if !h.content.dm_allowed(&user_id, &verified.id).await? {
                return Err(AppError::Forbidden(
                    "recipient does not accept direct messages from this actor".to_string(),
                ));
            }
            let Some(ap_id) = object.get("id").and_then(Value::as_str) else {
                debug!("Ignoring DM Note without id");
                return Ok(HandleOutcome::default());
            };
            let body_html = sanitized_body(h, object)?;
            h.content
                .create_dm(NewDm {
                    ap_id: ap_id.to_string(),
                    remote_actor_id: verified.id.clone(),
                    recipient_user_id: user_id,
                    body_html,
                })
                .await?;
            info!(ap_id, "Stored direct message");
            return Ok(HandleOutcome::default());
        }
    }

    feed_fanout(h, object, verified).await
}

async fn handle_article(
    h: &InboxHandler,
    activity: &Value,
    object: &Value,
    verified: &remote_actor::Model,
) -> AppResult<HandleOutcome> {
    // The target board hides among audience/to/cc.
    for candidate in protocol::all_recipients(activity) {
        let Some(board) = h.content.resolve_board(candidate).await? else {
            continue;
        };

        if board.accept_policy == BoardAcceptPolicy::FollowersOnly
            && !h
                .follows
                .has_accepted_board_follow(&board.id, &verified.id)
                .await?
        {
            // Unsolicited post to a followers-only board: dropped, not
            // an error the peer can probe.
            info!(board = %board.uri, actor = %verified.ap_id, "Dropped article for followers-only board");
            return Ok(HandleOutcome::default());
        }

        let Some(ap_id) = object.get("id").and_then(Value::as_str) else {
            debug!("Ignoring article without id");
            return Ok(HandleOutcome::default());
        };
        let title = object
            .get("name")
            .and_then(Value::as_str)
            .map(sanitize_display_name)
            .unwrap_or_default();
        let body_html = sanitized_body(h, object)?;

        h.content
            .create_or_link_article(NewRemoteArticle {
                ap_id: ap_id.to_string(),
                remote_actor_id: verified.id.clone(),
                board_id: board.id,
                title,
                body_html,
            })
            .await?;
        info!(ap_id, board = %board.uri, "Stored remote article");
        return Ok(HandleOutcome::default());
    }

    feed_fanout(h, object, verified).await
}

/// No local target matched: surface the object to every local user who
/// follows the sender.
async fn feed_fanout(
    h: &InboxHandler,
    object: &Value,
    verified: &remote_actor::Model,
) -> AppResult<HandleOutcome> {
    let user_ids = h.follows.user_ids_following(&verified.id).await?;
    if user_ids.is_empty() {
        debug!(actor = %verified.ap_id, "No local followers, object ignored");
        return Ok(HandleOutcome::default());
    }

    let Some(ap_id) = object.get("id").and_then(Value::as_str) else {
        debug!("Ignoring feed object without id");
        return Ok(HandleOutcome::default());
    };
    let item = NewFeedItem {
        ap_id: ap_id.to_string(),
        remote_actor_id: verified.id.clone(),
        title: object
            .get("name")
            .and_then(Value::as_str)
            .map(sanitize_display_name),
        body_html: sanitized_body(h, object)?,
    };

    let fanout = user_ids.len();
    for user_id in user_ids {
        h.content.create_feed_item(&user_id, &item).await?;
    }
    info!(ap_id, fanout, "Stored feed items");
    Ok(HandleOutcome::default())
}

/// Any recipient that is a followers collection.
fn addressed_to_followers(activity: &Value) -> bool {
    protocol::all_recipients(activity)
        .iter()
        .any(|r| r.ends_with("/followers"))
}

/// Sanitize the object content, prepending the content warning when the
/// object is marked sensitive and carries a summary.
fn sanitized_body(h: &InboxHandler, object: &Value) -> AppResult<String> {
    let content = object.get("content").and_then(Value::as_str).unwrap_or_default();
    validate::check_content_size(content, h.max_content_size)?;
    let body = sanitize_html(content);

    let sensitive = object
        .get("sensitive")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if sensitive {
        if let Some(summary) = object.get("summary").and_then(Value::as_str) {
            let warning = sanitize_display_name(summary);
            if !warning.is_empty() {
                return Ok(format!("[CW: {warning}]\n\n{body}"));
            }
        }
    }
    Ok(body)
}
