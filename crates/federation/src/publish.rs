//! Outbound activity builders and fan-out.
//!
//! Builders are pure functions from local entities to ActivityStreams
//! JSON; the [`Publisher`] chains them into the durable delivery queue.
//! Delivery failures never surface here; a publish call succeeds once
//! the jobs are enqueued.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use driftwood_common::{AppResult, IdGenerator};
use driftwood_db::repositories::{DeliveryJobRepository, FollowerRepository};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::info;
use url::Url;

use crate::content::ContentApi;
use crate::keystore::KeySubject;
use crate::protocol::{AS_CONTEXT, AS_PUBLIC};

/// Maximum article summary length, ellipsis included.
const MAX_SUMMARY_LEN: usize = 501;

static HASHTAG_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    let re = Regex::new(r"(^|[\s(>])#([A-Za-z0-9_][A-Za-z0-9_-]*)").unwrap();
    re
});

/// An article as the publisher needs it.
#[derive(Debug, Clone)]
pub struct OutboundArticle {
    pub uri: String,
    pub title: String,
    pub body_html: String,
    /// Raw markdown source; hashtags and the summary derive from it.
    pub body_markdown: String,
    /// Target board actor URIs (also added to `cc`).
    pub board_uris: Vec<String>,
    pub published_at: DateTime<Utc>,
}

/// A note (comment or short post) as the publisher needs it.
#[derive(Debug, Clone)]
pub struct OutboundNote {
    pub uri: String,
    pub body_html: String,
    pub in_reply_to: Option<String>,
    pub published_at: DateTime<Utc>,
}

/// A poll as the publisher needs it.
#[derive(Debug, Clone)]
pub struct OutboundQuestion {
    pub uri: String,
    pub body_html: String,
    pub options: Vec<String>,
    pub multiple_choice: bool,
    pub closes_at: Option<DateTime<Utc>>,
    pub published_at: DateTime<Utc>,
}

/// Builds outbound ActivityStreams JSON.
#[derive(Clone)]
pub struct ActivityBuilder {
    base_url: Url,
    id_gen: IdGenerator,
}

impl ActivityBuilder {
    /// Create a builder for this instance.
    #[must_use]
    pub const fn new(base_url: Url) -> Self {
        Self {
            base_url,
            id_gen: IdGenerator::new(),
        }
    }

    /// Base URL of this instance.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `<actor_uri>#<verb>-<unique>`
    fn activity_id(&self, actor_uri: &str, verb: &str) -> String {
        format!("{actor_uri}#{verb}-{}", self.id_gen.generate_token())
    }

    fn followers_uri(actor_uri: &str) -> String {
        format!("{actor_uri}/followers")
    }

    /// Create(Article) with public addressing, hashtags and board ccs.
    #[must_use]
    pub fn create_article(&self, actor_uri: &str, article: &OutboundArticle) -> Value {
        let object = self.article_object(actor_uri, article);
        self.wrap_public(actor_uri, "create", "Create", object, &article.board_uris)
    }

    /// Update(Article), same object shape with an `updated` stamp.
    #[must_use]
    pub fn update_article(&self, actor_uri: &str, article: &OutboundArticle) -> Value {
        let mut object = self.article_object(actor_uri, article);
        object["updated"] = json!(Utc::now().to_rfc3339());
        self.wrap_public(actor_uri, "update", "Update", object, &article.board_uris)
    }

    fn article_object(&self, actor_uri: &str, article: &OutboundArticle) -> Value {
        let tags: Vec<Value> = extract_hashtags(&article.body_markdown)
            .into_iter()
            .map(|tag| {
                json!({
                    "type": "Hashtag",
                    "href": format!("{}tags/{}", self.base_url, tag.to_lowercase()),
                    "name": format!("#{tag}"),
                })
            })
            .collect();

        json!({
            "id": article.uri,
            "type": "Article",
            "attributedTo": actor_uri,
            "name": article.title,
            "content": article.body_html,
            "summary": truncate_summary(&article.body_markdown),
            "mediaType": "text/html",
            "published": article.published_at.to_rfc3339(),
            "tag": tags,
            "to": [AS_PUBLIC],
            "cc": article.board_uris.clone(),
        })
    }

    /// Create(Note).
    #[must_use]
    pub fn create_note(&self, actor_uri: &str, note: &OutboundNote) -> Value {
        let mut object = json!({
            "id": note.uri,
            "type": "Note",
            "attributedTo": actor_uri,
            "content": note.body_html,
            "published": note.published_at.to_rfc3339(),
            "to": [AS_PUBLIC],
            "cc": [Self::followers_uri(actor_uri)],
        });
        if let Some(ref parent) = note.in_reply_to {
            object["inReplyTo"] = json!(parent);
        }
        self.wrap_public(actor_uri, "create", "Create", object, &[])
    }

    /// Update(Note).
    #[must_use]
    pub fn update_note(&self, actor_uri: &str, note: &OutboundNote) -> Value {
        let mut object = json!({
            "id": note.uri,
            "type": "Note",
            "attributedTo": actor_uri,
            "content": note.body_html,
            "published": note.published_at.to_rfc3339(),
            "updated": Utc::now().to_rfc3339(),
            "to": [AS_PUBLIC],
            "cc": [Self::followers_uri(actor_uri)],
        });
        if let Some(ref parent) = note.in_reply_to {
            object["inReplyTo"] = json!(parent);
        }
        self.wrap_public(actor_uri, "update", "Update", object, &[])
    }

    /// Create(Question): a poll, as an extension of Create.
    #[must_use]
    pub fn create_question(&self, actor_uri: &str, question: &OutboundQuestion) -> Value {
        let options: Vec<Value> = question
            .options
            .iter()
            .map(|name| {
                json!({
                    "type": "Note",
                    "name": name,
                    "replies": {"type": "Collection", "totalItems": 0},
                })
            })
            .collect();

        let mut object = json!({
            "id": question.uri,
            "type": "Question",
            "attributedTo": actor_uri,
            "content": question.body_html,
            "published": question.published_at.to_rfc3339(),
            "to": [AS_PUBLIC],
            "cc": [Self::followers_uri(actor_uri)],
        });
        let key = if question.multiple_choice {
            "anyOf"
        } else {
            "oneOf"
        };
        object[key] = Value::Array(options);
        if let Some(closes) = question.closes_at {
            object["endTime"] = json!(closes.to_rfc3339());
        }
        self.wrap_public(actor_uri, "create", "Create", object, &[])
    }

    /// Update(actor), sent to followers after a key rotation or profile
    /// change.
    #[must_use]
    pub fn update_actor(&self, subject: &KeySubject, public_key_pem: &str) -> Value {
        let actor_uri = subject.actor_uri(&self.base_url);
        let actor_type = match subject {
            KeySubject::User(_) => "Person",
            KeySubject::Board(_) => "Group",
            KeySubject::Site => "Application",
        };
        let object = json!({
            "id": actor_uri,
            "type": actor_type,
            "publicKey": {
                "id": subject.key_id(&self.base_url),
                "owner": actor_uri,
                "publicKeyPem": public_key_pem,
            },
        });

        json!({
            "@context": AS_CONTEXT,
            "id": self.activity_id(&actor_uri, "update"),
            "type": "Update",
            "actor": actor_uri,
            "object": object,
            "to": [AS_PUBLIC],
            "cc": [Self::followers_uri(&actor_uri)],
        })
    }

    /// Delete with a Tombstone carrying `formerType`.
    #[must_use]
    pub fn delete(&self, actor_uri: &str, object_uri: &str, former_type: &str) -> Value {
        json!({
            "@context": AS_CONTEXT,
            "id": self.activity_id(actor_uri, "delete"),
            "type": "Delete",
            "actor": actor_uri,
            "object": {
                "id": object_uri,
                "type": "Tombstone",
                "formerType": former_type,
            },
            "to": [AS_PUBLIC],
            "cc": [Self::followers_uri(actor_uri)],
        })
    }

    /// Announce of an article by its board actor.
    #[must_use]
    pub fn announce(&self, board_actor_uri: &str, article_uri: &str) -> Value {
        json!({
            "@context": AS_CONTEXT,
            "id": self.activity_id(board_actor_uri, "announce"),
            "type": "Announce",
            "actor": board_actor_uri,
            "object": article_uri,
            "to": [AS_PUBLIC],
            "cc": [Self::followers_uri(board_actor_uri)],
        })
    }

    /// Follow of a remote actor.
    #[must_use]
    pub fn follow(&self, actor_uri: &str, target_uri: &str) -> Value {
        json!({
            "@context": AS_CONTEXT,
            "id": self.activity_id(actor_uri, "follow"),
            "type": "Follow",
            "actor": actor_uri,
            "object": target_uri,
        })
    }

    /// Accept of an inbound Follow; the object is the original activity.
    #[must_use]
    pub fn accept(&self, actor_uri: &str, follow_activity: &Value) -> Value {
        json!({
            "@context": AS_CONTEXT,
            "id": self.activity_id(actor_uri, "accept"),
            "type": "Accept",
            "actor": actor_uri,
            "object": follow_activity,
        })
    }

    /// Undo of an earlier activity (Follow, Block, Like or Announce),
    /// embedding enough of the original for peers to match it.
    #[must_use]
    pub fn undo(
        &self,
        actor_uri: &str,
        inner_type: &str,
        inner_ap_id: &str,
        inner_object: &str,
    ) -> Value {
        json!({
            "@context": AS_CONTEXT,
            "id": self.activity_id(actor_uri, "undo"),
            "type": "Undo",
            "actor": actor_uri,
            "object": {
                "id": inner_ap_id,
                "type": inner_type,
                "actor": actor_uri,
                "object": inner_object,
            },
        })
    }

    /// Block of a remote actor.
    #[must_use]
    pub fn block(&self, actor_uri: &str, target_uri: &str) -> Value {
        json!({
            "@context": AS_CONTEXT,
            "id": self.activity_id(actor_uri, "block"),
            "type": "Block",
            "actor": actor_uri,
            "object": target_uri,
        })
    }

    /// Flag (moderation report), sent by the site actor.
    #[must_use]
    pub fn flag(&self, content: &str, object_uris: &[String]) -> Value {
        let site_uri = KeySubject::Site.actor_uri(&self.base_url);
        json!({
            "@context": AS_CONTEXT,
            "id": self.activity_id(&site_uri, "flag"),
            "type": "Flag",
            "actor": site_uri,
            "content": content,
            "object": object_uris,
        })
    }

    /// Create(Note) as a direct message: addressed to the recipient only,
    /// with a Mention tag and the conversation threading fields.
    #[must_use]
    pub fn dm_note(
        &self,
        actor_uri: &str,
        recipient_uri: &str,
        note_uri: &str,
        body_html: &str,
        conversation: &str,
    ) -> Value {
        json!({
            "@context": AS_CONTEXT,
            "id": self.activity_id(actor_uri, "create"),
            "type": "Create",
            "actor": actor_uri,
            "to": [recipient_uri],
            "object": {
                "id": note_uri,
                "type": "Note",
                "attributedTo": actor_uri,
                "content": body_html,
                "to": [recipient_uri],
                "tag": [{
                    "type": "Mention",
                    "href": recipient_uri,
                }],
                "context": conversation,
                "conversation": conversation,
                "published": Utc::now().to_rfc3339(),
            },
        })
    }

    fn wrap_public(
        &self,
        actor_uri: &str,
        verb: &str,
        activity_type: &str,
        object: Value,
        extra_cc: &[String],
    ) -> Value {
        let mut cc = vec![Self::followers_uri(actor_uri)];
        cc.extend(extra_cc.iter().cloned());
        json!({
            "@context": AS_CONTEXT,
            "id": self.activity_id(actor_uri, verb),
            "type": activity_type,
            "actor": actor_uri,
            "object": object,
            "to": [AS_PUBLIC],
            "cc": cc,
        })
    }
}

/// Hashtags in markdown, skipping fenced blocks and inline code.
#[must_use]
pub fn extract_hashtags(markdown: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let mut seen = HashSet::new();
    let mut in_fence = false;

    for line in markdown.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }

        let outside_code = strip_inline_code(line);
        for capture in HASHTAG_RE.captures_iter(&outside_code) {
            let tag = &capture[2];
            if seen.insert(tag.to_lowercase()) {
                tags.push(tag.to_string());
            }
        }
    }

    tags
}

/// Keep only the segments of a line outside backtick spans.
fn strip_inline_code(line: &str) -> String {
    line.split('`')
        .enumerate()
        .filter_map(|(i, part)| (i % 2 == 0).then_some(part))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncate a summary to 501 characters, ellipsis included.
#[must_use]
pub fn truncate_summary(text: &str) -> String {
    if text.chars().count() <= MAX_SUMMARY_LEN {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(MAX_SUMMARY_LEN - 1).collect();
    truncated.push('…');
    truncated
}

/// Chains builders into the delivery queue.
#[derive(Clone)]
pub struct Publisher {
    builder: ActivityBuilder,
    followers: FollowerRepository,
    jobs: DeliveryJobRepository,
    content: Arc<dyn ContentApi>,
}

impl Publisher {
    /// Create a publisher.
    #[must_use]
    pub fn new(
        builder: ActivityBuilder,
        followers: FollowerRepository,
        jobs: DeliveryJobRepository,
        content: Arc<dyn ContentApi>,
    ) -> Self {
        Self {
            builder,
            followers,
            jobs,
            content,
        }
    }

    /// The activity builder.
    #[must_use]
    pub const fn builder(&self) -> &ActivityBuilder {
        &self.builder
    }

    /// Enqueue an activity for every follower inbox of a local actor
    /// (shared inbox preferred). Returns the number of new jobs.
    pub async fn enqueue_for_followers(
        &self,
        activity: &Value,
        actor_uri: &str,
    ) -> AppResult<usize> {
        let inboxes = self.followers.follower_inboxes(actor_uri).await?;
        let created = self
            .jobs
            .enqueue(&activity.to_string(), actor_uri, &inboxes)
            .await?;
        info!(actor = %actor_uri, inboxes = inboxes.len(), created, "Enqueued for followers");
        Ok(created)
    }

    /// Enqueue an article activity for the author's followers plus the
    /// followers of each publicly visible target board, deduplicated
    /// across both sets.
    pub async fn enqueue_for_article(
        &self,
        activity: &Value,
        actor_uri: &str,
        board_uris: &[String],
    ) -> AppResult<usize> {
        let mut inboxes = self.followers.follower_inboxes(actor_uri).await?;

        for board_uri in board_uris {
            let Some(board) = self.content.resolve_board(board_uri).await? else {
                continue;
            };
            if !board.public {
                continue;
            }
            inboxes.extend(self.followers.follower_inboxes(board_uri).await?);
        }

        let created = self
            .jobs
            .enqueue(&activity.to_string(), actor_uri, &inboxes)
            .await?;
        info!(actor = %actor_uri, inboxes = inboxes.len(), created, "Enqueued for article");
        Ok(created)
    }

    /// Announce a keypair rotation to followers via Update(actor).
    pub async fn publish_key_rotation(
        &self,
        subject: &KeySubject,
        public_key_pem: &str,
    ) -> AppResult<usize> {
        let activity = self.builder.update_actor(subject, public_key_pem);
        let actor_uri = subject.actor_uri(self.builder.base_url());
        self.enqueue_for_followers(&activity, &actor_uri).await
    }

    /// Enqueue a direct message for the recipient's inbox only.
    pub async fn publish_dm(
        &self,
        activity: &Value,
        actor_uri: &str,
        recipient_inbox: &str,
    ) -> AppResult<usize> {
        self.jobs
            .enqueue(
                &activity.to_string(),
                actor_uri,
                &[recipient_inbox.to_string()],
            )
            .await
    }
}
