//! Inbound activity dispatcher.
//!
//! `handle` takes an already signature-verified activity, runs the
//! pre-dispatch gate and routes by `(activity type, object kind)`. Every
//! handler is idempotent: storage writes are conditioned on the object's
//! unique AP id and a duplicate reads as success. Side effects that must
//! outlive the request (the Accept reply to a Follow) come back as
//! [`OutboundDelivery`] values for the caller's task pool.

#![allow(missing_docs)]

mod accept_reject;
mod announce;
mod create;
mod delete;
mod flag;
mod follow;
mod like;
mod move_activity;
mod undo;
mod update;

use std::sync::Arc;

use driftwood_common::{AppError, AppResult};
use driftwood_db::entities::remote_actor;
use driftwood_db::repositories::{FollowRepository, FollowerRepository};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::content::ContentApi;
use crate::domain_policy::DomainPolicy;
use crate::protocol;
use crate::publish::ActivityBuilder;
use crate::resolver::ActorResolver;
use crate::validate;

/// Which inbox received the activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxTarget {
    /// The instance shared inbox.
    Shared,
    /// A user inbox, by username.
    User(String),
    /// A board inbox, by slug.
    Board(String),
}

/// A delivery the caller must hand to the background task pool.
#[derive(Debug, Clone)]
pub struct OutboundDelivery {
    pub inbox_url: String,
    pub activity: Value,
    pub signer_uri: String,
}

/// What a handled activity asks the caller to do next.
#[derive(Debug, Default)]
pub struct HandleOutcome {
    pub deliveries: Vec<OutboundDelivery>,
}

impl HandleOutcome {
    fn none() -> Self {
        Self::default()
    }
}

/// The inbox activity dispatcher.
#[derive(Clone)]
pub struct InboxHandler {
    pub(crate) policy: DomainPolicy,
    pub(crate) followers: FollowerRepository,
    pub(crate) follows: FollowRepository,
    pub(crate) resolver: ActorResolver,
    pub(crate) content: Arc<dyn ContentApi>,
    pub(crate) builder: ActivityBuilder,
    pub(crate) base_url: Url,
    pub(crate) max_content_size: usize,
}

impl InboxHandler {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(
        policy: DomainPolicy,
        followers: FollowerRepository,
        follows: FollowRepository,
        resolver: ActorResolver,
        content: Arc<dyn ContentApi>,
        builder: ActivityBuilder,
        base_url: Url,
        max_content_size: usize,
    ) -> Self {
        Self {
            policy,
            followers,
            follows,
            resolver,
            content,
            builder,
            base_url,
            max_content_size,
        }
    }

    /// Handle one verified activity.
    ///
    /// `verified` is the remote actor whose signature authenticated the
    /// request; the gate refuses activities claiming any other actor.
    pub async fn handle(
        &self,
        activity: &Value,
        verified: &remote_actor::Model,
        target: &InboxTarget,
    ) -> AppResult<HandleOutcome> {
        self.gate(activity, verified)?;

        let activity_type = protocol::activity_type(activity).unwrap_or_default();
        debug!(
            activity_type,
            actor = %verified.ap_id,
            ?target,
            "Dispatching inbox activity"
        );

        match activity_type {
            "Follow" => follow::handle(self, activity, verified, target).await,
            "Undo" => undo::handle(self, activity, verified).await,
            "Create" => create::handle(self, activity, verified).await,
            "Like" => like::handle(self, activity, verified).await,
            "Announce" => announce::handle(self, activity, verified).await,
            "Update" => update::handle(self, activity, verified).await,
            "Delete" => delete::handle(self, activity, verified).await,
            "Accept" => accept_reject::handle(self, activity, true).await,
            "Reject" => accept_reject::handle(self, activity, false).await,
            "Flag" => flag::handle(self, activity, verified).await,
            "Move" => move_activity::handle(self, activity, verified).await,
            "Block" => {
                info!(actor = %verified.ap_id, "Remote Block received (no local effect)");
                Ok(HandleOutcome::none())
            }
            other => {
                info!(activity_type = other, actor = %verified.ap_id, "Ignoring unknown activity type");
                Ok(HandleOutcome::none())
            }
        }
    }

    /// Pre-dispatch gate, short-circuiting on the first failure.
    fn gate(&self, activity: &Value, verified: &remote_actor::Model) -> AppResult<()> {
        validate::validate_activity(activity)?;

        if self.policy.is_blocked(&verified.domain) {
            return Err(AppError::Forbidden(format!(
                "domain is blocked: {}",
                verified.domain
            )));
        }

        let actor = protocol::activity_actor(activity).unwrap_or_default();
        if self.is_local_uri(actor) {
            return Err(AppError::Forbidden(
                "activity actor is a local URI".to_string(),
            ));
        }

        if actor != verified.ap_id {
            return Err(AppError::Unauthorized(format!(
                "activity actor {actor} does not match the signing actor {}",
                verified.ap_id
            )));
        }

        Ok(())
    }

    pub(crate) fn is_local_uri(&self, uri: &str) -> bool {
        Url::parse(uri)
            .ok()
            .is_some_and(|url| url.host_str() == self.base_url.host_str())
    }
}
