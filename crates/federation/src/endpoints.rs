//! HTTP inbox endpoints.
//!
//! Three POST routes (`/ap/inbox`, `/ap/users/{name}/inbox`,
//! `/ap/boards/{slug}/inbox`) share one pipeline: size cap, signature
//! verification (actor resolution runs through [`ActorResolver`], never
//! around it), JSON parsing, then the dispatcher. Accept replies the
//! dispatcher schedules are spawned on the supervisor's task pool.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{OriginalUri, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use driftwood_common::{
    config::FederationConfig,
    http_signature::{self, IncomingRequest, SignatureHeader, VerifyError},
    AppError, TaskPool,
};
use serde_json::Value;
use tracing::{info, warn};

use crate::deliver::Deliverer;
use crate::inbox::{InboxHandler, InboxTarget};
use crate::resolver::ActorResolver;
use crate::validate;

/// Shared state of the inbox endpoints.
#[derive(Clone)]
pub struct FederationState {
    pub handler: Arc<InboxHandler>,
    pub resolver: ActorResolver,
    pub deliverer: Arc<Deliverer>,
    pub task_pool: TaskPool,
    pub config: FederationConfig,
}

/// The federation router, mounted at the application root.
pub fn router(state: FederationState) -> Router {
    Router::new()
        .route("/ap/inbox", post(shared_inbox))
        .route("/ap/users/{username}/inbox", post(user_inbox))
        .route("/ap/boards/{slug}/inbox", post(board_inbox))
        .with_state(state)
}

async fn shared_inbox(
    State(state): State<FederationState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    receive(state, InboxTarget::Shared, &uri, &headers, &body).await
}

async fn user_inbox(
    State(state): State<FederationState>,
    Path(username): Path<String>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    receive(state, InboxTarget::User(username), &uri, &headers, &body).await
}

async fn board_inbox(
    State(state): State<FederationState>,
    Path(slug): Path<String>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    receive(state, InboxTarget::Board(slug), &uri, &headers, &body).await
}

async fn receive(
    state: FederationState,
    target: InboxTarget,
    uri: &axum::http::Uri,
    headers: &HeaderMap,
    body: &Bytes,
) -> Response {
    if !state.config.enabled {
        return StatusCode::NOT_FOUND.into_response();
    }

    match process(&state, target, uri, headers, body).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn process(
    state: &FederationState,
    target: InboxTarget,
    uri: &axum::http::Uri,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<(), AppError> {
    validate::check_payload_size(body, state.config.max_payload_size)?;

    let verified = verify_request(state, uri, headers, body).await?;

    let activity: Value = serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("activity is not valid JSON: {e}")))?;

    let outcome = state.handler.handle(&activity, &verified, &target).await?;

    for delivery in outcome.deliveries {
        let deliverer = Arc::clone(&state.deliverer);
        state.task_pool.spawn("send_accept", async move {
            if let Err(e) = deliverer
                .deliver(
                    &delivery.inbox_url,
                    &delivery.activity.to_string(),
                    &delivery.signer_uri,
                )
                .await
            {
                warn!(inbox = %delivery.inbox_url, error = %e, "Background delivery failed");
            }
        });
    }

    Ok(())
}

/// Full signature verification: header parse, precheck (coverage,
/// algorithm, date window, digest), actor resolution by key id, RSA check.
async fn verify_request(
    state: &FederationState,
    uri: &axum::http::Uri,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<driftwood_db::entities::remote_actor::Model, AppError> {
    let signature_header = headers
        .get("signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| unauthorized(&VerifyError::MissingSignatureHeader))?;

    let sig = SignatureHeader::parse(signature_header).map_err(|e| unauthorized(&e))?;

    let header_map: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect();

    let path_and_query = uri
        .path_and_query()
        .map_or_else(|| uri.path().to_string(), |pq| pq.as_str().to_string());

    let request = IncomingRequest {
        method: "POST",
        path_and_query: &path_and_query,
        headers: &header_map,
        body: Some(body.as_ref()),
    };

    http_signature::precheck(&request, &sig, state.config.signature_max_age_secs)
        .map_err(|e| unauthorized(&e))?;

    // The resolver is the only path to a peer's public key.
    let actor = state
        .resolver
        .resolve_by_key_id(&sig.key_id)
        .await
        .map_err(|e| {
            warn!(key_id = %sig.key_id, error = %e, "Signer resolution failed");
            AppError::Unauthorized(format!("cannot resolve signing actor: {e}"))
        })?;

    http_signature::verify_signature(&request, &sig, &actor.public_key_pem)
        .map_err(|e| unauthorized(&e))?;

    info!(actor = %actor.ap_id, "Verified inbox request signature");
    Ok(actor)
}

fn unauthorized(e: &VerifyError) -> AppError {
    AppError::Unauthorized(e.to_string())
}
