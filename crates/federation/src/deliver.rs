//! Single-shot signed delivery to a remote inbox.
//!
//! Shared by the delivery worker (queued jobs) and the task pool
//! (immediate Accept sends). Signing key selection follows the actor-URI
//! shape: `/ap/users/…`, `/ap/boards/…` and `/ap/site` map onto the
//! matching keypair.

use driftwood_common::AppError;
use tracing::debug;
use url::Url;

use crate::keystore::KeyStore;
use crate::safe_http::{SafeHttpClient, SafeHttpError};

/// Why a single delivery attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("inbox URL is invalid: {0}")]
    InvalidInbox(String),
    #[error("no signing key for {0}")]
    NoSigningKey(String),
    #[error("inbox returned HTTP {0}")]
    HttpStatus(u16),
    #[error(transparent)]
    Http(#[from] SafeHttpError),
    #[error(transparent)]
    App(#[from] AppError),
}

/// Signs and posts one activity to one inbox.
#[derive(Clone)]
pub struct Deliverer {
    http: SafeHttpClient,
    keystore: KeyStore,
}

impl Deliverer {
    /// Create a deliverer.
    #[must_use]
    pub const fn new(http: SafeHttpClient, keystore: KeyStore) -> Self {
        Self { http, keystore }
    }

    /// Sign `activity_json` with the key of `signer_uri` and POST it.
    ///
    /// Success is any 2xx status; everything else is an error for the
    /// caller's retry machinery.
    pub async fn deliver(
        &self,
        inbox_url: &str,
        activity_json: &str,
        signer_uri: &str,
    ) -> Result<(), DeliveryError> {
        let url = Url::parse(inbox_url)
            .map_err(|_| DeliveryError::InvalidInbox(inbox_url.to_string()))?;

        let signer = self
            .keystore
            .signer_for_actor(signer_uri)
            .await
            .map_err(|_| DeliveryError::NoSigningKey(signer_uri.to_string()))?;

        debug!(inbox = %inbox_url, signer = %signer_uri, "Delivering activity");
        let response = self
            .http
            .post_signed(&url, activity_json.as_bytes().to_vec(), &signer)
            .await?;

        if response.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::HttpStatus(response.status))
        }
    }
}
