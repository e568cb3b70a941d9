//! Actor keypair lifecycle.
//!
//! Every local actor (user, board, the site itself) signs with an RSA-2048
//! keypair. Public keys are stored as plain PEM; private keys are sealed
//! by the [`KeyVault`] before they touch storage. Site keys live in the
//! settings table (blob base64-encoded for string storage); user and board
//! keys live on their own rows behind the [`ActorKeyBackend`] seam.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use driftwood_common::{
    crypto::{generate_rsa_keypair, keypair_matches},
    http_signature::RequestSigner,
    AppError, AppResult, KeyVault,
};
use driftwood_db::repositories::{setting_keys, SettingRepository};
use tracing::info;
use url::Url;

/// A local actor that owns key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySubject {
    /// A user, by username.
    User(String),
    /// A board, by slug.
    Board(String),
    /// The instance-level site actor.
    Site,
}

impl KeySubject {
    /// Map a local actor URI onto its key subject by path shape
    /// (`/ap/users/<name>`, `/ap/boards/<slug>`, `/ap/site`).
    #[must_use]
    pub fn from_actor_uri(base_url: &Url, actor_uri: &str) -> Option<Self> {
        let url = Url::parse(actor_uri).ok()?;
        if url.host_str() != base_url.host_str() {
            return None;
        }
        let path = url.path();
        if let Some(name) = path.strip_prefix("/ap/users/") {
            (!name.is_empty()).then(|| Self::User(name.to_string()))
        } else if let Some(slug) = path.strip_prefix("/ap/boards/") {
            (!slug.is_empty()).then(|| Self::Board(slug.to_string()))
        } else if path == "/ap/site" {
            Some(Self::Site)
        } else {
            None
        }
    }

    /// The actor URI for this subject.
    #[must_use]
    pub fn actor_uri(&self, base_url: &Url) -> String {
        let base = base_url.as_str().trim_end_matches('/');
        match self {
            Self::User(name) => format!("{base}/ap/users/{name}"),
            Self::Board(slug) => format!("{base}/ap/boards/{slug}"),
            Self::Site => format!("{base}/ap/site"),
        }
    }

    /// The key id (`<actor_uri>#main-key`) for this subject.
    #[must_use]
    pub fn key_id(&self, base_url: &Url) -> String {
        format!("{}#main-key", self.actor_uri(base_url))
    }
}

/// Key material as persisted: plain public PEM, vault-sealed private key.
#[derive(Debug, Clone)]
pub struct StoredKeyMaterial {
    pub public_key_pem: String,
    pub private_key_encrypted: Vec<u8>,
}

/// Storage seam for user and board key rows (owned by the host's domain
/// tables, not this crate).
#[async_trait]
pub trait ActorKeyBackend: Send + Sync {
    /// Load the key material for a user or board, if any exists.
    async fn load(&self, subject: &KeySubject) -> AppResult<Option<StoredKeyMaterial>>;
    /// Store (create or replace) the key material for a user or board.
    async fn store(&self, subject: &KeySubject, material: &StoredKeyMaterial) -> AppResult<()>;
}

/// Keypair lifecycle manager.
#[derive(Clone)]
pub struct KeyStore {
    vault: KeyVault,
    backend: Arc<dyn ActorKeyBackend>,
    settings: SettingRepository,
    base_url: Url,
}

impl KeyStore {
    /// Create a key store.
    #[must_use]
    pub fn new(
        vault: KeyVault,
        backend: Arc<dyn ActorKeyBackend>,
        settings: SettingRepository,
        base_url: Url,
    ) -> Self {
        Self {
            vault,
            backend,
            settings,
            base_url,
        }
    }

    /// Base URL of this instance.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Get the public PEM for a subject, generating a keypair on first use.
    /// Idempotent: an existing keypair is never replaced.
    pub async fn ensure_keypair(&self, subject: &KeySubject) -> AppResult<String> {
        if let Some(material) = self.load(subject).await? {
            return Ok(material.public_key_pem);
        }
        let material = self.generate_material()?;
        self.store(subject, &material).await?;
        info!(subject = ?subject, "Generated actor keypair");
        Ok(material.public_key_pem)
    }

    /// The stored public PEM, if a keypair exists.
    pub async fn public_pem(&self, subject: &KeySubject) -> AppResult<Option<String>> {
        Ok(self.load(subject).await?.map(|m| m.public_key_pem))
    }

    /// Decrypt and return the private PEM, if a keypair exists.
    pub async fn private_pem(&self, subject: &KeySubject) -> AppResult<Option<String>> {
        let Some(material) = self.load(subject).await? else {
            return Ok(None);
        };
        let plaintext = self
            .vault
            .decrypt(&material.private_key_encrypted)
            .map_err(|e| AppError::Internal(format!("Key decryption failed: {e}")))?;
        let pem = String::from_utf8(plaintext)
            .map_err(|_| AppError::Internal("Decrypted key is not UTF-8".to_string()))?;
        Ok(Some(pem))
    }

    /// Replace the subject's keypair with fresh material, unconditionally.
    /// Downstream signing picks up the new key on its next load; cached
    /// copies are not purged inline.
    pub async fn rotate_keypair(&self, subject: &KeySubject) -> AppResult<String> {
        let material = self.generate_material()?;
        self.store(subject, &material).await?;
        info!(subject = ?subject, "Rotated actor keypair");
        Ok(material.public_key_pem)
    }

    /// A request signer for the given local actor URI, keyed
    /// `<actor_uri>#main-key`.
    pub async fn signer_for_actor(&self, actor_uri: &str) -> AppResult<RequestSigner> {
        let subject = KeySubject::from_actor_uri(&self.base_url, actor_uri).ok_or_else(|| {
            AppError::BadRequest(format!("Not a local signing actor: {actor_uri}"))
        })?;
        let private_pem = self.private_pem(&subject).await?.ok_or_else(|| {
            AppError::NotFound(format!("No keypair for actor: {actor_uri}"))
        })?;
        RequestSigner::new(&private_pem, subject.key_id(&self.base_url))
    }

    /// A signer for the site actor, or `None` when no site keypair exists.
    pub async fn site_signer(&self) -> AppResult<Option<RequestSigner>> {
        let Some(private_pem) = self.private_pem(&KeySubject::Site).await? else {
            return Ok(None);
        };
        Ok(Some(RequestSigner::new(
            &private_pem,
            KeySubject::Site.key_id(&self.base_url),
        )?))
    }

    fn generate_material(&self) -> AppResult<StoredKeyMaterial> {
        let keypair = generate_rsa_keypair()?;
        let encrypted = self
            .vault
            .encrypt(keypair.private_key_pem.as_bytes())
            .map_err(|e| AppError::Internal(format!("Key encryption failed: {e}")))?;
        debug_assert!(keypair_matches(
            &keypair.public_key_pem,
            &keypair.private_key_pem
        ));
        Ok(StoredKeyMaterial {
            public_key_pem: keypair.public_key_pem,
            private_key_encrypted: encrypted,
        })
    }

    async fn load(&self, subject: &KeySubject) -> AppResult<Option<StoredKeyMaterial>> {
        match subject {
            KeySubject::Site => {
                let Some(public_key_pem) =
                    self.settings.get(setting_keys::SITE_PUBLIC_KEY).await?
                else {
                    return Ok(None);
                };
                let Some(encoded) = self
                    .settings
                    .get(setting_keys::SITE_PRIVATE_KEY_ENCRYPTED)
                    .await?
                else {
                    return Ok(None);
                };
                let private_key_encrypted = BASE64.decode(encoded).map_err(|_| {
                    AppError::Internal("Stored site key blob is not valid base64".to_string())
                })?;
                Ok(Some(StoredKeyMaterial {
                    public_key_pem,
                    private_key_encrypted,
                }))
            }
            _ => self.backend.load(subject).await,
        }
    }

    async fn store(&self, subject: &KeySubject, material: &StoredKeyMaterial) -> AppResult<()> {
        match subject {
            KeySubject::Site => {
                self.settings
                    .set(setting_keys::SITE_PUBLIC_KEY, &material.public_key_pem)
                    .await?;
                self.settings
                    .set(
                        setting_keys::SITE_PRIVATE_KEY_ENCRYPTED,
                        &BASE64.encode(&material.private_key_encrypted),
                    )
                    .await?;
                Ok(())
            }
            _ => self.backend.store(subject, material).await,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory key backend for tests.
    #[derive(Default)]
    pub(crate) struct MemoryKeyBackend {
        keys: Mutex<HashMap<String, StoredKeyMaterial>>,
    }

    fn subject_key(subject: &KeySubject) -> String {
        match subject {
            KeySubject::User(name) => format!("user:{name}"),
            KeySubject::Board(slug) => format!("board:{slug}"),
            KeySubject::Site => "site".to_string(),
        }
    }

    #[async_trait]
    impl ActorKeyBackend for MemoryKeyBackend {
        async fn load(&self, subject: &KeySubject) -> AppResult<Option<StoredKeyMaterial>> {
            Ok(self.keys.lock().unwrap().get(&subject_key(subject)).cloned())
        }

        async fn store(
            &self,
            subject: &KeySubject,
            material: &StoredKeyMaterial,
        ) -> AppResult<()> {
            self.keys
                .lock()
                .unwrap()
                .insert(subject_key(subject), material.clone());
            Ok(())
        }
    }

    fn base() -> Url {
        Url::parse("https://l.ex").unwrap()
    }

    fn keystore() -> KeyStore {
        let db = std::sync::Arc::new(
            sea_orm::MockDatabase::new(sea_orm::DatabaseBackend::Postgres).into_connection(),
        );
        KeyStore::new(
            KeyVault::new("test master secret"),
            Arc::new(MemoryKeyBackend::default()),
            SettingRepository::new(db),
            base(),
        )
    }

    #[test]
    fn test_subject_from_actor_uri() {
        assert_eq!(
            KeySubject::from_actor_uri(&base(), "https://l.ex/ap/users/bob"),
            Some(KeySubject::User("bob".to_string()))
        );
        assert_eq!(
            KeySubject::from_actor_uri(&base(), "https://l.ex/ap/boards/rust"),
            Some(KeySubject::Board("rust".to_string()))
        );
        assert_eq!(
            KeySubject::from_actor_uri(&base(), "https://l.ex/ap/site"),
            Some(KeySubject::Site)
        );
        // Remote actors and unknown paths do not map
        assert_eq!(
            KeySubject::from_actor_uri(&base(), "https://r.ex/ap/users/bob"),
            None
        );
        assert_eq!(
            KeySubject::from_actor_uri(&base(), "https://l.ex/users/bob"),
            None
        );
    }

    #[test]
    fn test_key_id_shape() {
        assert_eq!(
            KeySubject::User("bob".to_string()).key_id(&base()),
            "https://l.ex/ap/users/bob#main-key"
        );
    }

    #[tokio::test]
    async fn test_ensure_keypair_is_idempotent() {
        let store = keystore();
        let subject = KeySubject::User("bob".to_string());

        let first = store.ensure_keypair(&subject).await.unwrap();
        let second = store.ensure_keypair(&subject).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_private_pem_round_trips_through_vault() {
        let store = keystore();
        let subject = KeySubject::User("bob".to_string());

        let public = store.ensure_keypair(&subject).await.unwrap();
        let private = store.private_pem(&subject).await.unwrap().unwrap();

        assert!(private.contains("BEGIN RSA PRIVATE KEY"));
        assert!(keypair_matches(&public, &private));
    }

    #[tokio::test]
    async fn test_rotate_always_generates_new_material() {
        let store = keystore();
        let subject = KeySubject::Board("rust".to_string());

        let first = store.ensure_keypair(&subject).await.unwrap();
        let rotated = store.rotate_keypair(&subject).await.unwrap();

        assert_ne!(first, rotated);
        // The new private key matches the new public key
        let private = store.private_pem(&subject).await.unwrap().unwrap();
        assert!(keypair_matches(&rotated, &private));
    }

    #[tokio::test]
    async fn test_signer_for_unknown_actor_fails() {
        let store = keystore();
        assert!(store
            .signer_for_actor("https://r.ex/u/alice")
            .await
            .is_err());
    }
}
