//! Settings repository.

use std::sync::Arc;

use crate::entities::{setting, Setting};
use driftwood_common::{AppError, AppResult};
use sea_orm::sea_query::OnConflict;
use sea_orm::{DatabaseConnection, EntityTrait, Set};

/// Setting keys the federation core reads and writes.
pub mod setting_keys {
    /// `blocklist` or `allowlist`.
    pub const FEDERATION_MODE: &str = "ap_federation_mode";
    /// Newline-separated blocked domains.
    pub const DOMAIN_BLOCKLIST: &str = "ap_domain_blocklist";
    /// Newline-separated allowed domains.
    pub const DOMAIN_ALLOWLIST: &str = "ap_domain_allowlist";
    /// Optional URL of an external blocklist audit feed.
    pub const BLOCKLIST_AUDIT_URL: &str = "ap_blocklist_audit_url";
    /// Site actor public key PEM.
    pub const SITE_PUBLIC_KEY: &str = "ap_site_public_key";
    /// Site actor private key, vault-encrypted then base64-encoded.
    pub const SITE_PRIVATE_KEY_ENCRYPTED: &str = "ap_site_private_key_encrypted";
}

/// Settings repository for database operations.
#[derive(Clone)]
pub struct SettingRepository {
    db: Arc<DatabaseConnection>,
}

impl SettingRepository {
    /// Create a new settings repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Read a setting value.
    pub async fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(Setting::find_by_id(key)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .map(|row| row.value))
    }

    /// Write a setting value, inserting or replacing.
    pub async fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let model = setting::ActiveModel {
            key: Set(key.to_string()),
            value: Set(value.to_string()),
            updated_at: Set(chrono::Utc::now().into()),
        };

        Setting::insert(model)
            .on_conflict(
                OnConflict::column(setting::Column::Key)
                    .update_columns([setting::Column::Value, setting::Column::UpdatedAt])
                    .to_owned(),
            )
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Remove a setting.
    pub async fn delete(&self, key: &str) -> AppResult<()> {
        Setting::delete_by_id(key)
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}
