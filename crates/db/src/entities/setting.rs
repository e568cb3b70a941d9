//! Settings entity (key/value store the federation core reads).
//!
//! Keys used by the core: `ap_federation_mode`, `ap_domain_blocklist`,
//! `ap_domain_allowlist`, `ap_blocklist_audit_url`, `ap_site_public_key`,
//! `ap_site_private_key_encrypted`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A single site setting.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "settings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,

    #[sea_orm(column_type = "Text")]
    pub value: String,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
