//! Common utilities and shared types for the driftwood federation core.

pub mod config;
pub mod crypto;
pub mod error;
pub mod http_signature;
pub mod id;
pub mod task_pool;
pub mod vault;

pub use config::{Config, FederationConfig, InstanceConfig};
pub use crypto::{generate_rsa_keypair, parse_private_key, parse_public_key, RsaKeypair};
pub use error::{AppError, AppResult};
pub use http_signature::{
    calculate_digest, http_date, verify_digest, RequestSigner, SignatureHeader, VerifyError,
};
pub use id::IdGenerator;
pub use task_pool::TaskPool;
pub use vault::{KeyVault, VaultError};
