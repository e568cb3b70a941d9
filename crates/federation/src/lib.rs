//! `ActivityPub` federation core for driftwood.
//!
//! Inbound: signed peer POSTs are verified, validated, sanitized and
//! dispatched into the local content and social graph. Outbound: local
//! events become signed activities fanned out to follower inboxes through
//! the durable delivery queue.

pub mod content;
pub mod deliver;
pub mod domain_policy;
pub mod endpoints;
pub mod inbox;
pub mod keystore;
pub mod protocol;
pub mod publish;
pub mod resolver;
pub mod safe_http;
pub mod sanitize;
pub mod stale;
pub mod validate;

pub use content::{ContentApi, ParentRef};
pub use deliver::{Deliverer, DeliveryError};
pub use domain_policy::{DomainPolicy, FederationMode};
pub use inbox::{HandleOutcome, InboxHandler, InboxTarget, OutboundDelivery};
pub use keystore::{ActorKeyBackend, KeyStore, KeySubject, StoredKeyMaterial};
pub use publish::{ActivityBuilder, Publisher};
pub use resolver::{ActorResolver, ResolveError};
pub use safe_http::{HttpTransport, SafeHttpClient, SafeHttpError, SafeResponse};
pub use stale::{CleanupReport, StaleCleaner};
