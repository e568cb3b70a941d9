//! Background workers for the driftwood federation core.
//!
//! The delivery worker drains the durable outbound queue; the supervisor
//! owns it together with the stale-actor cleanup loop, the domain policy
//! refresh loop and the shared background task pool.

pub mod supervisor;
pub mod worker;

pub use supervisor::FederationSupervisor;
pub use worker::DeliveryWorker;
