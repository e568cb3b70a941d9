//! Database entities for the federation core tables.

pub mod board_follow;
pub mod delivery_job;
pub mod follower;
pub mod remote_actor;
pub mod setting;
pub mod user_follow;

pub use board_follow::Entity as BoardFollow;
pub use delivery_job::Entity as DeliveryJob;
pub use follower::Entity as Follower;
pub use remote_actor::Entity as RemoteActor;
pub use setting::Entity as Setting;
pub use user_follow::Entity as UserFollow;
