pub mod chain;
pub mod codec;
pub mod config;
pub mod connector;
pub mod control_plane;
pub mod error;
pub mod ledger;
pub mod notify;
pub mod pubsub;
pub mod session;
pub mod snapshots;
pub mod subscriptions;
pub mod types;

pub mod test_helpers;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;
