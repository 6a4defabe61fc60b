//! Identity and connection core of the NG Edge Hub.
//!
//! Owns the device-scope identity cache with its persistent mirror and
//! hierarchy index, the per-identity device/cloud connection registry, the
//! subscription reconciler and the direct-method plumbing. Protocol heads
//! and cloud transports plug in through the traits in `ng-edge-models`.

pub mod cache;
pub mod commands;
pub mod connection;
pub mod lock;
pub mod method;
pub mod subscription;
pub mod tree;

pub use cache::NGIdentityCache;
pub use commands::{EdgeCommandHandler, EdgeCommandRegistry, RefreshIdentitiesHandler};
pub use connection::NGConnectionManager;
pub use method::InvokeMethodHandler;
pub use subscription::SubscriptionProcessor;
pub use tree::ServiceIdentityTree;
