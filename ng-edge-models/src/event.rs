use crate::identity::ServiceIdentity;
use downcast_rs::{impl_downcast, DowncastSync};
use ng_edge_macros::Event;

impl_downcast!(sync EdgeEvent);

/// Trait that all events must implement
pub trait EdgeEvent: DowncastSync + Send + Sync + 'static {}

/// An identity in the device-scope cache changed content or appeared.
#[derive(Debug, Clone, Event)]
pub struct ServiceIdentityUpdated {
    pub identity: ServiceIdentity,
}

/// An identity disappeared from the remote source and was evicted.
#[derive(Debug, Clone, Event)]
pub struct ServiceIdentityRemoved {
    pub id: String,
}

/// A device proxy became the active connection for an identity.
#[derive(Debug, Clone, Event)]
pub struct DeviceConnected {
    pub id: String,
}

/// The active device proxy for an identity was closed or removed.
#[derive(Debug, Clone, Event)]
pub struct DeviceDisconnected {
    pub id: String,
}

/// A cloud proxy became the active upstream connection for an identity.
#[derive(Debug, Clone, Event)]
pub struct CloudConnectionEstablished {
    pub id: String,
}

/// The active cloud proxy for an identity was closed or removed.
#[derive(Debug, Clone, Event)]
pub struct CloudConnectionLost {
    pub id: String,
}

/// Event bus statistics for diagnostics.
#[derive(Debug, Default, Clone)]
pub struct EventStats {
    pub total_events: u64,
    pub successful_handlers: u64,
    pub failed_handlers: u64,
}

/// Event bus configuration
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    pub channel_capacity: usize,
    pub enable_tracing: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            enable_tracing: true,
        }
    }
}
