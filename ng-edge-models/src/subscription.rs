use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// A named class of cloud-pushed notification a connected client has opted
/// into.
///
/// `ModuleMessages`, `TwinResponse` and `Unknown` are bookkeeping-only:
/// they are recorded against the identity but there is nothing to push to
/// the cloud side for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceSubscription {
    /// Cloud-to-device messages.
    C2D,
    /// Desired-property (twin) update notifications.
    DesiredPropertyUpdates,
    /// Direct method invocations.
    Methods,
    /// Module-to-module messages, routed locally.
    ModuleMessages,
    /// Twin read responses, routed locally.
    TwinResponse,
    /// Unrecognized subscription kind reported by a protocol head.
    Unknown,
}

impl Display for DeviceSubscription {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DeviceSubscription::C2D => "C2D",
            DeviceSubscription::DesiredPropertyUpdates => "DesiredPropertyUpdates",
            DeviceSubscription::Methods => "Methods",
            DeviceSubscription::ModuleMessages => "ModuleMessages",
            DeviceSubscription::TwinResponse => "TwinResponse",
            DeviceSubscription::Unknown => "Unknown",
        };
        write!(f, "{name}")
    }
}
