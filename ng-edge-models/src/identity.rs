use crate::constants::{EDGE_CAPABILITY, IDENTITY_KEY_SEPARATOR};
use ng_edge_error::EdgeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

/// Identity kind, distinguishing devices from modules hosted on a device.
///
/// Persisted form is tagged by the presence of `moduleId`, so the `Module`
/// variant must be tried first during untagged deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdentityKind {
    Module {
        #[serde(rename = "deviceId")]
        device_id: String,
        #[serde(rename = "moduleId")]
        module_id: String,
    },
    Device {
        #[serde(rename = "deviceId")]
        device_id: String,
    },
}

impl IdentityKind {
    /// Parse a composite identity key (`deviceId` or `deviceId/moduleId`).
    pub fn from_key(key: &str) -> Result<Self, EdgeError> {
        if key.is_empty() {
            return Err(EdgeError::InvalidIdentityKey(key.to_string()));
        }
        match key.split_once(IDENTITY_KEY_SEPARATOR) {
            None => Ok(IdentityKind::Device {
                device_id: key.to_string(),
            }),
            Some((device, module)) if !device.is_empty() && !module.is_empty() => {
                Ok(IdentityKind::Module {
                    device_id: device.to_string(),
                    module_id: module.to_string(),
                })
            }
            Some(_) => Err(EdgeError::InvalidIdentityKey(key.to_string())),
        }
    }

    #[inline]
    pub fn device_id(&self) -> &str {
        match self {
            IdentityKind::Device { device_id } | IdentityKind::Module { device_id, .. } => {
                device_id
            }
        }
    }

    #[inline]
    pub fn module_id(&self) -> Option<&str> {
        match self {
            IdentityKind::Module { module_id, .. } => Some(module_id),
            IdentityKind::Device { .. } => None,
        }
    }
}

impl Display for IdentityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityKind::Device { device_id } => write!(f, "{device_id}"),
            IdentityKind::Module {
                device_id,
                module_id,
            } => write!(f, "{device_id}{IDENTITY_KEY_SEPARATOR}{module_id}"),
        }
    }
}

/// Authentication mechanism attached to a service identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuthenticationMechanism {
    None,
    #[serde(rename = "SAS")]
    Sas {
        #[serde(rename = "primaryKey")]
        primary_key: String,
        #[serde(
            rename = "secondaryKey",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        secondary_key: Option<String>,
    },
    X509Thumbprint {
        #[serde(rename = "primaryThumbprint")]
        primary_thumbprint: String,
        #[serde(
            rename = "secondaryThumbprint",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        secondary_thumbprint: Option<String>,
    },
    CertificateAuthority,
}

/// Registration status of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdentityStatus {
    Enabled,
    Disabled,
}

/// A device or module registration record as reported by the remote
/// identity source.
///
/// Instances are immutable values; every refresh replaces the record
/// wholesale. Equality is structural over all attributes, which is what the
/// cache diffing relies on to fire change events exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceIdentity {
    #[serde(flatten)]
    pub kind: IdentityKind,

    /// Opaque token identifying this identity's position in the trust
    /// hierarchy. Present only for edge-capable identities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_scope: Option<String>,

    /// Scope tokens of the identities that authorize this one, most
    /// immediate parent first. Empty for the hierarchy root.
    #[serde(default)]
    pub parent_scopes: Vec<String>,

    pub generation_id: String,

    #[serde(default)]
    pub capabilities: BTreeSet<String>,

    pub authentication: AuthenticationMechanism,

    pub status: IdentityStatus,
}

impl ServiceIdentity {
    /// Create a minimal enabled device identity.
    pub fn new_device(device_id: impl Into<String>) -> Self {
        Self {
            kind: IdentityKind::Device {
                device_id: device_id.into(),
            },
            device_scope: None,
            parent_scopes: Vec::new(),
            generation_id: "0".to_string(),
            capabilities: BTreeSet::new(),
            authentication: AuthenticationMechanism::None,
            status: IdentityStatus::Enabled,
        }
    }

    /// Create a minimal enabled module identity.
    pub fn new_module(device_id: impl Into<String>, module_id: impl Into<String>) -> Self {
        Self {
            kind: IdentityKind::Module {
                device_id: device_id.into(),
                module_id: module_id.into(),
            },
            ..Self::new_device(String::new())
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.device_scope = Some(scope.into());
        self
    }

    pub fn with_parent_scope(mut self, scope: impl Into<String>) -> Self {
        self.parent_scopes.push(scope.into());
        self
    }

    pub fn with_generation(mut self, generation_id: impl Into<String>) -> Self {
        self.generation_id = generation_id.into();
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn with_authentication(mut self, authentication: AuthenticationMechanism) -> Self {
        self.authentication = authentication;
        self
    }

    pub fn with_status(mut self, status: IdentityStatus) -> Self {
        self.status = status;
        self
    }

    /// Identity key: `deviceId` for devices, `deviceId/moduleId` for modules.
    #[inline]
    pub fn id(&self) -> String {
        self.kind.to_string()
    }

    #[inline]
    pub fn device_id(&self) -> &str {
        self.kind.device_id()
    }

    #[inline]
    pub fn module_id(&self) -> Option<&str> {
        self.kind.module_id()
    }

    #[inline]
    pub fn is_module(&self) -> bool {
        matches!(self.kind, IdentityKind::Module { .. })
    }

    #[inline]
    pub fn is_edge_capable(&self) -> bool {
        self.capabilities.contains(EDGE_CAPABILITY)
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.status == IdentityStatus::Enabled
    }
}
