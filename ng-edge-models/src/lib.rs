pub mod constants;
pub mod event;
pub mod identity;
pub mod method;
pub mod settings;
pub mod subscription;

use crate::{identity::ServiceIdentity, method::DirectMethodRequest};
use async_trait::async_trait;
use bytes::Bytes;
use ng_edge_error::{EdgeResult, StorageResult};
use std::sync::Arc;

/// One page-by-page pass over the remote identity registry.
///
/// A fresh iterator must be obtained for every refresh cycle; iterators are
/// cursors, not reusable handles.
#[async_trait]
pub trait ServiceIdentitiesIterator: Send {
    /// True while more pages may be fetched in this cycle.
    fn has_next(&self) -> bool;

    /// Fetch the next batch of identities.
    async fn get_next(&mut self) -> EdgeResult<Vec<ServiceIdentity>>;
}

/// Remote, authoritative source of service identities.
#[async_trait]
pub trait ServiceIdentitySource: Send + Sync + 'static {
    /// Begin a full enumeration of all identities in scope.
    async fn iterator(&self) -> EdgeResult<Box<dyn ServiceIdentitiesIterator>>;

    /// Targeted lookup of a single identity. `Ok(None)` means the identity
    /// no longer exists (treated by the cache as a removal, not an error).
    async fn get_identity(
        &self,
        device_id: &str,
        module_id: Option<&str>,
    ) -> EdgeResult<Option<ServiceIdentity>>;
}

/// Persistent key/value mirror of the identity cache.
///
/// Keys are identity ids, values JSON-serialized `ServiceIdentity`
/// documents. The mirror warms the tree on restart; the remote source
/// remains authoritative.
#[async_trait]
pub trait IdentityStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    async fn put(&self, key: &str, value: &str) -> StorageResult<()>;

    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// All stored entries, used for the warm load at startup.
    async fn entries(&self) -> StorageResult<Vec<(String, String)>>;
}

/// Handle representing an active logical connection to a locally connected
/// client (device or module).
#[async_trait]
pub trait DeviceProxy: Send + Sync + 'static {
    fn is_active(&self) -> bool;

    /// Mark the proxy inactive without closing the underlying transport.
    /// Used when a newer connection replaces this one.
    fn set_inactive(&self);

    async fn close(&self) -> EdgeResult<()>;

    async fn send_message(&self, payload: Bytes) -> EdgeResult<()>;

    /// Deliver a direct method invocation to the client. Responses travel
    /// back asynchronously and are correlated by the invoke handler.
    async fn invoke_method(&self, request: DirectMethodRequest) -> EdgeResult<()>;
}

/// Handle representing an active logical connection to the cloud backend on
/// behalf of one identity.
#[async_trait]
pub trait CloudProxy: Send + Sync + 'static {
    fn is_active(&self) -> bool;

    fn set_inactive(&self);

    async fn close(&self) -> EdgeResult<()>;

    async fn send_message(&self, payload: Bytes) -> EdgeResult<()>;

    async fn get_twin(&self) -> EdgeResult<Bytes>;

    /// Begin receiving cloud-to-device messages. There is no corresponding
    /// teardown call; listening stops when the proxy closes.
    fn start_listening(&self);

    async fn setup_call_method(&self) -> EdgeResult<()>;

    async fn remove_call_method(&self) -> EdgeResult<()>;

    async fn setup_desired_property_updates(&self) -> EdgeResult<()>;

    async fn remove_desired_property_updates(&self) -> EdgeResult<()>;
}

/// Builds authorized cloud connections for identities.
///
/// Implementations own transport and token/certificate handling; a rejected
/// identity surfaces as an error and leaves the registry untouched.
#[async_trait]
pub trait CloudConnectionProvider: Send + Sync + 'static {
    async fn connect(&self, identity: &ServiceIdentity) -> EdgeResult<Arc<dyn CloudProxy>>;
}
