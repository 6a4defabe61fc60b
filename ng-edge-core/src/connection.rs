use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ng_edge_common::EdgeEventBus;
use ng_edge_error::{EdgeError, EdgeResult};
use ng_edge_models::{
    event::{CloudConnectionEstablished, CloudConnectionLost, DeviceConnected, DeviceDisconnected},
    identity::ServiceIdentity,
    settings::Settings,
    subscription::DeviceSubscription,
    CloudConnectionProvider, CloudProxy, DeviceProxy,
};
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info, warn};

/// Per-identity connection state.
///
/// A record outlives the proxies it holds: removing the device side keeps
/// the subscription bookkeeping so a reconnecting client resumes where it
/// left off. Only [`NGConnectionManager::close_connection`] drops the whole
/// record.
struct ConnectionRecord {
    device_proxy: Option<Arc<dyn DeviceProxy>>,
    cloud_proxy: Option<Arc<dyn CloudProxy>>,
    subscriptions: HashMap<DeviceSubscription, bool>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl ConnectionRecord {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            device_proxy: None,
            cloud_proxy: None,
            subscriptions: HashMap::new(),
            created_at: now,
            last_activity: now,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// Registry of device-side and cloud-side proxies, keyed by identity id.
///
/// Invariant: at most one active proxy per side per identity. Installing a
/// replacement deactivates the previous proxy before the new one becomes
/// visible; the old transport is closed on a detached task. Concurrent
/// `get_or_create_cloud_connection` races resolve last-install-wins, with
/// the losing proxy torn down the same way.
pub struct NGConnectionManager {
    connections: DashMap<String, ConnectionRecord>,
    provider: Arc<dyn CloudConnectionProvider>,
    events: Arc<EdgeEventBus>,
    edge_device_id: String,
}

impl NGConnectionManager {
    pub fn new(
        provider: Arc<dyn CloudConnectionProvider>,
        events: Arc<EdgeEventBus>,
        settings: &Settings,
    ) -> Self {
        Self {
            connections: DashMap::new(),
            provider,
            events,
            edge_device_id: settings.general.edge_device_id.clone(),
        }
    }

    /// Install `proxy` as the active device-side connection for `id`.
    ///
    /// A previously active proxy is deactivated first and closed on a
    /// detached task; its subscriptions carry over to the new connection.
    pub fn add_device_connection(&self, id: &str, proxy: Arc<dyn DeviceProxy>) {
        let displaced = {
            let mut record = self
                .connections
                .entry(id.to_string())
                .or_insert_with(ConnectionRecord::new);
            record.touch();
            record.device_proxy.replace(proxy)
        };

        if let Some(old) = displaced {
            old.set_inactive();
            let id = id.to_string();
            tokio::spawn(async move {
                if let Err(e) = old.close().await {
                    warn!(id = %id, error = %e, "Failed to close displaced device proxy");
                }
            });
        }

        info!(id = %id, "Device connected");
        self.events.publish(DeviceConnected { id: id.to_string() });
    }

    /// Active device proxy for `id`, if any. A proxy that was deactivated
    /// but not yet removed is not returned.
    pub fn get_device_connection(&self, id: &str) -> Option<Arc<dyn DeviceProxy>> {
        self.connections
            .get(id)
            .and_then(|r| r.device_proxy.clone())
            .filter(|p| p.is_active())
    }

    /// Drop the device side of the connection, keeping the record and its
    /// subscription state. Idempotent.
    pub fn remove_device_connection(&self, id: &str) {
        let removed = self
            .connections
            .get_mut(id)
            .and_then(|mut r| r.device_proxy.take());

        if let Some(proxy) = removed {
            let was_active = proxy.is_active();
            proxy.set_inactive();
            if was_active {
                info!(id = %id, "Device disconnected");
                self.events.publish(DeviceDisconnected { id: id.to_string() });
            }
        }
    }

    /// Tear down everything known about `id`: both proxies are closed and
    /// the record, including subscription state, is dropped.
    pub async fn close_connection(&self, id: &str) {
        let Some((_, record)) = self.connections.remove(id) else {
            return;
        };

        if let Some(device) = record.device_proxy {
            let was_active = device.is_active();
            device.set_inactive();
            if let Err(e) = device.close().await {
                warn!(id = %id, error = %e, "Failed to close device proxy");
            }
            if was_active {
                self.events.publish(DeviceDisconnected { id: id.to_string() });
            }
        }
        if let Some(cloud) = record.cloud_proxy {
            let was_active = cloud.is_active();
            cloud.set_inactive();
            if let Err(e) = cloud.close().await {
                warn!(id = %id, error = %e, "Failed to close cloud proxy");
            }
            if was_active {
                self.events.publish(CloudConnectionLost { id: id.to_string() });
            }
        }
        info!(id = %id, "Connection closed");
    }

    /// Open a fresh cloud connection for `identity` and install it.
    ///
    /// The provider call happens before any registry mutation, so a failed
    /// or rejected connect leaves existing state untouched.
    pub async fn create_cloud_connection(
        &self,
        identity: &ServiceIdentity,
    ) -> EdgeResult<Arc<dyn CloudProxy>> {
        let id = identity.id();
        let proxy = self.provider.connect(identity).await.map_err(|e| {
            EdgeError::CloudConnectionFailed(id.clone(), e.to_string())
        })?;

        let displaced = {
            let mut record = self
                .connections
                .entry(id.clone())
                .or_insert_with(ConnectionRecord::new);
            record.touch();
            record.cloud_proxy.replace(Arc::clone(&proxy))
        };

        if let Some(old) = displaced {
            old.set_inactive();
            let old_id = id.clone();
            tokio::spawn(async move {
                if let Err(e) = old.close().await {
                    warn!(id = %old_id, error = %e, "Failed to close displaced cloud proxy");
                }
            });
        }

        info!(id = %id, "Cloud connection established");
        self.events.publish(CloudConnectionEstablished { id });
        Ok(proxy)
    }

    /// Return the existing active cloud connection for `identity`, opening
    /// one if none is installed.
    pub async fn get_or_create_cloud_connection(
        &self,
        identity: &ServiceIdentity,
    ) -> EdgeResult<Arc<dyn CloudProxy>> {
        if let Some(existing) = self.get_cloud_connection(&identity.id()) {
            return Ok(existing);
        }
        self.create_cloud_connection(identity).await
    }

    /// Active cloud proxy for `id`, if any.
    pub fn get_cloud_connection(&self, id: &str) -> Option<Arc<dyn CloudProxy>> {
        self.connections
            .get(id)
            .and_then(|r| r.cloud_proxy.clone())
            .filter(|p| p.is_active())
    }

    /// Ids of all identities with an active device-side connection.
    pub fn get_connected_clients(&self) -> Vec<String> {
        self.connections
            .iter()
            .filter(|r| r.device_proxy.as_ref().is_some_and(|p| p.is_active()))
            .map(|r| r.key().clone())
            .collect()
    }

    /// Record that `id` opted into `subscription`.
    ///
    /// No-op when no connection record exists; subscriptions are only
    /// meaningful for identities that have connected at least once.
    pub fn add_subscription(&self, id: &str, subscription: DeviceSubscription) {
        match self.connections.get_mut(id) {
            Some(mut record) => {
                record.subscriptions.insert(subscription, true);
                record.touch();
            }
            None => {
                debug!(id = %id, subscription = %subscription, "Subscription for unknown connection ignored");
            }
        }
    }

    /// Record that `id` opted out of `subscription`. The entry is kept with
    /// an explicit disabled flag so reconciliation knows to tear it down.
    pub fn remove_subscription(&self, id: &str, subscription: DeviceSubscription) {
        match self.connections.get_mut(id) {
            Some(mut record) => {
                record.subscriptions.insert(subscription, false);
                record.touch();
            }
            None => {
                debug!(id = %id, subscription = %subscription, "Unsubscription for unknown connection ignored");
            }
        }
    }

    /// Snapshot of the subscription flags recorded for `id`. `None` when
    /// the identity has no connection record at all.
    pub fn get_subscriptions(&self, id: &str) -> Option<HashMap<DeviceSubscription, bool>> {
        self.connections.get(id).map(|r| r.subscriptions.clone())
    }

    /// Whether `id` is the edge device itself or one of its modules.
    pub fn is_edge_device(&self, id: &str) -> bool {
        !self.edge_device_id.is_empty()
            && (id == self.edge_device_id
                || id
                    .strip_prefix(&self.edge_device_id)
                    .is_some_and(|rest| rest.starts_with('/')))
    }

    /// Uptime bookkeeping for diagnostics.
    pub fn connection_age(&self, id: &str) -> Option<chrono::Duration> {
        self.connections
            .get(id)
            .map(|r| Utc::now() - r.created_at)
    }
}
