use crate::{connection::NGConnectionManager, method::InvokeMethodHandler};
use ng_edge_common::EdgeEventBus;
use ng_edge_models::{
    event::{CloudConnectionEstablished, DeviceConnected},
    settings::Settings,
    subscription::DeviceSubscription,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

/// Reconciles recorded device subscriptions with the cloud side.
///
/// Recording a subscription always succeeds; pushing it upstream is
/// fire-and-forget. A push that fails or times out leaves the recorded flag
/// in place and is retried wholesale the next time the identity's device or
/// cloud connection comes up, so the cloud state converges to the recorded
/// state rather than the other way around.
pub struct SubscriptionProcessor {
    connections: Arc<NGConnectionManager>,
    invoke_handler: Arc<InvokeMethodHandler>,
    events: Arc<EdgeEventBus>,
    /// Upper bound for any single cloud-proxy call.
    cloud_call_timeout: Duration,
}

impl SubscriptionProcessor {
    pub fn new(
        connections: Arc<NGConnectionManager>,
        invoke_handler: Arc<InvokeMethodHandler>,
        events: Arc<EdgeEventBus>,
        settings: &Settings,
    ) -> Self {
        Self {
            connections,
            invoke_handler,
            events,
            cloud_call_timeout: settings.connectivity.cloud_call_timeout(),
        }
    }

    /// Register the bus handlers that replay recorded subscriptions when an
    /// identity's device or cloud connection is (re)established.
    pub fn start(self: &Arc<Self>) {
        let processor = Arc::clone(self);
        self.events
            .register_handler::<DeviceConnected, _>(move |event| {
                let processor = Arc::clone(&processor);
                let id = event.id.clone();
                tokio::spawn(async move {
                    processor.process_subscriptions(&id).await;
                });
                Ok(())
            });

        let processor = Arc::clone(self);
        self.events
            .register_handler::<CloudConnectionEstablished, _>(move |event| {
                let processor = Arc::clone(&processor);
                let id = event.id.clone();
                tokio::spawn(async move {
                    processor.process_subscriptions(&id).await;
                });
                Ok(())
            });
    }

    /// Record that `id` opted into `subscription` and push it upstream in
    /// the background.
    pub fn add_subscription(self: &Arc<Self>, id: &str, subscription: DeviceSubscription) {
        self.connections.add_subscription(id, subscription);
        self.spawn_push(id, subscription, true);
    }

    /// Record that `id` opted out of `subscription` and push the teardown
    /// upstream in the background.
    pub fn remove_subscription(self: &Arc<Self>, id: &str, subscription: DeviceSubscription) {
        self.connections.remove_subscription(id, subscription);
        self.spawn_push(id, subscription, false);
    }

    /// Record and push a batch of subscription changes for `id`, each one
    /// fire-and-forget like the single-flag calls.
    pub fn process_subscription_batch(
        self: &Arc<Self>,
        id: &str,
        changes: Vec<(DeviceSubscription, bool)>,
    ) {
        for (subscription, enabled) in changes {
            if enabled {
                self.connections.add_subscription(id, subscription);
            } else {
                self.connections.remove_subscription(id, subscription);
            }
            self.spawn_push(id, subscription, enabled);
        }
    }

    fn spawn_push(self: &Arc<Self>, id: &str, subscription: DeviceSubscription, enabled: bool) {
        let processor = Arc::clone(self);
        let id = id.to_string();
        tokio::spawn(async move {
            processor.process_subscription(&id, subscription, enabled).await;
        });
    }

    /// Replay every recorded subscription flag for `id` against the cloud.
    pub async fn process_subscriptions(&self, id: &str) {
        let Some(subscriptions) = self.connections.get_subscriptions(id) else {
            return;
        };
        debug!(id = %id, count = subscriptions.len(), "Processing subscriptions");
        for (subscription, enabled) in subscriptions {
            self.process_subscription(id, subscription, enabled).await;
        }
    }

    /// Push one subscription flag to the cloud side of `id`.
    ///
    /// With no active cloud connection this records only; the flag is
    /// replayed when `CloudConnectionEstablished` fires for the identity.
    pub async fn process_subscription(
        &self,
        id: &str,
        subscription: DeviceSubscription,
        enabled: bool,
    ) {
        // Flushing parked invocations needs only the device side; it must
        // not wait for the cloud connection to come up.
        if subscription == DeviceSubscription::Methods && enabled {
            self.invoke_handler.process_invoke_method_subscription(id).await;
        }

        let Some(cloud) = self.connections.get_cloud_connection(id) else {
            debug!(id = %id, subscription = %subscription, "No cloud connection, subscription recorded only");
            return;
        };

        match subscription {
            DeviceSubscription::C2D => {
                // Listening has no teardown; it stops when the proxy closes.
                if enabled {
                    cloud.start_listening();
                }
            }
            DeviceSubscription::DesiredPropertyUpdates => {
                let call = async {
                    if enabled {
                        cloud.setup_desired_property_updates().await
                    } else {
                        cloud.remove_desired_property_updates().await
                    }
                };
                self.checked_cloud_call(id, subscription, enabled, call).await;
            }
            DeviceSubscription::Methods => {
                let call = async {
                    if enabled {
                        cloud.setup_call_method().await
                    } else {
                        cloud.remove_call_method().await
                    }
                };
                self.checked_cloud_call(id, subscription, enabled, call).await;
            }
            DeviceSubscription::ModuleMessages
            | DeviceSubscription::TwinResponse
            | DeviceSubscription::Unknown => {
                debug!(id = %id, subscription = %subscription, "Subscription has no cloud-side action");
            }
        }
    }

    async fn checked_cloud_call<F>(
        &self,
        id: &str,
        subscription: DeviceSubscription,
        enabled: bool,
        call: F,
    ) where
        F: std::future::Future<Output = ng_edge_error::EdgeResult<()>>,
    {
        match tokio::time::timeout(self.cloud_call_timeout, call).await {
            Ok(Ok(())) => {
                debug!(id = %id, subscription = %subscription, enabled, "Subscription pushed to cloud");
            }
            Ok(Err(e)) => {
                warn!(id = %id, subscription = %subscription, enabled, error = %e, "Cloud subscription call failed");
            }
            Err(_) => {
                warn!(id = %id, subscription = %subscription, enabled, "Cloud subscription call timed out");
            }
        }
    }
}
