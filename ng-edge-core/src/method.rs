use crate::connection::NGConnectionManager;
use dashmap::DashMap;
use ng_edge_error::EdgeResult;
use ng_edge_models::method::{DirectMethodRequest, DirectMethodResponse};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

struct PendingInvocation {
    request: DirectMethodRequest,
    responder: oneshot::Sender<DirectMethodResponse>,
    /// True once the request reached the target's device proxy. Undispatched
    /// invocations are flushed when the target (re)subscribes to methods.
    dispatched: bool,
}

/// Correlates direct method invocations with their asynchronous responses.
///
/// An invocation is registered under its correlation id, delivered to the
/// target's device proxy if one is connected, and parked until either a
/// matching response arrives or the per-request timeout elapses. Targets
/// that connect after the invocation was issued pick it up through the
/// method-subscription flush.
pub struct InvokeMethodHandler {
    connections: Arc<NGConnectionManager>,
    pending: DashMap<String, PendingInvocation>,
}

impl InvokeMethodHandler {
    pub fn new(connections: Arc<NGConnectionManager>) -> Self {
        Self {
            connections,
            pending: DashMap::new(),
        }
    }

    /// Invoke a direct method and wait for its response.
    ///
    /// Assigns a correlation id when the caller left it empty. Never
    /// returns a transport error to the caller: an unanswered invocation
    /// resolves to a synthetic gateway-timeout response.
    pub async fn invoke_method(
        &self,
        mut request: DirectMethodRequest,
    ) -> EdgeResult<DirectMethodResponse> {
        if request.correlation_id.is_empty() {
            request.correlation_id = Uuid::new_v4().to_string();
        }
        let correlation_id = request.correlation_id.clone();
        let response_timeout = request.response_timeout();

        let (responder, receiver) = oneshot::channel();
        self.pending.insert(
            correlation_id.clone(),
            PendingInvocation {
                request: request.clone(),
                responder,
                dispatched: false,
            },
        );
        // Reclaims the entry on every exit path, including the caller's
        // future being dropped before the timeout elapses.
        let _cleanup = PendingCleanup {
            pending: &self.pending,
            correlation_id: correlation_id.clone(),
        };

        if let Some(device) = self.connections.get_device_connection(&request.target_id) {
            match device.invoke_method(request.clone()).await {
                Ok(()) => self.mark_dispatched(&correlation_id),
                Err(e) => {
                    // Left pending; a reconnect can still pick it up.
                    warn!(
                        target = %request.target_id,
                        correlation_id = %correlation_id,
                        error = %e,
                        "Failed to deliver method invocation"
                    );
                }
            }
        } else {
            debug!(
                target = %request.target_id,
                correlation_id = %correlation_id,
                "Target not connected, invocation parked"
            );
        }

        let response = match timeout(response_timeout, receiver).await {
            Ok(Ok(response)) => response,
            // Elapsed, or the responder vanished without answering.
            _ => DirectMethodResponse::timed_out(&correlation_id),
        };
        Ok(response)
    }

    /// Route a method response back to its waiting invocation. Responses
    /// with no matching correlation id are dropped.
    pub fn process_method_response(&self, response: DirectMethodResponse) {
        match self.pending.remove(&response.correlation_id) {
            Some((correlation_id, invocation)) => {
                if invocation.responder.send(response).is_err() {
                    debug!(correlation_id = %correlation_id, "Caller gave up before the response arrived");
                }
            }
            None => {
                debug!(
                    correlation_id = %response.correlation_id,
                    "Dropping method response with no pending invocation"
                );
            }
        }
    }

    /// Deliver every parked invocation targeting `id`.
    ///
    /// Called when the target enables its method subscription; invocations
    /// issued while the target was offline are dispatched now, with their
    /// original timeouts still running.
    pub async fn process_invoke_method_subscription(&self, id: &str) {
        let Some(device) = self.connections.get_device_connection(id) else {
            return;
        };

        let parked: Vec<(String, DirectMethodRequest)> = self
            .pending
            .iter()
            .filter(|entry| !entry.dispatched && entry.request.target_id == id)
            .map(|entry| (entry.key().clone(), entry.request.clone()))
            .collect();

        for (correlation_id, request) in parked {
            match device.invoke_method(request).await {
                Ok(()) => self.mark_dispatched(&correlation_id),
                Err(e) => {
                    warn!(
                        target = %id,
                        correlation_id = %correlation_id,
                        error = %e,
                        "Failed to flush parked method invocation"
                    );
                }
            }
        }
    }

    fn mark_dispatched(&self, correlation_id: &str) {
        if let Some(mut entry) = self.pending.get_mut(correlation_id) {
            entry.dispatched = true;
        }
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

struct PendingCleanup<'a> {
    pending: &'a DashMap<String, PendingInvocation>,
    correlation_id: String,
}

impl Drop for PendingCleanup<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.correlation_id);
    }
}
