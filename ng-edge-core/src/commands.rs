use crate::cache::NGIdentityCache;
use async_trait::async_trait;
use dashmap::DashMap;
use ng_edge_error::{EdgeError, EdgeResult};
use ng_edge_models::method::{
    DirectMethodRequest, DirectMethodResponse, STATUS_BAD_REQUEST, STATUS_NOT_FOUND, STATUS_OK,
    STATUS_SERVER_ERROR,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A direct method the hub itself answers, as opposed to methods proxied to
/// connected devices.
#[async_trait]
pub trait EdgeCommandHandler: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn handle(&self, payload: &Value) -> EdgeResult<Value>;
}

/// Registry dispatching hub-targeted direct methods to their handlers.
#[derive(Default)]
pub struct EdgeCommandRegistry {
    handlers: DashMap<String, Arc<dyn EdgeCommandHandler>>,
}

impl EdgeCommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<dyn EdgeCommandHandler>) {
        debug!(command = handler.name(), "Registered edge command");
        self.handlers.insert(handler.name().to_string(), handler);
    }

    /// Execute the command named by `request` and produce its response.
    ///
    /// Status mapping: success is 200, an unknown method or missing target
    /// is 404, a payload the handler cannot parse is 400, anything else is
    /// 500. Handler errors never propagate past the response.
    pub async fn dispatch(&self, request: &DirectMethodRequest) -> DirectMethodResponse {
        let Some(handler) = self.handlers.get(&request.name).map(|h| h.value().clone()) else {
            return DirectMethodResponse::new(
                &request.correlation_id,
                STATUS_NOT_FOUND,
                json!({ "message": format!("unknown method '{}'", request.name) }),
            );
        };

        match handler.handle(&request.payload).await {
            Ok(payload) => {
                DirectMethodResponse::new(&request.correlation_id, STATUS_OK, payload)
            }
            Err(e) => {
                warn!(command = %request.name, error = %e, "Edge command failed");
                let status = match &e {
                    EdgeError::Json(_) | EdgeError::InvalidIdentityKey(_) => STATUS_BAD_REQUEST,
                    EdgeError::IdentityNotFound(_) => STATUS_NOT_FOUND,
                    _ => STATUS_SERVER_ERROR,
                };
                DirectMethodResponse::new(
                    &request.correlation_id,
                    status,
                    json!({ "message": e.to_string() }),
                )
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshIdentitiesPayload {
    #[serde(rename = "deviceIds")]
    device_ids: Vec<String>,
}

/// `RefreshIdentities`: targeted refresh of the named identities against
/// the remote source, bypassing the scheduled cycle.
pub struct RefreshIdentitiesHandler {
    cache: Arc<NGIdentityCache>,
}

impl RefreshIdentitiesHandler {
    pub fn new(cache: Arc<NGIdentityCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl EdgeCommandHandler for RefreshIdentitiesHandler {
    fn name(&self) -> &'static str {
        "RefreshIdentities"
    }

    async fn handle(&self, payload: &Value) -> EdgeResult<Value> {
        let payload: RefreshIdentitiesPayload = serde_json::from_value(payload.clone())?;
        info!(count = payload.device_ids.len(), "Refreshing identities on demand");
        self.cache
            .refresh_service_identities(&payload.device_ids)
            .await;
        Ok(json!({ "refreshed": payload.device_ids.len() }))
    }
}
