use dashmap::DashMap;
use ng_edge_error::EdgeResult;
use ng_edge_models::event::{EdgeEvent, EventBusConfig, EventStats};
use std::{
    any::{type_name, TypeId},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::broadcast::{
    channel,
    error::RecvError,
    {Receiver, Sender},
};
use tracing::{debug, warn};

/// In-process event bus with one broadcast channel per event type.
///
/// Publishing is synchronous and non-blocking; delivery to registered
/// handlers happens on spawned consumer tasks. A handler error is logged
/// and counted, never propagated to the publisher.
#[derive(Debug, Clone)]
pub struct EdgeEventBus {
    config: EventBusConfig,
    channels: Arc<DashMap<TypeId, Sender<Arc<dyn EdgeEvent>>>>,
    total_events: Arc<AtomicU64>,
    successful_handlers: Arc<AtomicU64>,
    failed_handlers: Arc<AtomicU64>,
}

impl Default for EdgeEventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

impl EdgeEventBus {
    /// Creates a new event bus with the given configuration
    pub fn new(config: EventBusConfig) -> Self {
        Self {
            config,
            channels: Arc::new(DashMap::new()),
            total_events: Arc::new(AtomicU64::new(0)),
            successful_handlers: Arc::new(AtomicU64::new(0)),
            failed_handlers: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Gets or creates the channel for a specific event type
    fn channel<E: EdgeEvent>(&self) -> Sender<Arc<dyn EdgeEvent>> {
        let event_type = TypeId::of::<E>();

        if let Some(sender) = self.channels.get(&event_type) {
            return sender.value().clone();
        }

        let (sender, _) = channel(self.config.channel_capacity);
        self.channels
            .entry(event_type)
            .or_insert(sender)
            .value()
            .clone()
    }

    /// Subscribes to events of a specific type
    pub fn subscribe<E: EdgeEvent>(&self) -> Receiver<Arc<dyn EdgeEvent>> {
        self.channel::<E>().subscribe()
    }

    /// Returns the current event statistics
    pub fn stats(&self) -> EventStats {
        EventStats {
            total_events: self.total_events.load(Ordering::Relaxed),
            successful_handlers: self.successful_handlers.load(Ordering::Relaxed),
            failed_handlers: self.failed_handlers.load(Ordering::Relaxed),
        }
    }

    /// Publishes an event to all subscribers of its type.
    ///
    /// Returns the number of receivers the event was delivered to. An event
    /// published with no subscribers is dropped with a warning.
    pub fn publish<E: EdgeEvent>(&self, event: E) -> usize {
        let event_type = type_name::<E>();
        self.total_events.fetch_add(1, Ordering::Relaxed);

        let sender = self.channel::<E>();
        let subscriber_count = sender.receiver_count();
        if subscriber_count == 0 {
            warn!(event_type = %event_type, "No subscribers for event type");
            return 0;
        }

        match sender.send(Arc::new(event)) {
            Ok(delivered) => {
                if self.config.enable_tracing {
                    debug!("Event published: type={event_type}, subscribers={delivered}");
                }
                delivered
            }
            Err(_) => {
                // Receivers dropped between the count and the send.
                warn!(event_type = %event_type, "All subscribers gone, event dropped");
                0
            }
        }
    }

    /// Registers a handler for a specific event type.
    ///
    /// Spawns a consumer task that downcasts incoming events and feeds them
    /// to the handler. The task ends when the bus (all senders) is dropped.
    pub fn register_handler<E, F>(&self, mut handler: F)
    where
        E: EdgeEvent,
        F: FnMut(&E) -> EdgeResult<()> + Send + 'static,
    {
        let mut receiver = self.subscribe::<E>();
        let successful = Arc::clone(&self.successful_handlers);
        let failed = Arc::clone(&self.failed_handlers);

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        let Ok(event) = event.downcast_arc::<E>() else {
                            continue;
                        };
                        match handler(&event) {
                            Ok(()) => {
                                successful.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                warn!(error = %e, event_type = %type_name::<E>(), "Handler failed");
                                failed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            skipped,
                            event_type = %type_name::<E>(),
                            "Handler lagged behind, events skipped"
                        );
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }
}
