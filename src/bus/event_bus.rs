use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::BusConfig;
use crate::Event;
use crate::EventKind;
use crate::EventPayload;
use crate::NodeId;
use crate::BUS_DROPPED_EVENTS;

const PUBLISHER: &str = "publisher";

struct Subscriber {
    id: u64,
    name: String,
    sender: mpsc::Sender<Arc<Event>>,
    dropped: Arc<AtomicU64>,
}

type Registry = Arc<RwLock<HashMap<EventKind, Vec<Subscriber>>>>;

pub struct EventBus;

impl EventBus {
    /// Starts one fan-out task per event kind.
    pub fn spawn(
        config: &BusConfig,
        token: CancellationToken,
    ) -> EventBusHandle {
        let registry: Registry = Arc::new(RwLock::new(HashMap::new()));
        let mut publishers = HashMap::new();
        for kind in EventKind::ALL {
            let (tx, rx) = mpsc::channel(config.publish_buffer);
            publishers.insert(kind, tx);
            tokio::spawn(fan_out(kind, rx, registry.clone(), token.clone()));
        }
        EventBusHandle {
            publishers: Arc::new(publishers),
            registry,
            next_id: Arc::new(AtomicU64::new(1)),
            subscriber_buffer: config.subscriber_buffer,
        }
    }
}

async fn fan_out(
    kind: EventKind,
    mut rx: mpsc::Receiver<Arc<Event>>,
    registry: Registry,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(kind = kind.as_str(), "event bus stopped");
                return;
            }
            event = rx.recv() => match event {
                Some(event) => event,
                None => return,
            }
        };

        let mut closed = Vec::new();
        {
            let subscribers = registry.read();
            for subscriber in subscribers.get(&kind).into_iter().flatten() {
                match subscriber.sender.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        subscriber.dropped.fetch_add(1, Ordering::Relaxed);
                        BUS_DROPPED_EVENTS
                            .with_label_values(&[kind.as_str(), &subscriber.name])
                            .inc();
                        trace!(
                            kind = kind.as_str(),
                            subscriber = %subscriber.name,
                            "Subscriber full, event dropped"
                        );
                    }
                    Err(TrySendError::Closed(_)) => closed.push(subscriber.id),
                }
            }
        }
        if !closed.is_empty() {
            if let Some(subscribers) = registry.write().get_mut(&kind) {
                subscribers.retain(|s| !closed.contains(&s.id));
            }
        }
    }
}

#[derive(Clone)]
pub struct EventBusHandle {
    publishers: Arc<HashMap<EventKind, mpsc::Sender<Arc<Event>>>>,
    registry: Registry,
    next_id: Arc<AtomicU64>,
    subscriber_buffer: usize,
}

impl std::fmt::Debug for EventBusHandle {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("EventBusHandle")
            .field("subscriber_buffer", &self.subscriber_buffer)
            .finish()
    }
}

impl EventBusHandle {
    /// Stamps the event with the host clock and queues it without waiting.
    /// Returns false when the kind's publish queue is full or closed.
    pub fn publish(
        &self,
        node_id: NodeId,
        payload: EventPayload,
    ) -> bool {
        let kind = payload.kind();
        let event = Arc::new(Event {
            event_time: Utc::now(),
            node_id,
            payload,
        });
        let Some(publisher) = self.publishers.get(&kind) else {
            return false;
        };
        match publisher.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                BUS_DROPPED_EVENTS.with_label_values(&[kind.as_str(), PUBLISHER]).inc();
                warn!(kind = kind.as_str(), "Publish queue full, event dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Registers a subscriber for `kinds`. Dropping the subscription deregisters it.
    pub fn subscribe(
        &self,
        name: &str,
        kinds: &[EventKind],
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.subscriber_buffer);
        let dropped = Arc::new(AtomicU64::new(0));
        {
            let mut registry = self.registry.write();
            for kind in kinds {
                registry.entry(*kind).or_default().push(Subscriber {
                    id,
                    name: name.to_string(),
                    sender: tx.clone(),
                    dropped: dropped.clone(),
                });
            }
        }
        debug!(subscriber = name, id, "Subscriber registered");
        Subscription {
            id,
            receiver: rx,
            dropped,
            registry: self.registry.clone(),
        }
    }

    pub fn subscriber_count(
        &self,
        kind: EventKind,
    ) -> usize {
        self.registry.read().get(&kind).map(Vec::len).unwrap_or(0)
    }
}

pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<Arc<Event>>,
    dropped: Arc<AtomicU64>,
    registry: Registry,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        self.receiver.try_recv().ok()
    }

    /// Events lost to this subscriber because its buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut registry = self.registry.write();
        for subscribers in registry.values_mut() {
            subscribers.retain(|s| s.id != self.id);
        }
    }
}
