//! Non-blocking fan-out of live events to observers such as an editor UI
//!
//! Every subscriber owns a bounded queue. Publishing never waits: when a
//! subscriber's queue is full the event is dropped for that subscriber only.
//! The subscriber list is an immutable `Arc<Vec<_>>` replaced on every
//! subscribe/unsubscribe, so publishing only clones an `Arc`.

use crate::mapping::RawEvent;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum HubPayload {
    /// Echo of a raw device event
    Joystick(RawEvent),
    /// The active profile changed
    ActiveProfile(String),
    /// A profile was opened for editing; it is not necessarily active
    SelectedProfile(String),
}

/// Serialized as `{"type": ..., "data": ..., "at": ...}`
#[derive(Debug, Clone, Serialize)]
pub struct HubEvent {
    #[serde(flatten)]
    pub payload: HubPayload,
    pub at: DateTime<Local>,
}

impl HubEvent {
    pub fn now(payload: HubPayload) -> Self {
        Self {
            payload,
            at: Local::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone)]
struct Subscriber {
    id: SubscriptionId,
    tx: mpsc::Sender<HubEvent>,
}

/// Receiving end of one subscription
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub rx: mpsc::Receiver<HubEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<HubEvent> {
        self.rx.recv().await
    }
}

#[derive(Debug)]
struct HubInner {
    subscribers: watch::Sender<Arc<Vec<Subscriber>>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
    capacity: usize,
}

/// Cheaply clonable handle to the shared hub
#[derive(Debug, Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (subscribers, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            inner: Arc::new(HubInner {
                subscribers,
                next_id: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                capacity: capacity.max(1),
            }),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.inner.capacity);

        self.inner.subscribers.send_modify(|subs| {
            let mut next = Vec::with_capacity(subs.len() + 1);
            next.extend(subs.iter().cloned());
            next.push(Subscriber { id, tx });
            *subs = Arc::new(next);
        });
        debug!("Subscriber {:?} added", id);

        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.subscribers.send_modify(|subs| {
            let next: Vec<Subscriber> = subs.iter().filter(|s| s.id != id).cloned().collect();
            *subs = Arc::new(next);
        });
        debug!("Subscriber {:?} removed", id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    /// Total events dropped because a subscriber queue was full
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn publish(&self, payload: HubPayload) {
        let subscribers = self.inner.subscribers.borrow().clone();
        if subscribers.is_empty() {
            return;
        }

        let event = HubEvent::now(payload);
        let mut closed = Vec::new();
        for subscriber in subscribers.iter() {
            match subscriber.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    trace!("Subscriber {:?} is full, event dropped", subscriber.id);
                }
                // receiver gone without unsubscribing
                Err(TrySendError::Closed(_)) => closed.push(subscriber.id),
            }
        }
        for id in closed {
            self.unsubscribe(id);
        }
    }

    pub fn publish_joystick(&self, event: RawEvent) {
        self.publish(HubPayload::Joystick(event));
    }

    pub fn publish_active_profile(&self, name: &str) {
        self.publish(HubPayload::ActiveProfile(name.to_string()));
    }

    pub fn publish_selected_profile(&self, name: &str) {
        self.publish(HubPayload::SelectedProfile(name.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let hub = EventHub::new(4);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        hub.publish_active_profile("default");

        let ev_a = a.recv().await.unwrap();
        let ev_b = b.recv().await.unwrap();
        assert_eq!(ev_a.payload, HubPayload::ActiveProfile("default".into()));
        assert_eq!(ev_b.payload, ev_a.payload);
    }

    #[tokio::test]
    async fn test_full_subscriber_drops_without_blocking() {
        let hub = EventHub::new(2);
        let mut slow = hub.subscribe();

        for i in 0..5 {
            hub.publish_joystick(RawEvent::button(i, 1));
        }
        assert_eq!(hub.dropped(), 3);

        assert_eq!(slow.recv().await.unwrap().payload, HubPayload::Joystick(RawEvent::button(0, 1)));
        assert_eq!(slow.recv().await.unwrap().payload, HubPayload::Joystick(RawEvent::button(1, 1)));

        // drained: delivery resumes
        hub.publish_joystick(RawEvent::button(9, 0));
        assert_eq!(slow.recv().await.unwrap().payload, HubPayload::Joystick(RawEvent::button(9, 0)));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let hub = EventHub::new(4);
        let sub = hub.subscribe();
        let mut other = hub.subscribe();
        hub.unsubscribe(sub.id);
        assert_eq!(hub.subscriber_count(), 1);

        hub.publish_selected_profile("racing");
        assert_eq!(
            other.recv().await.unwrap().payload,
            HubPayload::SelectedProfile("racing".into())
        );

        let mut sub = sub;
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn test_dropped_receiver_does_not_count_as_drop() {
        let hub = EventHub::new(1);
        drop(hub.subscribe());
        hub.publish_active_profile("x");
        assert_eq!(hub.dropped(), 0);
    }

    #[test]
    fn test_dropped_receiver_is_pruned_on_publish() {
        let hub = EventHub::new(4);
        let kept = hub.subscribe();
        drop(hub.subscribe());
        drop(hub.subscribe());
        assert_eq!(hub.subscriber_count(), 3);

        hub.publish_joystick(RawEvent::button(0, 1));
        assert_eq!(hub.subscriber_count(), 1);
        hub.unsubscribe(kept.id);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_event_wire_format() {
        let event = HubEvent::now(HubPayload::Joystick(RawEvent::axis(1, -300)));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "joystick");
        assert_eq!(json["data"]["type"], "axis");
        assert_eq!(json["data"]["value"], -300);
        assert!(json["at"].is_string());

        let json = serde_json::to_value(HubEvent::now(HubPayload::ActiveProfile("a".into()))).unwrap();
        assert_eq!(json["type"], "activeProfile");
        assert_eq!(json["data"], "a");
    }
}
