//! In-memory broker for tests.
//!
//! Behaves like an at-least-once broker with explicit settlement:
//! - every subscription whose topics include the published topic receives
//!   its own [`Delivery`]
//! - `Requeue` redelivers the message to the same subscription with an
//!   incremented `delivery_count`
//! - `Reject` drops the message and keeps it for inspection
//!
//! Faults can be injected to exercise the pipeline's retry and dedup paths.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use booking_pipeline_core::event::{CorrelationId, EventEnvelope};
use booking_pipeline_core::event_bus::{
    Acknowledgement, BusFuture, Delivery, EventBus, EventBusError, EventStream,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

type DeliverySender = mpsc::UnboundedSender<Result<Delivery, EventBusError>>;

struct Subscription {
    id: u64,
    topics: Vec<String>,
    sender: DeliverySender,
}

#[derive(Default)]
struct BusState {
    subscriptions: Vec<Subscription>,
    in_flight: HashMap<u64, u64>,
    published: Vec<(String, EventEnvelope)>,
    settlements: Vec<(CorrelationId, Acknowledgement)>,
    rejected: Vec<Delivery>,
    next_tag: u64,
    next_subscription: u64,
    failing_publishes: usize,
    duplicate_deliveries: usize,
}

impl BusState {
    /// Hand a delivery to one subscription; drops the subscription if its
    /// stream is gone.
    fn deliver(
        &mut self,
        subscription_id: u64,
        topic: &str,
        envelope: &EventEnvelope,
        delivery_count: u32,
    ) {
        self.next_tag += 1;
        let delivery = Delivery {
            topic: topic.to_string(),
            envelope: envelope.clone(),
            delivery_count,
            delivery_tag: self.next_tag,
        };

        let sent = self
            .subscriptions
            .iter()
            .find(|s| s.id == subscription_id)
            .is_some_and(|s| s.sender.send(Ok(delivery)).is_ok());

        if sent {
            self.in_flight.insert(self.next_tag, subscription_id);
        } else {
            self.subscriptions.retain(|s| s.id != subscription_id);
        }
    }
}

/// In-memory [`EventBus`] with fault injection.
///
/// # Example
///
/// ```
/// use booking_pipeline_testing::mocks::InMemoryEventBus;
///
/// let bus = InMemoryEventBus::new();
/// bus.fail_next_publishes(2);
/// assert!(bus.published().is_empty());
/// ```
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    state: Arc<Mutex<BusState>>,
}

impl InMemoryEventBus {
    /// Create a bus with no subscriptions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap()
    }

    /// Make the next `count` publishes fail with a transport error.
    pub fn fail_next_publishes(&self, count: usize) {
        self.state().failing_publishes = count;
    }

    /// Deliver each of the next `count` published messages twice.
    pub fn duplicate_next_deliveries(&self, count: usize) {
        self.state().duplicate_deliveries = count;
    }

    /// Deliver an already published envelope again to every matching
    /// subscription, as a broker does after a consumer crash.
    ///
    /// Returns `false` if nothing with this correlation id was published.
    pub fn redeliver(&self, correlation_id: CorrelationId) -> bool {
        let mut state = self.state();
        let Some((topic, envelope)) = state
            .published
            .iter()
            .find(|(_, e)| e.correlation_id() == correlation_id)
            .cloned()
        else {
            return false;
        };

        for id in matching(&state.subscriptions, &topic) {
            state.deliver(id, &topic, &envelope, 2);
        }
        true
    }

    /// Every envelope the bus accepted, in publication order.
    #[must_use]
    pub fn published(&self) -> Vec<EventEnvelope> {
        self.state().published.iter().map(|(_, e)| e.clone()).collect()
    }

    /// Envelopes accepted on `topic`.
    #[must_use]
    pub fn published_to(&self, topic: &str) -> Vec<EventEnvelope> {
        self.state()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Every settlement, in order.
    #[must_use]
    pub fn settlements(&self) -> Vec<(CorrelationId, Acknowledgement)> {
        self.state().settlements.clone()
    }

    /// Deliveries settled with [`Acknowledgement::Reject`].
    #[must_use]
    pub fn rejected(&self) -> Vec<Delivery> {
        self.state().rejected.clone()
    }

    /// Deliveries handed out but not yet settled.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state().in_flight.len()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.state().subscriptions.len()
    }
}

fn matching(subscriptions: &[Subscription], topic: &str) -> Vec<u64> {
    subscriptions
        .iter()
        .filter(|s| s.topics.iter().any(|t| t == topic))
        .map(|s| s.id)
        .collect()
}

impl EventBus for InMemoryEventBus {
    fn publish<'a>(&'a self, topic: &'a str, envelope: &'a EventEnvelope) -> BusFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state();

            if state.failing_publishes > 0 {
                state.failing_publishes -= 1;
                return Err(EventBusError::TransportError(format!(
                    "injected failure publishing to '{topic}'"
                )));
            }

            state.published.push((topic.to_string(), envelope.clone()));

            let duplicate = state.duplicate_deliveries > 0;
            if duplicate {
                state.duplicate_deliveries -= 1;
            }

            for id in matching(&state.subscriptions, topic) {
                state.deliver(id, topic, envelope, 1);
                if duplicate {
                    state.deliver(id, topic, envelope, 2);
                }
            }
            Ok(())
        })
    }

    fn subscribe<'a>(&'a self, topics: &'a [&'a str]) -> BusFuture<'a, EventStream> {
        Box::pin(async move {
            if topics.is_empty() {
                return Err(EventBusError::SubscriptionFailed {
                    topics: vec![],
                    reason: "no topics".to_string(),
                });
            }

            let (sender, mut receiver) = mpsc::unbounded_channel();
            {
                let mut state = self.state();
                state.next_subscription += 1;
                let id = state.next_subscription;
                state.subscriptions.push(Subscription {
                    id,
                    topics: topics.iter().map(ToString::to_string).collect(),
                    sender,
                });
            }

            let stream: EventStream = Box::pin(async_stream::stream! {
                while let Some(item) = receiver.recv().await {
                    yield item;
                }
            });
            Ok(stream)
        })
    }

    fn settle<'a>(&'a self, delivery: &'a Delivery, ack: Acknowledgement) -> BusFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state();

            let Some(subscription_id) = state.in_flight.remove(&delivery.delivery_tag) else {
                return Err(EventBusError::SettlementFailed {
                    delivery_tag: delivery.delivery_tag,
                    reason: "unknown or already settled".to_string(),
                });
            };

            state
                .settlements
                .push((delivery.envelope.correlation_id(), ack));

            match ack {
                Acknowledgement::Ack => {}
                Acknowledgement::Requeue => {
                    state.deliver(
                        subscription_id,
                        &delivery.topic,
                        &delivery.envelope,
                        delivery.delivery_count + 1,
                    );
                }
                Acknowledgement::Reject => state.rejected.push(delivery.clone()),
            }
            Ok(())
        })
    }
}

impl std::fmt::Debug for InMemoryEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("InMemoryEventBus")
            .field("subscriptions", &state.subscriptions.len())
            .field("published", &state.published.len())
            .field("in_flight", &state.in_flight.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use booking_pipeline_core::event_bus::topic_for;
    use chrono::Utc;
    use futures::StreamExt;

    fn envelope() -> EventEnvelope {
        EventEnvelope::new("UserCreated", CorrelationId::new(), vec![1, 2], Utc::now())
    }

    #[tokio::test]
    async fn delivers_to_matching_subscriptions_only() {
        let bus = InMemoryEventBus::new();
        let topic = topic_for("UserCreated");
        let mut users = bus.subscribe(&[topic.as_str()]).await.unwrap();
        let mut bookings = bus.subscribe(&["integration.BookingCreated"]).await.unwrap();

        let sent = envelope();
        bus.publish(&topic, &sent).await.unwrap();

        let delivery = users.next().await.unwrap().unwrap();
        assert_eq!(delivery.envelope, sent);
        assert_eq!(delivery.delivery_count, 1);
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(20), bookings.next())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn requeue_redelivers_with_incremented_count() {
        let bus = InMemoryEventBus::new();
        let topic = topic_for("UserCreated");
        let mut stream = bus.subscribe(&[topic.as_str()]).await.unwrap();
        bus.publish(&topic, &envelope()).await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        bus.settle(&first, Acknowledgement::Requeue).await.unwrap();
        let second = stream.next().await.unwrap().unwrap();

        assert_eq!(second.delivery_count, 2);
        assert_eq!(second.envelope.correlation_id(), first.envelope.correlation_id());
        assert_ne!(second.delivery_tag, first.delivery_tag);
    }

    #[tokio::test]
    async fn double_settlement_fails() {
        let bus = InMemoryEventBus::new();
        let topic = topic_for("UserCreated");
        let mut stream = bus.subscribe(&[topic.as_str()]).await.unwrap();
        bus.publish(&topic, &envelope()).await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();

        bus.settle(&delivery, Acknowledgement::Ack).await.unwrap();
        assert!(matches!(
            bus.settle(&delivery, Acknowledgement::Ack).await,
            Err(EventBusError::SettlementFailed { .. })
        ));
        assert_eq!(bus.in_flight(), 0);
    }

    #[tokio::test]
    async fn injected_publish_failures_are_consumed() {
        let bus = InMemoryEventBus::new();
        bus.fail_next_publishes(1);
        let topic = topic_for("UserCreated");

        assert!(bus.publish(&topic, &envelope()).await.is_err());
        assert!(bus.publish(&topic, &envelope()).await.is_ok());
        assert_eq!(bus.published().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_delivery_uses_same_envelope() {
        let bus = InMemoryEventBus::new();
        let topic = topic_for("UserCreated");
        let mut stream = bus.subscribe(&[topic.as_str()]).await.unwrap();
        bus.duplicate_next_deliveries(1);

        bus.publish(&topic, &envelope()).await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(first.envelope, second.envelope);
        assert_eq!(bus.in_flight(), 2);
    }

    #[tokio::test]
    async fn dropped_subscription_is_pruned() {
        let bus = InMemoryEventBus::new();
        let topic = topic_for("UserCreated");
        drop(bus.subscribe(&[topic.as_str()]).await.unwrap());

        bus.publish(&topic, &envelope()).await.unwrap();
        assert_eq!(bus.subscription_count(), 0);
    }
}
