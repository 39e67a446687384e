//! Event Bus (C9)
//!
//! One logical bus, one bounded queue per subscriber. The dispatcher is a
//! single long-lived owner of every subscriber's state (matching the
//! "single task, bounded channel" design used throughout the agent layer)
//! exposed as a pull-based contract — `emit`/`subscribe`/`poll_outgoing` —
//! since connection adapters (websocket, SSE) are an external surface this
//! crate doesn't implement.

pub mod delivery;

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

use crate::config::EventBusConfig;
use crate::error::Result;
use crate::store::model::{ConnectionStatus, Event, EventPriority, EventSubscription, SubscriptionFilter};
use crate::store::Store;

const ADMIN_PERMISSION: &str = "admin";

/// Fields stripped from a security event's `data` payload for non-admin
/// subscribers.
const SECURITY_SENSITIVE_FIELDS: &[&str] = &["source_ip", "threat_indicators", "confidence_score"];

#[derive(Debug)]
struct QueuedEvent {
    event: Event,
    enqueued_at: Instant,
}

/// Per-subscriber batching thresholds, grown under sustained high load and
/// shrunk under sustained low load, bounded by the configured defaults.
#[derive(Debug, Clone, Copy)]
struct AdaptiveBatchSize {
    current_items: u16,
    min_items: u16,
    max_items: u16,
}

impl AdaptiveBatchSize {
    fn new(default_items: u16) -> Self {
        Self {
            current_items: default_items,
            min_items: (default_items / 4).max(1),
            max_items: default_items.saturating_mul(4),
        }
    }

    /// Call after a batch flushed because it hit the item ceiling —
    /// sustained throughput pressure, so grow the ceiling.
    fn record_size_triggered_flush(&mut self) {
        self.current_items = (self.current_items.saturating_add(self.current_items / 4)).min(self.max_items);
    }

    /// Call after a batch flushed only because the timeout elapsed with few
    /// items — sustained idle, so shrink toward latency.
    fn record_timeout_triggered_flush(&mut self) {
        self.current_items = (self.current_items.saturating_sub(self.current_items / 4)).max(self.min_items);
    }
}

struct Subscriber {
    filter: SubscriptionFilter,
    permissions: Vec<String>,
    status: ConnectionStatus,
    queue: VecDeque<QueuedEvent>,
    batch_size: AdaptiveBatchSize,
    dropped_count: u64,
    created_at: chrono::DateTime<chrono::Utc>,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// What `poll_outgoing` hands a connection adapter: either a single
/// priority-bypass event, or a ready batch (compressed past the
/// configured size threshold).
#[derive(Debug)]
pub enum Delivery {
    Immediate(Event),
    Batch(Vec<Event>),
    CompressedBatch(Vec<u8>),
}

pub struct EventBus<S> {
    store: S,
    config: EventBusConfig,
    subscribers: DashMap<Uuid, Subscriber>,
}

impl<S: Store> EventBus<S> {
    pub fn new(store: S, config: EventBusConfig) -> Self {
        Self {
            store,
            config,
            subscribers: DashMap::new(),
        }
    }

    pub fn subscribe(&self, connection_id: Uuid, filter: SubscriptionFilter, permissions: Vec<String>) {
        self.subscribers.insert(
            connection_id,
            Subscriber {
                filter,
                permissions,
                status: ConnectionStatus::Connected,
                queue: VecDeque::new(),
                batch_size: AdaptiveBatchSize::new(self.config.max_batch_items),
                dropped_count: 0,
                created_at: chrono::Utc::now(),
                expires_at: None,
            },
        );
    }

    pub fn unsubscribe(&self, connection_id: Uuid) {
        self.subscribers.remove(&connection_id);
    }

    pub fn get_subscriptions(&self, connection_id: Uuid) -> Option<EventSubscription> {
        self.subscribers.get(&connection_id).map(|s| EventSubscription {
            connection_id,
            filter: s.filter.clone(),
            created_at: s.created_at,
            expires_at: s.expires_at,
            active: s.status == ConnectionStatus::Connected,
        })
    }

    /// Persist (if `event.persist`) and offer the event to every matching
    /// subscriber.
    pub async fn emit(&self, event: Event) -> Result<()> {
        if event.persist {
            self.store.record_event(event.clone()).await?;
        }

        for mut subscriber in self.subscribers.iter_mut() {
            if subscriber.filter.matches(&event) {
                let scrubbed = scrub_event(&event, &subscriber.permissions);
                enqueue(&mut subscriber, scrubbed, self.config.queue_capacity as usize);
            }
        }
        Ok(())
    }

    /// Drain whatever is ready for delivery to one subscriber: every
    /// priority-bypass event immediately, plus a batch if its threshold has
    /// been reached.
    pub fn poll_outgoing(&self, connection_id: Uuid) -> Vec<Delivery> {
        let Some(mut subscriber) = self.subscribers.get_mut(&connection_id) else {
            return Vec::new();
        };

        let mut deliveries = Vec::new();

        // Priority bypass: pull every immediate-eligible event out first, in order.
        let mut remaining = VecDeque::new();
        while let Some(queued) = subscriber.queue.pop_front() {
            if queued.event.priority.bypasses_batching() {
                deliveries.push(Delivery::Immediate(queued.event));
            } else {
                remaining.push_back(queued);
            }
        }
        subscriber.queue = remaining;

        if let Some(batch) = take_ready_batch(&mut subscriber, &self.config) {
            if should_compress(&batch, &self.config) {
                if let Ok(bytes) = compress_batch(&batch) {
                    deliveries.push(Delivery::CompressedBatch(bytes));
                } else {
                    deliveries.push(Delivery::Batch(batch));
                }
            } else {
                deliveries.push(Delivery::Batch(batch));
            }
        }

        deliveries
    }
}

fn enqueue(subscriber: &mut Subscriber, event: Event, capacity: usize) {
    let is_priority = event.priority.bypasses_batching();

    if subscriber.queue.len() < capacity {
        subscriber.queue.push_back(QueuedEvent { event, enqueued_at: Instant::now() });
        return;
    }

    // Full: evict the oldest low-priority entry to make room.
    if let Some(pos) = subscriber.queue.iter().position(|q| q.event.priority == EventPriority::Low) {
        subscriber.queue.remove(pos);
        subscriber.queue.push_back(QueuedEvent { event, enqueued_at: Instant::now() });
        subscriber.dropped_count += 1;
        return;
    }

    if !is_priority {
        // Nothing low-priority to evict and this isn't critical: drop it.
        subscriber.dropped_count += 1;
        return;
    }

    // Saturated with non-Low entries and the incoming event is Critical/Urgent:
    // evict the queued entry with the lowest priority (ties broken by age)
    // rather than blindly the oldest, so a Critical/Urgent entry already in
    // the queue is only the one evicted when every other queued entry is at
    // least as important as the incoming one. Either way, something is being
    // discarded unseen, so count it — nothing leaves the queue silently.
    let evict_pos = subscriber
        .queue
        .iter()
        .enumerate()
        .min_by_key(|(_, q)| (q.event.priority, q.enqueued_at))
        .map(|(i, _)| i);
    if let Some(pos) = evict_pos {
        subscriber.queue.remove(pos);
    }
    subscriber.queue.push_back(QueuedEvent { event, enqueued_at: Instant::now() });
    subscriber.dropped_count += 1;
    subscriber.status = ConnectionStatus::Recovering;
}

fn take_ready_batch(subscriber: &mut Subscriber, config: &EventBusConfig) -> Option<Vec<Event>> {
    if subscriber.queue.is_empty() {
        return None;
    }

    let oldest_age = subscriber.queue.front().map(|q| q.enqueued_at.elapsed()).unwrap_or_default();
    let batch_timeout = Duration::from_millis(config.batch_timeout_ms as u64);

    let size_ready = subscriber.queue.len() >= subscriber.batch_size.current_items as usize;
    let bytes_ready = serialized_len(subscriber.queue.iter().map(|q| &q.event)) >= config.max_batch_bytes as usize;
    let time_ready = oldest_age >= batch_timeout;

    if !(size_ready || bytes_ready || time_ready) {
        return None;
    }

    if size_ready || bytes_ready {
        subscriber.batch_size.record_size_triggered_flush();
    } else {
        subscriber.batch_size.record_timeout_triggered_flush();
    }

    let take_n = subscriber.queue.len().min(subscriber.batch_size.max_items as usize);
    Some(subscriber.queue.drain(..take_n).map(|q| q.event).collect())
}

fn serialized_len<'a>(events: impl Iterator<Item = &'a Event>) -> usize {
    events.map(|e| serde_json::to_vec(e).map(|b| b.len()).unwrap_or(0)).sum()
}

fn should_compress(batch: &[Event], config: &EventBusConfig) -> bool {
    serialized_len(batch.iter()) >= config.compression_min_bytes as usize
}

fn compress_batch(batch: &[Event]) -> std::io::Result<Vec<u8>> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let json = serde_json::to_vec(batch)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    encoder.finish()
}

/// Redact fields a non-admin subscriber shouldn't see from a security
/// event's `data` payload.
fn scrub_event(event: &Event, permissions: &[String]) -> Event {
    use crate::store::model::EventCategory;

    if event.category != EventCategory::Security || permissions.iter().any(|p| p == ADMIN_PERMISSION) {
        return event.clone();
    }

    let mut scrubbed = event.clone();
    if let serde_json::Value::Object(map) = &mut scrubbed.data {
        for field in SECURITY_SENSITIVE_FIELDS {
            map.remove(*field);
        }
    }
    scrubbed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::model::EventCategory;
    use crate::store::model::EventSeverity;

    fn event(priority: EventPriority, category: EventCategory) -> Event {
        Event {
            event_id: Uuid::new_v4(),
            event_type: "test.event".to_string(),
            category,
            severity: EventSeverity::Info,
            priority,
            source: "test".to_string(),
            data: serde_json::json!({"source_ip": "10.0.0.1", "threat_indicators": ["x"], "confidence_score": 0.9}),
            correlation_id: None,
            trace_id: None,
            created_at: chrono::Utc::now(),
            persist: false,
        }
    }

    #[tokio::test]
    async fn test_emit_delivers_immediate_for_critical() {
        let bus = EventBus::new(MemoryStore::new(), EventBusConfig::default());
        let conn = Uuid::new_v4();
        bus.subscribe(conn, SubscriptionFilter::default(), vec![]);

        bus.emit(event(EventPriority::Critical, EventCategory::System)).await.unwrap();

        let deliveries = bus.poll_outgoing(conn);
        assert_eq!(deliveries.len(), 1);
        assert!(matches!(deliveries[0], Delivery::Immediate(_)));
    }

    #[tokio::test]
    async fn test_non_admin_subscriber_gets_scrubbed_security_fields() {
        let bus = EventBus::new(MemoryStore::new(), EventBusConfig::default());
        let conn = Uuid::new_v4();
        bus.subscribe(conn, SubscriptionFilter::default(), vec![]);

        bus.emit(event(EventPriority::Critical, EventCategory::Security)).await.unwrap();
        let deliveries = bus.poll_outgoing(conn);
        let Delivery::Immediate(delivered) = &deliveries[0] else { panic!("expected immediate delivery") };
        assert!(delivered.data.get("source_ip").is_none());
    }

    #[tokio::test]
    async fn test_admin_subscriber_keeps_security_fields() {
        let bus = EventBus::new(MemoryStore::new(), EventBusConfig::default());
        let conn = Uuid::new_v4();
        bus.subscribe(conn, SubscriptionFilter::default(), vec!["admin".to_string()]);

        bus.emit(event(EventPriority::Critical, EventCategory::Security)).await.unwrap();
        let deliveries = bus.poll_outgoing(conn);
        let Delivery::Immediate(delivered) = &deliveries[0] else { panic!("expected immediate delivery") };
        assert!(delivered.data.get("source_ip").is_some());
    }

    #[tokio::test]
    async fn test_unmatched_filter_does_not_enqueue() {
        let bus = EventBus::new(MemoryStore::new(), EventBusConfig::default());
        let conn = Uuid::new_v4();
        let filter = SubscriptionFilter {
            categories: vec![EventCategory::Dns],
            ..Default::default()
        };
        bus.subscribe(conn, filter, vec![]);

        bus.emit(event(EventPriority::Normal, EventCategory::Security)).await.unwrap();
        assert!(bus.poll_outgoing(conn).is_empty());
    }

    #[tokio::test]
    async fn test_saturated_with_criticals_increments_dropped_count() {
        let mut config = EventBusConfig::default();
        config.queue_capacity = 2;
        let bus = EventBus::new(MemoryStore::new(), config);
        let conn = Uuid::new_v4();
        bus.subscribe(conn, SubscriptionFilter::default(), vec![]);

        // Fill the queue with two Critical events (nothing Low to evict).
        bus.emit(event(EventPriority::Critical, EventCategory::System)).await.unwrap();
        bus.emit(event(EventPriority::Critical, EventCategory::System)).await.unwrap();
        // A third Critical event arrives: the queue is saturated with
        // non-evictable priorities, so one of the queued entries is evicted
        // to make room, and the drop must be counted, never silent.
        bus.emit(event(EventPriority::Urgent, EventCategory::System)).await.unwrap();

        let dropped = bus.subscribers.get(&conn).unwrap().dropped_count;
        assert_eq!(dropped, 1);
    }

    #[tokio::test]
    async fn test_saturated_queue_evicts_lower_priority_before_critical() {
        let mut config = EventBusConfig::default();
        config.queue_capacity = 2;
        let bus = EventBus::new(MemoryStore::new(), config);
        let conn = Uuid::new_v4();
        bus.subscribe(conn, SubscriptionFilter::default(), vec![]);

        bus.emit(event(EventPriority::Critical, EventCategory::System)).await.unwrap();
        bus.emit(event(EventPriority::High, EventCategory::System)).await.unwrap();
        bus.emit(event(EventPriority::Urgent, EventCategory::System)).await.unwrap();

        let remaining: Vec<EventPriority> = bus.subscribers.get(&conn).unwrap().queue.iter().map(|q| q.event.priority).collect();
        assert!(remaining.contains(&EventPriority::Critical));
        assert!(!remaining.contains(&EventPriority::High));
    }

    #[test]
    fn test_adaptive_batch_grows_and_shrinks_within_bounds() {
        let mut size = AdaptiveBatchSize::new(50);
        size.record_size_triggered_flush();
        assert!(size.current_items > 50);
        for _ in 0..20 {
            size.record_timeout_triggered_flush();
        }
        assert!(size.current_items >= size.min_items);
    }
}
