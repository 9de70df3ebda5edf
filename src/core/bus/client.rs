// src/core/bus/client.rs

use crate::config::BrokerConfig;
use crate::core::events::{DomainEvent, EventBus};
use dashmap::DashMap;
use rand::Rng;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, broadcast};
use tracing::{debug, error, info, warn};

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

struct OutboundMessage {
    topic: String,
    payload: Vec<u8>,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    received: AtomicU64,
    publish_errors: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BusStats {
    pub published: u64,
    pub received: u64,
    pub publish_errors: u64,
    pub dropped: u64,
    pub queue_depth: usize,
    pub connected: bool,
}

struct OutboundQueue {
    deque: Mutex<VecDeque<OutboundMessage>>,
    notify: Notify,
    capacity: usize,
}

impl OutboundQueue {
    fn new(capacity: usize) -> Self {
        Self {
            deque: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            notify: Notify::new(),
            capacity,
        }
    }

    async fn push(&self, msg: OutboundMessage, counters: &Counters) {
        let mut guard = self.deque.lock().await;
        if guard.len() >= self.capacity {
            guard.pop_front();
            counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(msg);
        drop(guard);
        self.notify.notify_one();
    }

    async fn depth(&self) -> usize {
        self.deque.lock().await.len()
    }
}

/// A persistent client connection to the message bus. Reconnects with
/// exponential backoff and jitter, re-subscribing and flushing the
/// outbound queue once reconnected — the same shape as the teacher's
/// replication worker's reconnect loop, generalized from replication
/// command streaming to MQTT publish/subscribe.
#[derive(Clone)]
pub struct BusClient {
    queue: Arc<OutboundQueue>,
    counters: Arc<Counters>,
    connected: Arc<std::sync::atomic::AtomicBool>,
    subscriptions: Arc<DashMap<String, broadcast::Sender<IncomingMessage>>>,
}

impl BusClient {
    pub fn connect(
        config: BrokerConfig,
        events: EventBus,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let queue = Arc::new(OutboundQueue::new(config.outbound_queue_capacity));
        let counters = Arc::new(Counters::default());
        let connected = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let subscriptions: Arc<DashMap<String, broadcast::Sender<IncomingMessage>>> =
            Arc::new(DashMap::new());

        let task_queue = queue.clone();
        let task_counters = counters.clone();
        let task_connected = connected.clone();
        let task_subs = subscriptions.clone();

        tokio::spawn(async move {
            let mut delay = INITIAL_RECONNECT_DELAY;
            loop {
                tokio::select! {
                    result = run_connection_cycle(
                        &config,
                        &task_queue,
                        &task_counters,
                        &task_connected,
                        &task_subs,
                        &events,
                    ) => {
                        task_connected.store(false, Ordering::Relaxed);
                        events.publish(DomainEvent::BusConnectionChanged {
                            connected: false,
                            at: chrono::Utc::now(),
                        });
                        if let Err(e) = result {
                            warn!("bus connection cycle ended: {e}");
                        }
                        let jitter_ms = rand::thread_rng().gen_range(0..500);
                        let sleep_for = delay + Duration::from_millis(jitter_ms);
                        warn!("reconnecting to message bus in {sleep_for:?}");
                        tokio::time::sleep(sleep_for).await;
                        delay = (delay * 2).min(Duration::from_secs(
                            config.max_reconnect_delay_secs.max(1),
                        ));
                    }
                    _ = shutdown_rx.recv() => {
                        info!("bus client shutting down");
                        break;
                    }
                }
            }
        });

        Self {
            queue,
            counters,
            connected,
            subscriptions,
        }
    }

    /// Enqueues a message for publish. The oldest queued message is dropped
    /// if the bounded queue is full; publish is always best-effort from the
    /// caller's perspective.
    pub async fn publish(&self, topic: &str, payload: Vec<u8>) {
        self.queue
            .push(
                OutboundMessage {
                    topic: topic.to_string(),
                    payload,
                },
                &self.counters,
            )
            .await;
    }

    /// Subscribes to an MQTT topic pattern, returning a receiver of matching
    /// messages. Patterns are re-subscribed with the broker on every
    /// reconnect.
    pub fn subscribe(&self, pattern: &str) -> broadcast::Receiver<IncomingMessage> {
        self.subscriptions
            .entry(pattern.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .subscribe()
    }

    pub async fn stats(&self) -> BusStats {
        BusStats {
            published: self.counters.published.load(Ordering::Relaxed),
            received: self.counters.received.load(Ordering::Relaxed),
            publish_errors: self.counters.publish_errors.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            queue_depth: self.queue.depth().await,
            connected: self.connected.load(Ordering::Relaxed),
        }
    }
}

async fn run_connection_cycle(
    config: &BrokerConfig,
    queue: &Arc<OutboundQueue>,
    counters: &Arc<Counters>,
    connected: &Arc<std::sync::atomic::AtomicBool>,
    subscriptions: &Arc<DashMap<String, broadcast::Sender<IncomingMessage>>>,
    events: &EventBus,
) -> Result<(), rumqttc::ConnectionError> {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(30));
    if !config.username.is_empty() {
        options.set_credentials(&config.username, &config.password);
    }

    let (client, mut eventloop) = AsyncClient::new(options, 64);

    for pattern in subscriptions.iter().map(|e| e.key().clone()) {
        if let Err(e) = client.subscribe(&pattern, QoS::AtLeastOnce).await {
            warn!("failed to (re)subscribe to {pattern}: {e}");
        }
    }

    let flush_client = client.clone();
    let flush_queue = queue.clone();
    let flush_counters = counters.clone();
    let batch_max = config.batch_max_messages.max(1);
    let batch_delay = Duration::from_millis(config.batch_max_delay_ms.max(1));
    let flusher = tokio::spawn(async move {
        loop {
            tokio::time::sleep(batch_delay).await;
            let mut batch = Vec::new();
            {
                let mut guard = flush_queue.deque.lock().await;
                for _ in 0..batch_max {
                    match guard.pop_front() {
                        Some(msg) => batch.push(msg),
                        None => break,
                    }
                }
            }
            for msg in batch {
                match flush_client
                    .publish(&msg.topic, QoS::AtLeastOnce, false, msg.payload)
                    .await
                {
                    Ok(_) => {
                        flush_counters.published.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        flush_counters
                            .publish_errors
                            .fetch_add(1, Ordering::Relaxed);
                        debug!("publish failed: {e}");
                    }
                }
            }
        }
    });

    connected.store(true, Ordering::Relaxed);
    events.publish(DomainEvent::BusConnectionChanged {
        connected: true,
        at: chrono::Utc::now(),
    });
    info!("connected to message bus at {}:{}", config.host, config.port);

    let result = loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                counters.received.fetch_add(1, Ordering::Relaxed);
                let topic = publish.topic.clone();
                let message = IncomingMessage {
                    topic: topic.clone(),
                    payload: publish.payload.to_vec(),
                };
                for entry in subscriptions.iter() {
                    if topic_matches(entry.key(), &topic) {
                        let _ = entry.value().send(message.clone());
                    }
                }
            }
            Ok(_) => {}
            Err(e) => break Err(e),
        }
    };

    flusher.abort();
    result
}

/// Minimal MQTT topic wildcard matcher supporting `+` (single level) and
/// `#` (multi-level trailing) segments.
fn topic_matches(pattern: &str, topic: &str) -> bool {
    let pattern_parts: Vec<&str> = pattern.split('/').collect();
    let topic_parts: Vec<&str> = topic.split('/').collect();

    for (i, p) in pattern_parts.iter().enumerate() {
        if *p == "#" {
            return true;
        }
        match topic_parts.get(i) {
            Some(t) if *p == "+" || p == t => continue,
            _ => return false,
        }
    }
    pattern_parts.len() == topic_parts.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_plain_topics() {
        assert!(topic_matches(
            "consultease/faculty/1/requests",
            "consultease/faculty/1/requests"
        ));
        assert!(!topic_matches(
            "consultease/faculty/1/requests",
            "consultease/faculty/2/requests"
        ));
    }

    #[test]
    fn matches_single_level_wildcard() {
        assert!(topic_matches(
            "consultease/faculty/+/requests",
            "consultease/faculty/7/requests"
        ));
    }

    #[test]
    fn matches_multi_level_wildcard() {
        assert!(topic_matches("professor/#", "professor/status/7"));
    }
}
