use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::{debug, error, warn};

use murmur_types::events::GatewayEvent;
use murmur_types::models::{Message, Topic};

use crate::error::HubError;
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::store::SharedStore;

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum message length in characters.
    pub max_content_len: usize,
    /// Maximum sender length in characters.
    pub max_sender_len: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_content_len: 4096,
            max_sender_len: 64,
        }
    }
}

/// Persists published messages and fans them out to topic subscribers.
///
/// Publishes on one topic run one at a time (a "lane" per topic), so every
/// subscriber sees that topic's messages in the order they were stored.
/// Different topics proceed in parallel.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    store: SharedStore,
    registry: ConnectionRegistry,
    config: HubConfig,
    lanes: Mutex<HashMap<Topic, Arc<tokio::sync::Mutex<()>>>>,
}

impl BroadcastHub {
    pub fn new(store: SharedStore, registry: ConnectionRegistry, config: HubConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                store,
                registry,
                config,
                lanes: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    pub fn store(&self) -> &SharedStore {
        &self.inner.store
    }

    /// Persist a message, then deliver it to everyone subscribed to `topic`
    /// at that moment. Returns the stored message with its assigned id.
    ///
    /// Nothing is delivered unless the store accepted the message. Once
    /// started, the store write and fan-out finish even if the returned
    /// future is dropped.
    pub async fn publish(
        &self,
        topic: Topic,
        content: String,
        sender: String,
    ) -> Result<Message, HubError> {
        self.validate(&content, &sender)?;

        let hub = self.clone();
        tokio::spawn(async move { hub.persist_and_fan_out(topic, content, sender).await }).await?
    }

    fn validate(&self, content: &str, sender: &str) -> Result<(), HubError> {
        let config = &self.inner.config;

        if content.trim().is_empty() {
            return Err(HubError::InvalidArgument("content must not be empty".into()));
        }
        if content.chars().count() > config.max_content_len {
            return Err(HubError::InvalidArgument(format!(
                "content exceeds {} characters",
                config.max_content_len
            )));
        }
        if sender.trim().is_empty() {
            return Err(HubError::InvalidArgument("sender must not be empty".into()));
        }
        if sender.chars().count() > config.max_sender_len {
            return Err(HubError::InvalidArgument(format!(
                "sender exceeds {} characters",
                config.max_sender_len
            )));
        }

        Ok(())
    }

    async fn persist_and_fan_out(
        &self,
        topic: Topic,
        content: String,
        sender: String,
    ) -> Result<Message, HubError> {
        let lane = self.lane(&topic);
        let turn = lane.lock().await;

        let store = self.inner.store.clone();
        let message =
            tokio::task::spawn_blocking(move || store.create(&content, &sender)).await??;

        let event = GatewayEvent::MessageCreate {
            topic: topic.clone(),
            message: message.clone(),
        };
        let failed = match serde_json::to_vec(&event) {
            Ok(json) => self.fan_out(&topic, Bytes::from(json)),
            Err(e) => {
                error!("Failed to encode message {}: {}", message.id, e);
                Vec::new()
            }
        };

        drop(turn);
        self.release_lane(&topic, lane);

        for id in failed {
            self.inner.registry.unregister(id);
        }

        Ok(message)
    }

    /// Deliver to a snapshot of the topic's subscribers. The registry lock is
    /// released before the first send. Returns the connections that failed.
    fn fan_out(&self, topic: &Topic, frame: Bytes) -> Vec<ConnectionId> {
        let subscribers = self.inner.registry.subscribers_of(topic);
        let mut failed = Vec::new();

        for connection in &subscribers {
            if let Err(e) = connection.deliver(frame.clone()) {
                warn!(
                    "Delivery to {} on '{}' failed: {}; dropping connection",
                    connection.id(),
                    topic,
                    e
                );
                failed.push(connection.id());
            }
        }

        debug!(
            "Fanned out to {}/{} subscribers of '{}'",
            subscribers.len() - failed.len(),
            subscribers.len(),
            topic
        );
        failed
    }

    fn lane(&self, topic: &Topic) -> Arc<tokio::sync::Mutex<()>> {
        let mut lanes = self.inner.lanes.lock().unwrap_or_else(|e| e.into_inner());
        lanes.entry(topic.clone()).or_default().clone()
    }

    /// Forget a topic's lane when nobody else holds or waits on it.
    fn release_lane(&self, topic: &Topic, lane: Arc<tokio::sync::Mutex<()>>) {
        let mut lanes = self.inner.lanes.lock().unwrap_or_else(|e| e.into_inner());
        drop(lane);
        if lanes.get(topic).is_some_and(|held| Arc::strong_count(held) == 1) {
            lanes.remove(topic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::error::{DeliveryError, StoreError};
    use crate::outbound::Outbound;
    use crate::registry::Connection;
    use crate::store::{MemoryStore, MessageFilter, MessageStore};
    use murmur_types::models::MessageId;

    #[derive(Clone, Default)]
    struct Recorder {
        frames: Arc<Mutex<Vec<Bytes>>>,
    }

    impl Recorder {
        fn message_ids(&self) -> Vec<MessageId> {
            self.frames
                .lock()
                .unwrap()
                .iter()
                .map(|frame| match serde_json::from_slice(frame).unwrap() {
                    GatewayEvent::MessageCreate { message, .. } => message.id,
                    other => panic!("unexpected event: {:?}", other),
                })
                .collect()
        }
    }

    impl Outbound for Recorder {
        fn send(&self, frame: Bytes) -> Result<(), DeliveryError> {
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
    }

    struct Broken;

    impl Outbound for Broken {
        fn send(&self, _frame: Bytes) -> Result<(), DeliveryError> {
            Err(DeliveryError::Closed)
        }
    }

    /// Unregisters another connection from inside its own delivery.
    struct Evictor {
        registry: ConnectionRegistry,
        victim: ConnectionId,
    }

    impl Outbound for Evictor {
        fn send(&self, _frame: Bytes) -> Result<(), DeliveryError> {
            self.registry.unregister(self.victim);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FailingStore {
        creates: AtomicUsize,
    }

    impl MessageStore for FailingStore {
        fn create(&self, _content: &str, _sender: &str) -> Result<Message, StoreError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("disk on fire".into()))
        }

        fn scan(
            &self,
            _filter: &MessageFilter,
            _after: Option<MessageId>,
            _limit: usize,
        ) -> Result<Vec<Message>, StoreError> {
            Ok(Vec::new())
        }

        fn find_by_id(&self, _id: MessageId) -> Result<Option<Message>, StoreError> {
            Ok(None)
        }

        fn recent(&self, _limit: usize) -> Result<Vec<Message>, StoreError> {
            Ok(Vec::new())
        }

        fn count(&self) -> Result<u64, StoreError> {
            Ok(0)
        }
    }

    /// Memory store whose writes take a while.
    struct SlowStore(MemoryStore);

    impl MessageStore for SlowStore {
        fn create(&self, content: &str, sender: &str) -> Result<Message, StoreError> {
            std::thread::sleep(Duration::from_millis(100));
            self.0.create(content, sender)
        }

        fn scan(
            &self,
            filter: &MessageFilter,
            after: Option<MessageId>,
            limit: usize,
        ) -> Result<Vec<Message>, StoreError> {
            self.0.scan(filter, after, limit)
        }

        fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, StoreError> {
            self.0.find_by_id(id)
        }

        fn recent(&self, limit: usize) -> Result<Vec<Message>, StoreError> {
            self.0.recent(limit)
        }

        fn count(&self) -> Result<u64, StoreError> {
            self.0.count()
        }
    }

    fn hub_with(store: SharedStore) -> BroadcastHub {
        BroadcastHub::new(store, ConnectionRegistry::new(), HubConfig::default())
    }

    fn join(hub: &BroadcastHub, topic: &str, outbound: impl Outbound + 'static) -> ConnectionId {
        let id = ConnectionId::new();
        hub.registry()
            .register(Connection::new(id, None, outbound), [Topic::from(topic)])
            .unwrap();
        id
    }

    async fn say(hub: &BroadcastHub, topic: &str, content: &str) -> Result<Message, HubError> {
        hub.publish(Topic::from(topic), content.to_string(), "tester".to_string())
            .await
    }

    #[tokio::test]
    async fn sequential_publishes_arrive_in_order() {
        let hub = hub_with(Arc::new(MemoryStore::new()));
        let a = Recorder::default();
        let b = Recorder::default();
        join(&hub, "general", a.clone());
        join(&hub, "general", b.clone());

        let mut published = Vec::new();
        for i in 0..20 {
            published.push(say(&hub, "general", &format!("msg {}", i)).await.unwrap().id);
        }

        assert_eq!(a.message_ids(), published);
        assert_eq!(b.message_ids(), published);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_publishers_share_one_order() {
        let hub = hub_with(Arc::new(MemoryStore::new()));
        let a = Recorder::default();
        let b = Recorder::default();
        join(&hub, "general", a.clone());
        join(&hub, "general", b.clone());

        let mut tasks = Vec::new();
        for worker in 0..4 {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..25 {
                    say(&hub, "general", &format!("w{} #{}", worker, i)).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let seen = a.message_ids();
        assert_eq!(seen.len(), 100);
        assert!(seen.windows(2).all(|w| w[0] < w[1]), "store order not preserved");
        assert_eq!(seen, b.message_ids());
    }

    #[tokio::test]
    async fn failed_persistence_delivers_nothing() {
        let store = Arc::new(FailingStore::default());
        let hub = hub_with(store.clone());
        let a = Recorder::default();
        join(&hub, "general", a.clone());

        let err = say(&hub, "general", "lost").await.unwrap_err();
        assert!(matches!(err, HubError::Persistence(StoreError::Unavailable(_))));
        assert_eq!(store.creates.load(Ordering::SeqCst), 1);
        assert!(a.frames.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn broken_subscriber_is_isolated_and_dropped() {
        let hub = hub_with(Arc::new(MemoryStore::new()));
        let healthy = Recorder::default();
        let healthy_id = join(&hub, "general", healthy.clone());
        let broken_id = join(&hub, "general", Broken);

        let message = say(&hub, "general", "still here").await.unwrap();

        assert_eq!(healthy.message_ids(), vec![message.id]);
        assert!(hub.registry().contains(healthy_id));
        assert!(!hub.registry().contains(broken_id));
    }

    #[tokio::test]
    async fn unregister_during_fan_out_does_not_block_others() {
        let hub = hub_with(Arc::new(MemoryStore::new()));
        let victim = Recorder::default();
        let victim_id = join(&hub, "general", victim.clone());
        join(
            &hub,
            "general",
            Evictor {
                registry: hub.registry().clone(),
                victim: victim_id,
            },
        );

        let message = tokio::time::timeout(Duration::from_secs(2), say(&hub, "general", "bye"))
            .await
            .expect("publish blocked on the registry")
            .unwrap();

        // The victim was in the snapshot, so it still gets this message.
        assert_eq!(victim.message_ids(), vec![message.id]);
        assert!(!hub.registry().contains(victim_id));
    }

    #[tokio::test]
    async fn topics_are_isolated_and_late_joiners_get_no_replay() {
        let hub = hub_with(Arc::new(MemoryStore::new()));
        let general = Recorder::default();
        let random = Recorder::default();
        join(&hub, "general", general.clone());
        join(&hub, "random", random.clone());

        let first = say(&hub, "general", "one").await.unwrap();

        let late = Recorder::default();
        join(&hub, "general", late.clone());
        let second = say(&hub, "general", "two").await.unwrap();

        assert_eq!(general.message_ids(), vec![first.id, second.id]);
        assert_eq!(late.message_ids(), vec![second.id]);
        assert!(random.message_ids().is_empty());
    }

    #[tokio::test]
    async fn invalid_messages_are_not_persisted() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let hub = hub_with(store.clone());

        let err = say(&hub, "general", "   ").await.unwrap_err();
        assert!(matches!(err, HubError::InvalidArgument(_)));

        let err = hub
            .publish(Topic::default(), "hi".into(), String::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::InvalidArgument(_)));

        let too_long = "x".repeat(HubConfig::default().max_content_len + 1);
        assert!(say(&hub, "general", &too_long).await.is_err());

        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn dropped_publish_still_fans_out() {
        let hub = hub_with(Arc::new(SlowStore(MemoryStore::new())));
        let a = Recorder::default();
        join(&hub, "general", a.clone());

        let abandoned =
            tokio::time::timeout(Duration::from_millis(10), say(&hub, "general", "orphan")).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(a.message_ids(), vec![1]);
        assert_eq!(hub.store().count().unwrap(), 1);
    }

    #[tokio::test]
    async fn idle_lanes_are_released() {
        let hub = hub_with(Arc::new(MemoryStore::new()));
        say(&hub, "general", "one").await.unwrap();
        say(&hub, "random", "two").await.unwrap();

        assert!(hub.inner.lanes.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn contended_lanes_are_released() {
        let hub = hub_with(Arc::new(MemoryStore::new()));

        let mut tasks = Vec::new();
        for worker in 0..8 {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..10 {
                    say(&hub, "general", &format!("w{} #{}", worker, i)).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(hub.inner.lanes.lock().unwrap().is_empty());
        assert_eq!(hub.store().count().unwrap(), 80);
    }
}
