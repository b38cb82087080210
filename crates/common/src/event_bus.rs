use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Topic(pub &'static str);

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// Events that know which topic they belong to.
pub trait BusEvent: Clone + Send + Sync + Debug + 'static {
    fn topic(&self) -> Topic;
}

#[derive(Debug, Clone)]
pub struct EventEnvelope<T: Clone + Send + Sync + Debug + 'static> {
    pub topic: Topic,
    pub payload: T,
    pub ts_ms: u128,
}

/// Topic-keyed publish/subscribe over `tokio::sync::broadcast`.
///
/// Every published envelope is delivered to the subscribers of its topic and
/// to every `subscribe_all` receiver. Publishing never waits on subscribers:
/// a slow receiver lags and loses the oldest envelopes.
#[derive(Clone)]
pub struct EventBus<T: Clone + Send + Sync + Debug + 'static> {
    inner: Arc<RwLock<Inner<T>>>,
    firehose: broadcast::Sender<EventEnvelope<T>>,
    subscribe_buffer: usize,
}

struct Inner<T: Clone + Send + Sync + Debug + 'static> {
    topics: HashMap<&'static str, broadcast::Sender<EventEnvelope<T>>>,
}

impl<T: Clone + Send + Sync + Debug + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new(256)
    }
}

impl<T: Clone + Send + Sync + Debug + 'static> EventBus<T> {
    pub fn new(subscribe_buffer: usize) -> Self {
        let subscribe_buffer = subscribe_buffer.max(1);
        let (firehose, _rx) = broadcast::channel(subscribe_buffer);
        Self {
            inner: Arc::new(RwLock::new(Inner {
                topics: HashMap::new(),
            })),
            firehose,
            subscribe_buffer,
        }
    }

    async fn sender_for(&self, topic: Topic) -> broadcast::Sender<EventEnvelope<T>> {
        if let Some(tx) = self.inner.read().await.topics.get(topic.0) {
            return tx.clone();
        }
        let mut inner = self.inner.write().await;
        inner
            .topics
            .entry(topic.0)
            .or_insert_with(|| {
                trace!(target: "event_bus", topic = topic.0, "created topic");
                broadcast::channel(self.subscribe_buffer).0
            })
            .clone()
    }

    pub async fn publish(&self, topic: Topic, payload: T) {
        let envelope = EventEnvelope {
            topic,
            payload,
            ts_ms: current_ts_ms(),
        };
        let tx = self.sender_for(topic).await;
        let delivered = tx.send(envelope.clone()).unwrap_or(0);
        let _ = self.firehose.send(envelope);
        debug!(target: "event_bus", topic = topic.0, delivered, "published");
    }

    pub async fn subscribe(&self, topic: Topic) -> broadcast::Receiver<EventEnvelope<T>> {
        self.sender_for(topic).await.subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<EventEnvelope<T>> {
        self.firehose.subscribe()
    }
}

impl<T: BusEvent> EventBus<T> {
    pub async fn emit(&self, event: T) {
        let topic = event.topic();
        self.publish(topic, event).await;
    }
}

fn current_ts_ms() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[derive(Debug, Clone, PartialEq)]
    enum Ping {
        Up(u32),
        Down,
    }

    impl BusEvent for Ping {
        fn topic(&self) -> Topic {
            match self {
                Ping::Up(_) => Topic("ping:up"),
                Ping::Down => Topic("ping:down"),
            }
        }
    }

    #[tokio::test]
    async fn publish_subscribe_basic() {
        let bus: EventBus<String> = EventBus::new(8);
        let mut rx = bus.subscribe(Topic("test.topic")).await;
        bus.publish(Topic("test.topic"), "hello".to_string()).await;
        let evt = rx.recv().await.expect("should receive");
        assert_eq!(evt.topic.0, "test.topic");
        assert_eq!(evt.payload, "hello".to_string());
    }

    #[tokio::test]
    async fn publish_to_empty_topic_does_not_panic() {
        let bus: EventBus<u64> = EventBus::default();
        bus.publish(Topic("no.subscribers"), 42).await;
    }

    #[tokio::test]
    async fn emit_routes_by_event_topic() {
        let bus: EventBus<Ping> = EventBus::new(8);
        let mut up = bus.subscribe(Topic("ping:up")).await;
        let mut down = bus.subscribe(Topic("ping:down")).await;

        bus.emit(Ping::Up(3)).await;

        assert_eq!(up.recv().await.expect("up").payload, Ping::Up(3));
        let nothing = timeout(Duration::from_millis(50), down.recv()).await;
        assert!(nothing.is_err(), "down topic must stay quiet");
    }

    #[tokio::test]
    async fn firehose_sees_every_topic() {
        let bus: EventBus<Ping> = EventBus::new(8);
        let mut all = bus.subscribe_all();

        bus.emit(Ping::Up(1)).await;
        bus.emit(Ping::Down).await;

        assert_eq!(all.recv().await.expect("first").topic, Topic("ping:up"));
        assert_eq!(all.recv().await.expect("second").topic, Topic("ping:down"));
    }

    #[tokio::test]
    async fn lagging_receiver_keeps_latest() {
        let bus: EventBus<u64> = EventBus::new(1);
        let mut rx = bus.subscribe(Topic("bp.topic")).await;

        bus.publish(Topic("bp.topic"), 1).await;
        bus.publish(Topic("bp.topic"), 2).await;

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
        assert_eq!(rx.recv().await.expect("latest").payload, 2);
    }
}
