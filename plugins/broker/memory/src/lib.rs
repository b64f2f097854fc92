//! In-process broker.
//!
//! Topics are vectors of partitions held in memory; consumer groups keep
//! their committed offsets here too. Good enough to run the pipeline on one
//! machine and to drive the engine in tests. One consumer per group: every
//! member of a group is assigned all matching partitions.

mod registry;

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;

use transit_api::{
    Broker, BrokerAdmin, ClientError, ConsumerSettings, ConsumerTransport, Message, NewTopic,
    Offset, OffsetReset, OutboundMessage, PartitionAssignment, ProducerSettings,
    ProducerTransport, RebalanceListener, TopicPattern,
};

pub use registry::MemorySchemaRegistry;

// ═══════════════════════════════════════════════════════════════
//  Shared state
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct Stored {
    ts_ms: i64,
    key: Option<Vec<u8>>,
    payload: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct TopicLog {
    partitions: Vec<Vec<Stored>>,
}

impl TopicLog {
    fn end_offset(&self, partition: i32) -> i64 {
        usize::try_from(partition)
            .ok()
            .and_then(|p| self.partitions.get(p))
            .map_or(0, |p| p.len() as i64)
    }

    fn get(&self, partition: i32, offset: i64) -> Option<&Stored> {
        let p = usize::try_from(partition).ok()?;
        let o = usize::try_from(offset).ok()?;
        self.partitions.get(p)?.get(o)
    }
}

type PartitionKey = (String, i32);

#[derive(Debug, Default)]
struct State {
    topics: BTreeMap<String, TopicLog>,
    /// group id → committed next offset per partition.
    committed: HashMap<String, HashMap<PartitionKey, i64>>,
}

impl State {
    fn create_topic(&mut self, name: &str, partitions: i32) -> Result<(), ClientError> {
        if partitions < 1 {
            return Err(ClientError::config(format!(
                "topic '{name}': partitions must be at least 1, got {partitions}"
            )));
        }
        if self.topics.contains_key(name) {
            return Err(ClientError::logic(format!("topic '{name}' already exists")));
        }
        let log = TopicLog {
            partitions: vec![Vec::new(); partitions as usize],
        };
        self.topics.insert(name.to_string(), log);
        Ok(())
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    /// Woken on every append and topic creation.
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("memory broker lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryBroker
// ═══════════════════════════════════════════════════════════════

/// Cheap to clone; clones share the same topics.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_topic(&self, name: &str, partitions: i32) -> Result<(), ClientError> {
        self.shared.lock().create_topic(name, partitions)?;
        self.shared.notify.notify_waiters();
        Ok(())
    }

    pub fn topic_names(&self) -> Vec<String> {
        self.shared.lock().topics.keys().cloned().collect()
    }

    pub fn partition_count(&self, topic: &str) -> Option<i32> {
        self.shared
            .lock()
            .topics
            .get(topic)
            .map(|t| t.partitions.len() as i32)
    }

    /// Every message of `topic`, partition by partition.
    pub fn messages(&self, topic: &str) -> Vec<Message> {
        let state = self.shared.lock();
        let Some(log) = state.topics.get(topic) else {
            return Vec::new();
        };
        log.partitions
            .iter()
            .enumerate()
            .flat_map(|(p, records)| {
                records.iter().enumerate().map(move |(o, r)| Message {
                    topic: topic.to_string(),
                    partition: p as i32,
                    offset: o as i64,
                    ts_ms: r.ts_ms,
                    key: r.key.clone(),
                    payload: r.payload.clone(),
                })
            })
            .collect()
    }

    /// Next offset `group` will read from `topic[partition]`, if it ever read it.
    pub fn committed(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.shared
            .lock()
            .committed
            .get(group)?
            .get(&(topic.to_string(), partition))
            .copied()
    }
}

impl Broker for MemoryBroker {
    fn consumer(&self, settings: &ConsumerSettings) -> Result<Box<dyn ConsumerTransport>, ClientError> {
        tracing::debug!(
            bootstrap = %settings.bootstrap_servers,
            group = %settings.group_id,
            "memory consumer connected"
        );
        Ok(Box::new(MemoryConsumer {
            shared: self.shared.clone(),
            settings: settings.clone(),
            subscription: None,
            seen: Vec::new(),
            assigned: Vec::new(),
            positions: HashMap::new(),
            cursor: 0,
            closed: false,
        }))
    }

    fn producer(&self, settings: &ProducerSettings) -> Result<Arc<dyn ProducerTransport>, ClientError> {
        tracing::debug!(bootstrap = %settings.bootstrap_servers, "memory producer connected");
        Ok(Arc::new(MemoryProducer {
            shared: self.shared.clone(),
            round_robin: AtomicUsize::new(0),
        }))
    }

    fn admin(&self) -> Result<Arc<dyn BrokerAdmin>, ClientError> {
        Ok(Arc::new(MemoryAdmin {
            shared: self.shared.clone(),
        }))
    }
}

// ═══════════════════════════════════════════════════════════════
//  Consumer
// ═══════════════════════════════════════════════════════════════

pub struct MemoryConsumer {
    shared: Arc<Shared>,
    settings: ConsumerSettings,
    subscription: Option<(TopicPattern, Arc<dyn RebalanceListener>)>,
    /// Matching partitions at the last rebalance.
    seen: Vec<PartitionKey>,
    assigned: Vec<PartitionKey>,
    positions: HashMap<PartitionKey, i64>,
    cursor: usize,
    closed: bool,
}

impl MemoryConsumer {
    /// Reassign when the set of matching partitions changed. Every change
    /// hands the full assignment to the listener, as an eager rebalance does.
    fn rebalance(&mut self, state: &State) {
        let Some((pattern, listener)) = self.subscription.as_ref() else {
            return;
        };
        let matching: Vec<PartitionKey> = state
            .topics
            .iter()
            .filter(|(name, _)| pattern.matches(name))
            .flat_map(|(name, log)| (0..log.partitions.len() as i32).map(move |p| (name.clone(), p)))
            .collect();
        if matching == self.seen {
            return;
        }

        let proposed = matching
            .iter()
            .map(|(t, p)| PartitionAssignment::new(t.clone(), *p))
            .collect();
        let assignment = listener.on_assign(proposed);
        let committed = state.committed.get(&self.settings.group_id);

        self.assigned.clear();
        self.positions.clear();
        for a in assignment {
            let end = state.topics.get(&a.topic).map_or(0, |log| log.end_offset(a.partition));
            let key = (a.topic, a.partition);
            let start = match a.offset {
                Offset::Beginning => 0,
                Offset::At(n) => n.clamp(0, end),
                Offset::Unspecified => match committed.and_then(|c| c.get(&key)) {
                    Some(&n) => n,
                    None => match self.settings.auto_offset_reset {
                        OffsetReset::Earliest => 0,
                        OffsetReset::Latest => end,
                    },
                },
            };
            self.positions.insert(key.clone(), start);
            self.assigned.push(key);
        }
        self.seen = matching;
        self.cursor = 0;
    }

    fn next_message(&mut self, state: &mut State) -> Option<Message> {
        let n = self.assigned.len();
        for i in 0..n {
            let idx = (self.cursor + i) % n;
            let key = &self.assigned[idx];
            let pos = self.positions.get(key).copied().unwrap_or(0);
            let Some(stored) = state.topics.get(&key.0).and_then(|log| log.get(key.1, pos)) else {
                continue;
            };
            let message = Message {
                topic: key.0.clone(),
                partition: key.1,
                offset: pos,
                ts_ms: stored.ts_ms,
                key: stored.key.clone(),
                payload: stored.payload.clone(),
            };
            self.positions.insert(key.clone(), pos + 1);
            state
                .committed
                .entry(self.settings.group_id.clone())
                .or_default()
                .insert(key.clone(), pos + 1);
            self.cursor = (idx + 1) % n;
            return Some(message);
        }
        None
    }
}

impl ConsumerTransport for MemoryConsumer {
    fn subscribe(
        &mut self,
        pattern: &TopicPattern,
        listener: Arc<dyn RebalanceListener>,
    ) -> Result<(), ClientError> {
        if self.closed {
            return Err(ClientError::logic("subscribe on a closed consumer"));
        }
        self.subscription = Some((pattern.clone(), listener));
        self.seen.clear();
        Ok(())
    }

    fn poll(
        &mut self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Option<Result<Message, ClientError>>> + Send + '_>> {
        Box::pin(async move {
            if self.closed {
                return Some(Err(ClientError::logic("poll on a closed consumer")));
            }
            if self.subscription.is_none() {
                return Some(Err(ClientError::logic("poll before subscribe")));
            }
            // Records already buffered would otherwise never give sibling
            // tasks a turn.
            tokio::task::yield_now().await;

            let deadline = tokio::time::Instant::now() + timeout;
            let shared = self.shared.clone();
            loop {
                let notified = shared.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                {
                    let mut state = shared.lock();
                    self.rebalance(&state);
                    if let Some(message) = self.next_message(&mut state) {
                        return Some(Ok(message));
                    }
                }

                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                    return None;
                }
            }
        })
    }

    fn close(&mut self) -> Result<(), ClientError> {
        if !self.closed {
            self.closed = true;
            self.subscription = None;
            tracing::debug!(group = %self.settings.group_id, "memory consumer left group");
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Producer
// ═══════════════════════════════════════════════════════════════

pub struct MemoryProducer {
    shared: Arc<Shared>,
    round_robin: AtomicUsize,
}

impl ProducerTransport for MemoryProducer {
    fn send(&self, message: OutboundMessage) -> Result<(), ClientError> {
        {
            let mut state = self.shared.lock();
            let log = state
                .topics
                .get_mut(&message.topic)
                .ok_or_else(|| ClientError::logic(format!("unknown topic '{}'", message.topic)))?;
            let n = log.partitions.len();
            let partition = match &message.key {
                Some(key) => {
                    let mut hasher = DefaultHasher::new();
                    key.hash(&mut hasher);
                    (hasher.finish() % n as u64) as usize
                }
                None => self.round_robin.fetch_add(1, Ordering::Relaxed) % n,
            };
            log.partitions[partition].push(Stored {
                ts_ms: message.ts_ms,
                key: message.key,
                payload: message.payload,
            });
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    fn flush(&self, _timeout: Duration) -> Result<(), ClientError> {
        // Sends are applied synchronously.
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Admin
// ═══════════════════════════════════════════════════════════════

pub struct MemoryAdmin {
    shared: Arc<Shared>,
}

impl BrokerAdmin for MemoryAdmin {
    fn list_topics(
        &self,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, ClientError>> + Send + '_>> {
        Box::pin(async move { Ok(self.shared.lock().topics.keys().cloned().collect()) })
    }

    fn create_topics(
        &self,
        topics: Vec<NewTopic>,
    ) -> Pin<Box<dyn Future<Output = Vec<(String, Result<(), ClientError>)>> + Send + '_>> {
        Box::pin(async move {
            let results: Vec<(String, Result<(), ClientError>)> = {
                let mut state = self.shared.lock();
                topics
                    .into_iter()
                    .map(|t| {
                        let result = state.create_topic(&t.name, t.partitions);
                        (t.name, result)
                    })
                    .collect()
            };
            self.shared.notify.notify_waiters();
            results
        })
    }
}
