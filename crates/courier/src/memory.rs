//! In-process broker.
//!
//! [`MemoryBroker`] implements both connector traits against append-only topic
//! logs held in memory. Consumer groups sharing a `group_id` share committed
//! offsets, so each record reaches a group once. New groups read every topic
//! from the beginning. Failures can be injected to exercise error paths.

use crate::transport::{
    Ack, BrokerError, BrokerEvent, BrokerEvents, ConsumerConnector, ConsumerHandle,
    ProducerConnector, ProducerEvent, ProducerEvents, ProducerRecord, ProducerTransport,
    RawMessage, Subscription,
};
use fxhash::FxHashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, mpsc, watch};
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct BrokerState {
    topics: RwLock<FxHashMap<String, Vec<Vec<u8>>>>,
    /// Next offset to deliver, per `(group_id, topic)`.
    offsets: Mutex<FxHashMap<(String, String), usize>>,
    published: Notify,
    unreachable: AtomicBool,
    send_failure: Mutex<Option<BrokerError>>,
    subscribe_failure: Mutex<Option<BrokerError>>,
    close_failure: Mutex<Option<BrokerError>>,
}

impl BrokerState {
    fn append(&self, topic: &str, value: Vec<u8>) -> usize {
        let offset = {
            let mut topics = self.topics.write();
            let log = topics.entry(topic.to_owned()).or_default();
            log.push(value);
            log.len() - 1
        };
        self.published.notify_waiters();
        offset
    }

    /// Takes the next undelivered record for `group_id`, committing it.
    fn next_for(&self, group_id: &str, topics: &[String]) -> Option<RawMessage> {
        let logs = self.topics.read();
        let mut offsets = self.offsets.lock();

        for topic in topics {
            let Some(log) = logs.get(topic) else { continue };
            let next = offsets.entry((group_id.to_owned(), topic.clone())).or_default();
            if let Some(value) = log.get(*next) {
                let offset = *next;
                *next += 1;
                return Some(RawMessage {
                    topic: topic.clone(),
                    partition: 0,
                    offset: i64::try_from(offset).unwrap_or(i64::MAX),
                    value: value.clone(),
                });
            }
        }
        None
    }
}

/// A broker living in process memory.
///
/// Cloning is cheap; clones share all topics and offsets.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes to `topic`, bypassing the codec.
    ///
    /// Returns the record's offset.
    pub fn publish_raw(&self, topic: &str, value: impl Into<Vec<u8>>) -> i64 {
        let offset = self.state.append(topic, value.into());
        i64::try_from(offset).unwrap_or(i64::MAX)
    }

    /// Every record stored in `topic`, oldest first.
    #[must_use]
    pub fn messages(&self, topic: &str) -> Vec<Vec<u8>> {
        self.state.topics.read().get(topic).cloned().unwrap_or_default()
    }

    /// Records of `topic` already delivered to `group_id`.
    #[must_use]
    pub fn committed_offset(&self, group_id: &str, topic: &str) -> usize {
        self.state
            .offsets
            .lock()
            .get(&(group_id.to_owned(), topic.to_owned()))
            .copied()
            .unwrap_or_default()
    }

    /// Makes the next `send` fail with `error`.
    pub fn fail_next_send(&self, error: BrokerError) {
        *self.state.send_failure.lock() = Some(error);
    }

    /// Makes the next `subscribe` fail with `error`.
    pub fn fail_next_subscribe(&self, error: BrokerError) {
        *self.state.subscribe_failure.lock() = Some(error);
    }

    /// Makes the next consumer `close` fail with `error`.
    ///
    /// The consumer still stops delivering.
    pub fn fail_next_close(&self, error: BrokerError) {
        *self.state.close_failure.lock() = Some(error);
    }

    /// While unreachable, producer connections report an error instead of ready.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.unreachable.store(unreachable, Ordering::SeqCst);
    }
}

/// Producer side of a [`MemoryBroker`].
#[derive(Debug, Clone)]
pub struct MemoryProducer {
    state: Arc<BrokerState>,
}

impl ProducerTransport for MemoryProducer {
    async fn send(&self, record: ProducerRecord) -> Result<Ack, BrokerError> {
        if let Some(error) = self.state.send_failure.lock().take() {
            return Err(error);
        }
        let offset = self.state.append(&record.topic, record.payload.into_bytes());
        Ok(Ack {
            topic: record.topic,
            partition: 0,
            offset: i64::try_from(offset).unwrap_or(i64::MAX),
        })
    }
}

impl ProducerConnector for MemoryBroker {
    type Transport = MemoryProducer;

    fn connect(&self, address: &str) -> (Self::Transport, ProducerEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let event = if self.state.unreachable.load(Ordering::SeqCst) {
            ProducerEvent::Error(BrokerError::Unavailable {
                message: format!("broker at {address} is unreachable").into(),
                context: None,
            })
        } else {
            ProducerEvent::Ready
        };
        let _ = tx.send(event);

        (MemoryProducer { state: Arc::clone(&self.state) }, rx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Open,
    Paused,
    Closed,
}

/// Consumer handle returned by [`MemoryBroker`]'s `subscribe`.
///
/// Pausing stops further deliveries; records already handed to the event
/// stream are not recalled.
#[derive(Debug)]
pub struct MemoryConsumer {
    group_id: String,
    gate: watch::Sender<Gate>,
    state: Arc<BrokerState>,
}

impl MemoryConsumer {
    #[must_use]
    pub fn is_paused(&self) -> bool {
        *self.gate.borrow() == Gate::Paused
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.gate.borrow() == Gate::Closed
    }

    fn transition(&self, from: Gate, to: Gate) {
        self.gate.send_if_modified(|gate| {
            if *gate == from {
                *gate = to;
                true
            } else {
                false
            }
        });
    }
}

impl ConsumerHandle for MemoryConsumer {
    fn pause(&self) {
        self.transition(Gate::Open, Gate::Paused);
    }

    fn resume(&self) {
        self.transition(Gate::Paused, Gate::Open);
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.gate.send_replace(Gate::Closed);
        debug!(group_id = %self.group_id, "Memory consumer closed");
        self.state.close_failure.lock().take().map_or(Ok(()), Err)
    }
}

impl ConsumerConnector for MemoryBroker {
    type Handle = MemoryConsumer;

    fn subscribe(
        &self,
        subscription: &Subscription,
    ) -> Result<(Self::Handle, BrokerEvents), BrokerError> {
        if let Some(error) = self.state.subscribe_failure.lock().take() {
            return Err(error);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (gate, gate_rx) = watch::channel(Gate::Open);

        tokio::spawn(deliver(
            Arc::clone(&self.state),
            subscription.group_id.clone(),
            subscription.topics.clone(),
            tx,
            gate_rx,
        ));

        let handle = MemoryConsumer {
            group_id: subscription.group_id.clone(),
            gate,
            state: Arc::clone(&self.state),
        };
        Ok((handle, rx))
    }
}

async fn deliver(
    state: Arc<BrokerState>,
    group_id: String,
    topics: Vec<String>,
    tx: mpsc::UnboundedSender<BrokerEvent>,
    mut gate: watch::Receiver<Gate>,
) {
    if tx.send(BrokerEvent::Connect).is_err() {
        return;
    }

    loop {
        let current = *gate.borrow_and_update();
        match current {
            Gate::Closed => break,
            Gate::Paused => {
                if gate.changed().await.is_err() {
                    break;
                }
                continue;
            },
            Gate::Open => {},
        }

        // Register interest before looking, so a record appended in between still wakes us.
        let published = state.published.notified();
        tokio::pin!(published);
        published.as_mut().enable();

        if let Some(message) = state.next_for(&group_id, &topics) {
            trace!(
                group_id = %group_id,
                topic = %message.topic,
                offset = message.offset,
                "Delivering record"
            );
            if tx.send(BrokerEvent::Message(message)).is_err() {
                break;
            }
            // Give the consumer a chance to pause before the next record.
            tokio::task::yield_now().await;
            continue;
        }

        tokio::select! {
            () = &mut published => {},
            changed = gate.changed() => {
                if changed.is_err() {
                    break;
                }
            },
            () = tx.closed() => break,
        }
    }

    debug!(group_id = %group_id, "Memory delivery stopped");
}
