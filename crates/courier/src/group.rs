//! Consumer group runtime.
//!
//! Each group owns one broker subscription and one [`WorkQueue`]. A single
//! task drives both: it decodes deliveries, admits them to the queue, pauses
//! the broker on every admission and resumes it when the queue drains.

use crate::codec;
use crate::config::ConsumerGroupOptions;
use crate::envelope::Envelope;
use crate::error::CourierError;
use crate::flow::{FlowAction, FlowControl, FlowState};
use crate::queue::WorkQueue;
use crate::registry::{BoxFuture, HandlerRegistry, ProcessCallback};
use crate::transport::{BrokerError, BrokerEvent, BrokerEvents, ConsumerHandle, RawMessage};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, trace};

type Worker = Box<dyn Fn(Envelope) -> BoxFuture<'static, ()> + Send + Sync>;

/// Handle to a running consumer group.
///
/// Cloning is cheap; all clones refer to the same runtime.
pub struct ConsumerGroup<H> {
    inner: Arc<GroupInner<H>>,
}

struct GroupInner<H> {
    name: String,
    group_id: String,
    topics: Vec<String>,
    concurrency: usize,
    handle: Arc<H>,
    flow: watch::Receiver<FlowState>,
    stop: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<H> Clone for ConsumerGroup<H> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<H> fmt::Debug for ConsumerGroup<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerGroup")
            .field("name", &self.inner.name)
            .field("group_id", &self.inner.group_id)
            .field("topics", &self.inner.topics)
            .field("concurrency", &self.inner.concurrency)
            .field("flow", &*self.inner.flow.borrow())
            .finish_non_exhaustive()
    }
}

impl<H: ConsumerHandle> ConsumerGroup<H> {
    /// Starts the runtime task for an already subscribed handle.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns [`CourierError::InvalidConfiguration`] if `options` do not validate.
    pub fn start(
        options: &ConsumerGroupOptions,
        handle: H,
        events: BrokerEvents,
        registry: HandlerRegistry,
    ) -> Result<Self, CourierError> {
        options.validate()?;
        let limit = options.concurrency_limit()?;

        let handle = Arc::new(handle);
        let (flow_tx, flow_rx) = watch::channel(FlowState::Receiving);
        let (stop_tx, stop_rx) = oneshot::channel();

        let worker = dispatcher(
            Arc::from(options.name.as_str()),
            registry,
            options.process_callback.clone(),
        );
        let runtime = GroupRuntime {
            name: options.name.clone(),
            handle: Arc::clone(&handle),
            events,
            stop: stop_rx,
            queue: WorkQueue::new(limit, worker),
            flow: FlowControl::new(),
            flow_tx,
        };
        let task = tokio::spawn(runtime.run());

        Ok(Self {
            inner: Arc::new(GroupInner {
                name: options.name.clone(),
                group_id: options.group_id.clone(),
                topics: options.topics.clone(),
                concurrency: limit.get(),
                handle,
                flow: flow_rx,
                stop: Mutex::new(Some(stop_tx)),
                task: Mutex::new(Some(task)),
            }),
        })
    }

    /// Stops accepting deliveries and closes the broker handle.
    ///
    /// Work already admitted keeps running to completion; use
    /// [`ConsumerGroup::join`] to wait for it.
    ///
    /// # Errors
    /// Returns the broker's error if the handle fails to close.
    pub async fn close(&self) -> Result<(), BrokerError> {
        if let Some(stop) = self.inner.stop.lock().take() {
            let _ = stop.send(());
        }
        self.inner.handle.close().await
    }
}

impl<H> ConsumerGroup<H> {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn group_id(&self) -> &str {
        &self.inner.group_id
    }

    #[must_use]
    pub fn topics(&self) -> &[String] {
        &self.inner.topics
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    /// Current delivery state.
    #[must_use]
    pub fn flow_state(&self) -> FlowState {
        *self.inner.flow.borrow()
    }

    /// A receiver notified on every pause, resume and close.
    #[must_use]
    pub fn watch_flow(&self) -> watch::Receiver<FlowState> {
        self.inner.flow.clone()
    }

    /// Waits until the runtime task has stopped and its admitted work is done.
    ///
    /// Only the first caller waits; later calls return immediately.
    pub async fn join(&self) {
        let task = self.inner.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            error!(group = %self.inner.name, error = %e, "Consumer group runtime failed");
        }
    }

    pub(crate) fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

fn dispatcher(
    group: Arc<str>,
    registry: HandlerRegistry,
    callback: Option<ProcessCallback>,
) -> Worker {
    Box::new(move |envelope: Envelope| {
        let group = Arc::clone(&group);
        let registry = registry.clone();
        let callback = callback.clone();
        Box::pin(async move {
            let event = envelope.event.clone();
            let outcome = registry.dispatch(envelope, callback.as_ref()).await;
            trace!(group = %group, event = %event, ?outcome, "Message processed");
        })
    })
}

struct GroupRuntime<H> {
    name: String,
    handle: Arc<H>,
    events: BrokerEvents,
    stop: oneshot::Receiver<()>,
    queue: WorkQueue<Envelope, Worker>,
    flow: FlowControl,
    flow_tx: watch::Sender<FlowState>,
}

impl<H: ConsumerHandle> GroupRuntime<H> {
    async fn run(mut self) {
        debug!(group = %self.name, "Consumer group runtime started");

        loop {
            tokio::select! {
                biased;
                _ = &mut self.stop => break,
                Some(done) = self.queue.next_completion(), if !self.queue.is_drained() => {
                    self.on_task_done(done);
                },
                event = self.events.recv() => match event {
                    Some(event) => self.on_event(event),
                    None => {
                        debug!(group = %self.name, "Broker event stream ended");
                        break;
                    },
                },
            }
        }

        self.flow.on_close();
        self.flow_tx.send_replace(FlowState::Closed);

        let remaining = self.queue.running() + self.queue.pending();
        if remaining > 0 {
            debug!(group = %self.name, remaining, "Finishing admitted messages before stopping");
        }
        while let Some(done) = self.queue.next_completion().await {
            self.on_task_done(done);
        }

        debug!(
            group = %self.name,
            pauses = self.flow.pauses(),
            resumes = self.flow.resumes(),
            "Consumer group runtime stopped"
        );
    }

    fn on_event(&mut self, event: BrokerEvent) {
        match event {
            BrokerEvent::Connect => info!(group = %self.name, "Consumer group connected"),
            BrokerEvent::Message(message) => self.on_message(message),
            BrokerEvent::Error(e) => error!(group = %self.name, error = %e, "Broker error"),
            BrokerEvent::OffsetOutOfRange(e) => {
                error!(group = %self.name, error = %e, "Broker offset out of range");
            },
        }
    }

    fn on_message(&mut self, message: RawMessage) {
        let Some(envelope) = codec::decode(&message.value) else {
            debug!(
                group = %self.name,
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                "Dropped undecodable message"
            );
            return;
        };

        trace!(
            group = %self.name,
            topic = %message.topic,
            offset = message.offset,
            event = %envelope.event,
            "Message admitted"
        );
        self.queue.push(envelope);

        if let Some(FlowAction::Pause) = self.flow.on_enqueue() {
            self.handle.pause();
            self.flow_tx.send_replace(FlowState::Paused);
        }
    }

    fn on_task_done(&mut self, done: Result<(), JoinError>) {
        if let Err(e) = done {
            error!(group = %self.name, error = %e, "Message task aborted");
        }

        if self.queue.is_drained()
            && let Some(FlowAction::Resume) = self.flow.on_drain()
        {
            trace!(group = %self.name, "Queue drained, resuming delivery");
            self.handle.resume();
            self.flow_tx.send_replace(FlowState::Receiving);
        }
    }
}
