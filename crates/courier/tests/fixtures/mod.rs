#![allow(dead_code, unreachable_pub)]

use courier::transport::{
    BrokerError, BrokerEvent, BrokerEvents, ConsumerConnector, ConsumerHandle, RawMessage,
    Subscription,
};
use courier_logger::{LevelFilter, Logger};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::future::Future;
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::mpsc;

/// Installs a console logger once per test binary. `COURIER_LOG_LEVEL` overrides the level.
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = Logger::builder().name("courier-tests").level(LevelFilter::WARN).init();
    });
}

/// What the runtime asked a scripted handle to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Pause,
    Resume,
    Close,
}

/// One subscription made through a [`ScriptedConnector`].
///
/// The test plays the broker: it pushes events and inspects the actions the
/// runtime took on the handle.
#[derive(Debug, Clone)]
pub struct ScriptedLink {
    pub subscription: Subscription,
    events: mpsc::UnboundedSender<BrokerEvent>,
    actions: Arc<Mutex<Vec<Action>>>,
    next_offset: Arc<Mutex<i64>>,
}

impl ScriptedLink {
    pub fn send(&self, event: BrokerEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Delivers raw bytes on the first subscribed topic.
    pub fn deliver_raw(&self, value: impl Into<Vec<u8>>) -> bool {
        let offset = {
            let mut next = self.next_offset.lock();
            *next += 1;
            *next - 1
        };
        self.send(BrokerEvent::Message(RawMessage {
            topic: self.subscription.topics[0].clone(),
            partition: 0,
            offset,
            value: value.into(),
        }))
    }

    pub fn deliver(&self, event: &str, data: Value) -> bool {
        self.deliver_raw(json!({ "event": event, "data": data }).to_string())
    }

    pub fn actions(&self) -> Vec<Action> {
        self.actions.lock().clone()
    }

    pub fn count(&self, action: Action) -> usize {
        self.actions.lock().iter().filter(|a| **a == action).count()
    }
}

#[derive(Debug)]
pub struct ScriptedHandle {
    actions: Arc<Mutex<Vec<Action>>>,
    close_failure: Arc<Mutex<Option<BrokerError>>>,
}

impl ConsumerHandle for ScriptedHandle {
    fn pause(&self) {
        self.actions.lock().push(Action::Pause);
    }

    fn resume(&self) {
        self.actions.lock().push(Action::Resume);
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.actions.lock().push(Action::Close);
        self.close_failure.lock().take().map_or(Ok(()), Err)
    }
}

/// A connector whose subscriptions are driven by the test.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    links: Arc<Mutex<Vec<ScriptedLink>>>,
    subscribe_failure: Arc<Mutex<Option<BrokerError>>>,
    close_failure: Arc<Mutex<Option<BrokerError>>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `subscribe` calls so far.
    pub fn subscriptions(&self) -> usize {
        self.links.lock().len()
    }

    /// The link created by the `index`-th successful subscription.
    ///
    /// # Panics
    /// If fewer subscriptions were made.
    pub fn link(&self, index: usize) -> ScriptedLink {
        self.links.lock()[index].clone()
    }

    pub fn fail_next_subscribe(&self, error: BrokerError) {
        *self.subscribe_failure.lock() = Some(error);
    }

    pub fn fail_next_close(&self, error: BrokerError) {
        *self.close_failure.lock() = Some(error);
    }
}

impl ConsumerConnector for ScriptedConnector {
    type Handle = ScriptedHandle;

    fn subscribe(
        &self,
        subscription: &Subscription,
    ) -> Result<(Self::Handle, BrokerEvents), BrokerError> {
        if let Some(error) = self.subscribe_failure.lock().take() {
            return Err(error);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let actions = Arc::new(Mutex::new(Vec::new()));
        self.links.lock().push(ScriptedLink {
            subscription: subscription.clone(),
            events: tx,
            actions: Arc::clone(&actions),
            next_offset: Arc::new(Mutex::new(0)),
        });

        let handle = ScriptedHandle { actions, close_failure: Arc::clone(&self.close_failure) };
        Ok((handle, rx))
    }
}

/// Polls `condition` until it holds.
///
/// # Panics
/// If it does not hold within two seconds.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for: {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Awaits `future`, failing the test after two seconds.
///
/// # Panics
/// On timeout.
pub async fn within<F: Future>(what: &str, future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for: {what}"))
}
