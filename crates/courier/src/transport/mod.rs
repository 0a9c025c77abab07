//! The seam between courier and a concrete broker client.
//!
//! Courier never speaks a wire protocol itself. A transport adapts some client
//! library to these traits: consumers get a pausable subscription plus a stream
//! of [`BrokerEvent`]s, producers get a fire-one-record `send`.

mod error;

pub use error::{BrokerError, BrokerErrorExt};

use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::sync::mpsc;

/// Stream of consumer-side events emitted by a subscription.
pub type BrokerEvents = mpsc::UnboundedReceiver<BrokerEvent>;

/// Stream of producer-side connection events.
pub type ProducerEvents = mpsc::UnboundedReceiver<ProducerEvent>;

/// A record as delivered by the broker, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub value: Vec<u8>,
}

/// Events a consumer subscription emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// The subscription joined its group and is ready to deliver.
    Connect,
    /// A record was delivered.
    Message(RawMessage),
    /// The client reported a failure. Recovery is the client's business.
    Error(BrokerError),
    /// The committed offset is no longer available on the broker.
    OffsetOutOfRange(BrokerError),
}

/// Events a producer connection emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProducerEvent {
    Ready,
    Error(BrokerError),
}

/// What a consumer subscribes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub broker_address: String,
    pub group_id: String,
    pub topics: Vec<String>,
}

/// A single outbound record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRecord {
    pub topic: String,
    pub payload: String,
}

/// Broker acknowledgment for a produced record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// A live consumer-group membership.
///
/// `pause` and `resume` only gate delivery; they must be cheap and idempotent
/// because the runtime calls `pause` on every admitted message.
pub trait ConsumerHandle: Send + Sync + 'static {
    /// Stops delivering new records until [`ConsumerHandle::resume`].
    fn pause(&self);

    /// Restarts delivery after a [`ConsumerHandle::pause`].
    fn resume(&self);

    /// Leaves the group and releases the connection.
    fn close(&self) -> impl Future<Output = Result<(), BrokerError>> + Send;
}

/// Creates consumer subscriptions.
pub trait ConsumerConnector: Send + Sync + 'static {
    type Handle: ConsumerHandle;

    /// Joins `subscription.group_id` on the given topics.
    ///
    /// # Errors
    /// Returns a [`BrokerError`] if the client refuses the subscription up front.
    /// Connection problems after this point arrive as [`BrokerEvent::Error`].
    fn subscribe(
        &self,
        subscription: &Subscription,
    ) -> Result<(Self::Handle, BrokerEvents), BrokerError>;
}

/// Sends records to the broker.
pub trait ProducerTransport: Send + Sync + 'static {
    /// Submits exactly one record and waits for the broker's answer.
    fn send(&self, record: ProducerRecord) -> impl Future<Output = Result<Ack, BrokerError>> + Send;
}

/// Opens producer connections.
pub trait ProducerConnector: Send + Sync + 'static {
    type Transport: ProducerTransport;

    /// Starts connecting to `address` without waiting for the outcome.
    fn connect(&self, address: &str) -> (Self::Transport, ProducerEvents);
}
