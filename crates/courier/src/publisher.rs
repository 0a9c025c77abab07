use crate::codec;
use crate::config::ProducerOptions;
use crate::error::{CourierError, CourierErrorExt};
use crate::transport::{Ack, ProducerConnector, ProducerEvent, ProducerRecord, ProducerTransport};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, trace};

/// Sends messages to broker topics.
///
/// Cloning is cheap and every clone shares the same connection.
pub struct Publisher<P> {
    transport: Arc<P>,
    address: Arc<str>,
}

impl<P> Clone for Publisher<P> {
    fn clone(&self) -> Self {
        Self { transport: Arc::clone(&self.transport), address: Arc::clone(&self.address) }
    }
}

impl<P> fmt::Debug for Publisher<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher").field("address", &self.address).finish_non_exhaustive()
    }
}

impl<P: ProducerTransport> Publisher<P> {
    /// Opens a producer connection and returns right away.
    ///
    /// Readiness and connection errors are only logged, from a background task.
    /// Nothing is retried. Must be called from within a Tokio runtime.
    pub fn connect<C>(connector: &C, options: &ProducerOptions) -> Self
    where
        C: ProducerConnector<Transport = P>,
    {
        let address = options.address();
        info!(address = %address, "Connecting producer");

        let (transport, mut events) = connector.connect(&address);

        let watched = address.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ProducerEvent::Ready => info!(address = %watched, "Producer is ready"),
                    ProducerEvent::Error(e) => {
                        error!(address = %watched, error = %e, "Producer connection error");
                    },
                }
            }
        });

        Self { transport: Arc::new(transport), address: Arc::from(address) }
    }

    /// Serializes `message` and sends it to `topic` as a single record.
    ///
    /// A message that can't be serialized is sent as `{}`.
    ///
    /// # Errors
    /// Returns [`CourierError::Broker`] if the broker rejects the record.
    pub async fn send<M>(&self, message: &M, topic: &str) -> Result<Ack, CourierError>
    where
        M: Serialize + ?Sized,
    {
        let record = ProducerRecord { topic: topic.to_owned(), payload: codec::encode(message) };
        let ack = self.transport.send(record).await.context(format!("sending to '{topic}'"))?;

        trace!(topic = %ack.topic, partition = ack.partition, offset = ack.offset, "Message sent");
        Ok(ack)
    }

    /// The `host:port` this publisher connected to.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }
}
