//! Event-driven messaging over a partitioned log broker.
//!
//! Producers publish JSON envelopes (`{"event": ..., "data": ...}`) to topics
//! with a [`Publisher`]. Consumer groups, owned by a [`ConsumerSupervisor`],
//! decode incoming records and route them by event tag through a shared
//! [`HandlerRegistry`]. Each group bounds its in-flight work and pauses the
//! broker while anything is outstanding, resuming once its queue drains.
//!
//! The broker client itself sits behind the [`transport`] traits; [`memory`]
//! provides an in-process implementation.
//!
//! ## Usage
//! ```rust,no_run
//! use courier::memory::MemoryBroker;
//! use courier::{ConsumerGroupOptions, ConsumerSupervisor, HandlerRegistry, ProducerOptions, Publisher};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct OrderPlaced { id: u64 }
//!
//! # async fn run() -> Result<(), courier::CourierError> {
//! let broker = MemoryBroker::new();
//!
//! let supervisor = ConsumerSupervisor::new(broker.clone(), HandlerRegistry::new());
//! supervisor.add_process_callback("order.placed", |order: OrderPlaced| async move {
//!     Ok(format!("shipping {}", order.id))
//! });
//! supervisor.add_consumer_group(ConsumerGroupOptions::new(
//!     "shipping",
//!     "localhost:9092",
//!     "shipping-svc",
//!     ["orders"],
//! ))?;
//!
//! let publisher = Publisher::connect(&broker, &ProducerOptions::default());
//! let message = courier::Envelope::new("order.placed", OrderPlaced { id: 7 });
//! publisher.send(&message, "orders").await?;
//!
//! supervisor.shutdown().await
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod flow;
pub mod group;
pub mod memory;
pub mod publisher;
pub mod registry;
pub mod supervisor;
pub mod transport;

mod queue;

pub use config::{ConsumerGroupOptions, CourierConfig, ProducerOptions};
pub use envelope::Envelope;
pub use error::{CourierError, CourierErrorExt};
pub use flow::{FlowAction, FlowControl, FlowState};
pub use group::ConsumerGroup;
pub use publisher::Publisher;
pub use registry::{BoxFuture, Dispatch, Handler, HandlerRegistry, ProcessCallback};
pub use supervisor::ConsumerSupervisor;
pub use transport::{Ack, BrokerError};
