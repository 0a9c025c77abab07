use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The routing unit carried in every message.
///
/// `event` selects a handler in the [`HandlerRegistry`](crate::HandlerRegistry);
/// `data` is handed to that handler untouched. Decoded envelopes carry a
/// [`Value`] payload which the registry deserializes into the handler's own type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T = Value> {
    pub event: String,
    #[serde(default)]
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn new(event: impl Into<String>, data: T) -> Self {
        Self { event: event.into(), data }
    }
}
