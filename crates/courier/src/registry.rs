use crate::envelope::Envelope;
use fxhash::FxHashMap;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{error, trace};

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type ErasedHandler = dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync;
type ErasedCallback = dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// A registered event handler with its input and output types erased to JSON.
#[derive(Clone)]
pub struct Handler {
    event: Arc<str>,
    call: Arc<ErasedHandler>,
}

impl Handler {
    /// Deserializes `data` into the handler's input type and runs it.
    ///
    /// # Errors
    /// Fails if `data` does not match the handler's input type, if the handler
    /// itself fails, or if its output can't be serialized.
    pub async fn call(&self, data: Value) -> anyhow::Result<Value> {
        (self.call)(data).await
    }

    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").field("event", &self.event).finish_non_exhaustive()
    }
}

/// A group-level hook that receives every handler result.
///
/// The queue slot of a message is released only once this callback finishes.
#[derive(Clone)]
pub struct ProcessCallback {
    call: Arc<ErasedCallback>,
}

impl ProcessCallback {
    /// Wraps an async function taking the handler's result as `M`.
    pub fn new<M, F, Fut>(callback: F) -> Self
    where
        M: DeserializeOwned + Send + 'static,
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let call = move |value: Value| -> BoxFuture<'static, anyhow::Result<()>> {
            let fut = serde_json::from_value::<M>(value).map(&callback);
            Box::pin(async move { fut?.await })
        };
        Self { call: Arc::new(call) }
    }

    /// Runs the callback with a handler result.
    ///
    /// # Errors
    /// Fails if the value does not match the callback's input type or the
    /// callback itself fails.
    pub async fn call(&self, message: Value) -> anyhow::Result<()> {
        (self.call)(message).await
    }
}

impl fmt::Debug for ProcessCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessCallback").finish_non_exhaustive()
    }
}

/// Event-tag to handler table shared by every consumer group.
///
/// Cloning is cheap and every clone sees the same table. Registrations are
/// visible to the very next dispatch; nothing is cached per group.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<FxHashMap<String, Handler>>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `event`, replacing any previous handler.
    ///
    /// The handler declares its input type `T`; envelope data that does not
    /// deserialize into `T` fails the dispatch without reaching the handler.
    /// The returned `R` is what the group's [`ProcessCallback`] receives.
    ///
    /// # Examples
    /// ```rust
    /// use courier::HandlerRegistry;
    ///
    /// #[derive(serde::Deserialize)]
    /// struct Ping { seq: u32 }
    ///
    /// let registry = HandlerRegistry::new();
    /// registry.register("ping", |ping: Ping| async move { Ok(format!("pong {}", ping.seq)) });
    /// assert!(registry.contains("ping"));
    /// ```
    pub fn register<T, R, F, Fut>(&self, event: impl Into<String>, handler: F)
    where
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let event = event.into();
        let call = move |data: Value| -> BoxFuture<'static, anyhow::Result<Value>> {
            let fut = serde_json::from_value::<T>(data).map(&handler);
            Box::pin(async move {
                let output = fut?.await?;
                Ok(serde_json::to_value(output)?)
            })
        };

        let handler = Handler { event: Arc::from(event.as_str()), call: Arc::new(call) };
        if self.handlers.write().insert(event.clone(), handler).is_some() {
            trace!(event = %event, "Replaced event handler");
        } else {
            trace!(event = %event, "Registered event handler");
        }
    }

    /// Removes the handler for `event`, returning whether one existed.
    pub fn unregister(&self, event: &str) -> bool {
        self.handlers.write().remove(event).is_some()
    }

    /// Looks up the handler for `event`.
    #[must_use]
    pub fn lookup(&self, event: &str) -> Option<Handler> {
        self.handlers.read().get(event).cloned()
    }

    #[must_use]
    pub fn contains(&self, event: &str) -> bool {
        self.handlers.read().contains_key(event)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Registered event tags, in no particular order.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }

    /// Routes one envelope and waits until its work is done.
    ///
    /// Runs the handler for `envelope.event`, then feeds its result to
    /// `callback` when one is given. An unknown event is a no-op. Failures are
    /// logged, never returned: the caller only needs to know the work is over.
    pub async fn dispatch(&self, envelope: Envelope, callback: Option<&ProcessCallback>) -> Dispatch {
        let Some(handler) = self.lookup(&envelope.event) else {
            trace!(event = %envelope.event, "No handler registered, skipping message");
            return Dispatch::Unhandled;
        };

        let output = match handler.call(envelope.data).await {
            Ok(output) => output,
            Err(e) => {
                error!(event = %envelope.event, error = %e, "Event handler failed");
                return Dispatch::HandlerFailed;
            },
        };

        let Some(callback) = callback else {
            return Dispatch::Handled;
        };

        match callback.call(output).await {
            Ok(()) => Dispatch::Handled,
            Err(e) => {
                error!(event = %envelope.event, error = %e, "Process callback failed");
                Dispatch::CallbackFailed
            },
        }
    }
}

/// How a dispatch ended. Every variant releases the message's queue slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// No handler is registered for the event.
    Unhandled,
    /// The handler (and the callback, if any) succeeded.
    Handled,
    HandlerFailed,
    CallbackFailed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    #[derive(Debug, Deserialize)]
    struct Greeting {
        name: String,
    }

    #[tokio::test]
    async fn test_lookup_absent_is_none() {
        let registry = HandlerRegistry::new();
        assert!(registry.lookup("missing").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let registry = HandlerRegistry::new();
        registry.register("greet", |g: Greeting| async move { Ok(format!("hello {}", g.name)) });
        registry.register("greet", |g: Greeting| async move { Ok(format!("hi {}", g.name)) });

        assert_eq!(registry.len(), 1);
        let handler = registry.lookup("greet").expect("handler registered");
        let output = handler.call(json!({ "name": "ada" })).await.unwrap();
        assert_eq!(output, json!("hi ada"));
    }

    #[tokio::test]
    async fn test_handler_rejects_mismatched_input() {
        let registry = HandlerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        registry.register("greet", move |_: Greeting| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });

        let outcome = registry.dispatch(Envelope::new("greet", json!(42)), None).await;
        assert_eq!(outcome, Dispatch::HandlerFailed);
        assert_eq!(calls.load(Ordering::SeqCst), 0, "handler must not see invalid input");
    }

    #[tokio::test]
    async fn test_dispatch_unknown_event_is_noop() {
        let registry = HandlerRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
        let callback = ProcessCallback::new(move |v: Value| {
            let _ = tx.send(v);
            async { Ok(()) }
        });

        let outcome = registry.dispatch(Envelope::new("nobody", json!({})), Some(&callback)).await;
        assert_eq!(outcome, Dispatch::Unhandled);
        assert!(rx.try_recv().is_err(), "callback must not run for unhandled events");
    }

    #[tokio::test]
    async fn test_dispatch_feeds_handler_output_to_callback() {
        let registry = HandlerRegistry::new();
        registry.register("ping", |_: Value| async { Ok("pong") });

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let callback = ProcessCallback::new(move |reply: String| {
            let _ = tx.send(reply);
            async { Ok(()) }
        });

        let outcome = registry.dispatch(Envelope::new("ping", json!({})), Some(&callback)).await;
        assert_eq!(outcome, Dispatch::Handled);
        assert_eq!(rx.try_recv().unwrap(), "pong");
    }

    #[tokio::test]
    async fn test_handler_failure_skips_callback() {
        let registry = HandlerRegistry::new();
        registry.register("boom", |_: Value| async { Err::<(), _>(anyhow::anyhow!("exploded")) });

        let ran = Arc::new(AtomicUsize::new(0));
        let seen = ran.clone();
        let callback = ProcessCallback::new(move |_: Value| {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });

        let outcome = registry.dispatch(Envelope::new("boom", Value::Null), Some(&callback)).await;
        assert_eq!(outcome, Dispatch::HandlerFailed);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_callback_failure_is_reported() {
        let registry = HandlerRegistry::new();
        registry.register("ping", |_: Value| async { Ok(1) });
        let callback = ProcessCallback::new(|_: u8| async { anyhow::bail!("downstream unavailable") });

        let outcome = registry.dispatch(Envelope::new("ping", Value::Null), Some(&callback)).await;
        assert_eq!(outcome, Dispatch::CallbackFailed);
    }

    #[tokio::test]
    async fn test_unregister_removes_handler() {
        let registry = HandlerRegistry::new();
        registry.register("ping", |_: Value| async { Ok(()) });
        assert!(registry.unregister("ping"));
        assert!(!registry.unregister("ping"));
        assert_eq!(registry.events(), Vec::<String>::new());
    }
}
