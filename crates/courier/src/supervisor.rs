use crate::config::ConsumerGroupOptions;
use crate::error::{CourierError, CourierErrorExt};
use crate::group::ConsumerGroup;
use crate::registry::HandlerRegistry;
use crate::transport::ConsumerConnector;
use fxhash::FxHashMap;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

type Groups<H> = FxHashMap<String, ConsumerGroup<H>>;

/// Owns every consumer group of a process, keyed by group name.
///
/// All groups share one [`HandlerRegistry`]. Cloning is cheap and every clone
/// manages the same set of groups.
pub struct ConsumerSupervisor<C: ConsumerConnector> {
    inner: Arc<SupervisorInner<C>>,
}

struct SupervisorInner<C: ConsumerConnector> {
    connector: C,
    registry: HandlerRegistry,
    groups: RwLock<Groups<C::Handle>>,
}

impl<C: ConsumerConnector> Clone for ConsumerSupervisor<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<C: ConsumerConnector> fmt::Debug for ConsumerSupervisor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerSupervisor")
            .field("groups", &self.group_names())
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

impl<C: ConsumerConnector> ConsumerSupervisor<C> {
    pub fn new(connector: C, registry: HandlerRegistry) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                connector,
                registry,
                groups: RwLock::new(FxHashMap::default()),
            }),
        }
    }

    /// The registry every group dispatches through.
    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    /// Subscribes a new consumer group and starts its runtime.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// - [`CourierError::InvalidConfiguration`] if `options` do not validate.
    /// - [`CourierError::DuplicateGroup`] if a group with the same name exists;
    ///   the existing group is left untouched and nothing is subscribed.
    /// - [`CourierError::Broker`] if the connector refuses the subscription.
    pub fn add_consumer_group(&self, options: ConsumerGroupOptions) -> Result<(), CourierError> {
        options.validate()?;

        // Held across subscribe so two racing adds of one name can't both subscribe.
        let mut groups = self.inner.groups.write();
        if groups.contains_key(&options.name) {
            return Err(CourierError::DuplicateGroup {
                message: format!("consumer group '{}' already exists", options.name).into(),
                context: None,
            });
        }

        let (handle, events) = self
            .inner
            .connector
            .subscribe(&options.subscription())
            .context(format!("subscribing consumer group '{}'", options.name))?;

        let group = ConsumerGroup::start(&options, handle, events, self.inner.registry.clone())?;
        info!(
            group = %options.name,
            group_id = %options.group_id,
            topics = ?options.topics,
            concurrency = options.concurrency,
            "Consumer group added"
        );
        groups.insert(options.name, group);

        Ok(())
    }

    /// Registers `handler` for `event` in the shared registry.
    ///
    /// Same as [`HandlerRegistry::register`]; every group sees it on its next
    /// dispatch.
    pub fn add_process_callback<T, R, F, Fut>(&self, event: impl Into<String>, handler: F)
    where
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        self.inner.registry.register(event, handler);
    }

    /// Closes and forgets the group called `name`.
    ///
    /// An unknown name is not an error. The group is removed even when its
    /// broker handle fails to close; that failure is still returned. Work the
    /// group already admitted keeps running in the background.
    ///
    /// # Errors
    /// Returns [`CourierError::Broker`] if closing the broker handle fails.
    pub async fn remove_consumer_group(&self, name: &str) -> Result<(), CourierError> {
        let Some(group) = self.group(name) else {
            debug!(group = %name, "No consumer group to remove");
            return Ok(());
        };

        let closed = group.close().await;

        {
            let mut groups = self.inner.groups.write();
            // A group added under the same name while closing must survive.
            if groups.get(name).is_some_and(|current| current.same_as(&group)) {
                groups.remove(name);
            }
        }

        match closed {
            Ok(()) => {
                info!(group = %name, "Consumer group removed");
                Ok(())
            },
            Err(e) => {
                warn!(group = %name, error = %e, "Consumer group removed, but closing it failed");
                Err::<(), _>(e).context(format!("closing consumer group '{name}'"))
            },
        }
    }

    /// Removes every group.
    ///
    /// All groups are closed even if some fail.
    ///
    /// # Errors
    /// Returns the first close failure encountered.
    pub async fn shutdown(&self) -> Result<(), CourierError> {
        let mut first_error = None;
        for name in self.group_names() {
            if let Err(e) = self.remove_consumer_group(&name).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    #[must_use]
    pub fn group(&self, name: &str) -> Option<ConsumerGroup<C::Handle>> {
        self.inner.groups.read().get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.groups.read().contains_key(name)
    }

    /// Names of the live groups, sorted.
    #[must_use]
    pub fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.groups.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.groups.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.groups.read().is_empty()
    }
}
