use crate::error::{CourierError, CourierErrorExt};
use crate::registry::ProcessCallback;
use crate::transport::Subscription;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::info;

const DEFAULT_CONCURRENCY: usize = 1;

/// Where the producer connects.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProducerOptions {
    pub host: String,
    pub port: u16,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self { host: "localhost".to_owned(), port: 9092 }
    }
}

impl ProducerOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// `host:port` as handed to the transport.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Describes one consumer group.
///
/// Everything but the process callback can come from configuration; the
/// callback is attached in code with [`ConsumerGroupOptions::process_callback`].
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerGroupOptions {
    /// Unique key of the group inside a supervisor.
    pub name: String,
    #[serde(alias = "kafka_host")]
    pub broker_address: String,
    pub group_id: String,
    pub topics: Vec<String>,
    /// Messages handled at the same time. Defaults to one (strictly sequential).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(skip)]
    pub process_callback: Option<ProcessCallback>,
}

const fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl ConsumerGroupOptions {
    pub fn new<I, S>(
        name: impl Into<String>,
        broker_address: impl Into<String>,
        group_id: impl Into<String>,
        topics: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            broker_address: broker_address.into(),
            group_id: group_id.into(),
            topics: topics.into_iter().map(Into::into).collect(),
            concurrency: DEFAULT_CONCURRENCY,
            process_callback: None,
        }
    }

    #[must_use = "Sets the number of messages handled at the same time"]
    pub const fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use = "Attaches a callback receiving every handler result"]
    pub fn process_callback(mut self, callback: ProcessCallback) -> Self {
        self.process_callback = Some(callback);
        self
    }

    /// Checks the options before a group is started.
    ///
    /// # Errors
    /// Returns [`CourierError::InvalidConfiguration`] for an empty name, group
    /// id, broker address or topic list, or a zero concurrency.
    pub fn validate(&self) -> Result<(), CourierError> {
        let problem = if self.name.trim().is_empty() {
            "name cannot be empty"
        } else if self.broker_address.trim().is_empty() {
            "broker_address cannot be empty"
        } else if self.group_id.trim().is_empty() {
            "group_id cannot be empty"
        } else if self.topics.is_empty() || self.topics.iter().any(|t| t.trim().is_empty()) {
            "topics must list at least one non-empty topic"
        } else if self.concurrency == 0 {
            "concurrency must be at least 1"
        } else {
            return Ok(());
        };

        Err(CourierError::InvalidConfiguration {
            message: problem.into(),
            context: Some(format!("consumer group '{}'", self.name).into()),
        })
    }

    pub(crate) fn concurrency_limit(&self) -> Result<NonZeroUsize, CourierError> {
        NonZeroUsize::new(self.concurrency).ok_or_else(|| CourierError::InvalidConfiguration {
            message: "concurrency must be at least 1".into(),
            context: Some(format!("consumer group '{}'", self.name).into()),
        })
    }

    #[must_use]
    pub fn subscription(&self) -> Subscription {
        Subscription {
            broker_address: self.broker_address.clone(),
            group_id: self.group_id.clone(),
            topics: self.topics.clone(),
        }
    }
}

/// Everything a courier process needs to start.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub producer: ProducerOptions,
    pub consumer_groups: Vec<ConsumerGroupOptions>,
}

impl CourierConfig {
    /// Loads configuration from a file, overlaid with `COURIER__*` variables.
    ///
    /// The file format follows the extension (`courier.toml`, `courier.json`,
    /// ...); without a path, `courier` in the working directory is used.
    /// Nested keys use a double underscore, e.g. `COURIER__PRODUCER__PORT`.
    ///
    /// # Errors
    /// Returns [`CourierError::Config`] if the file is missing or does not
    /// match the expected shape, and [`CourierError::InvalidConfiguration`] if a
    /// consumer group fails validation.
    pub fn load(path: Option<impl AsRef<Path>>) -> Result<Self, CourierError> {
        let effective_path =
            path.map_or_else(|| PathBuf::from("courier"), |p| p.as_ref().to_path_buf());

        info!("Loading config from {}", effective_path.display());

        let config: Self = Config::builder()
            .add_source(File::from(effective_path.as_path()).required(true))
            .add_source(
                Environment::with_prefix("COURIER")
                    .separator("__")
                    .convert_case(config::Case::Snake),
            )
            .build()
            .context("Failed to build config")?
            .try_deserialize()
            .context("Failed to deserialize config")?;

        config.validate()?;
        Ok(config)
    }

    /// Validates every consumer group and checks names are unique.
    ///
    /// # Errors
    /// Returns [`CourierError::InvalidConfiguration`] on the first problem found.
    pub fn validate(&self) -> Result<(), CourierError> {
        let mut seen = fxhash::FxHashSet::default();
        for group in &self.consumer_groups {
            group.validate()?;
            if !seen.insert(group.name.as_str()) {
                return Err(CourierError::InvalidConfiguration {
                    message: format!("consumer group '{}' is declared twice", group.name).into(),
                    context: None,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_producer_defaults() {
        let options = ProducerOptions::default();
        assert_eq!(options.address(), "localhost:9092");
    }

    #[test]
    fn test_group_options_defaults_to_sequential() {
        let options = ConsumerGroupOptions::new("orders", "localhost:9092", "svc", ["orders"]);
        assert_eq!(options.concurrency, 1);
        assert!(options.process_callback.is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_group_options_deserialize_with_legacy_host_key() {
        let raw = json!({
            "name": "billing",
            "kafka_host": "kafka:9092",
            "group_id": "billing-svc",
            "topics": ["invoices", "refunds"]
        });

        let options: ConsumerGroupOptions = serde_json::from_value(raw).expect("options");
        assert_eq!(options.broker_address, "kafka:9092");
        assert_eq!(options.concurrency, 1);
        assert_eq!(options.subscription().topics, vec!["invoices", "refunds"]);
    }

    #[test]
    fn test_validation_rejects_bad_groups() {
        let base = ConsumerGroupOptions::new("g", "localhost:9092", "svc", ["t"]);

        let zero = base.clone().concurrency(0);
        assert!(matches!(zero.validate(), Err(CourierError::InvalidConfiguration { .. })));
        assert!(zero.concurrency_limit().is_err());

        let no_topics = ConsumerGroupOptions::new("g", "localhost:9092", "svc", Vec::<String>::new());
        assert!(no_topics.validate().is_err());

        let mut blank_name = base;
        blank_name.name = " ".to_owned();
        assert!(blank_name.validate().is_err());
    }

    #[test]
    fn test_duplicate_group_names_are_rejected() {
        let group = ConsumerGroupOptions::new("g", "localhost:9092", "svc", ["t"]);
        let config = CourierConfig {
            producer: ProducerOptions::default(),
            consumer_groups: vec![group.clone(), group],
        };
        assert!(config.validate().is_err());
    }
}
