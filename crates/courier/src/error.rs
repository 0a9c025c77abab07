use crate::transport::BrokerError;
use std::borrow::Cow;

/// Errors returned by the courier facade.
#[courier_derive::courier_error]
pub enum CourierError {
    /// A broker operation failed (send, subscribe or close).
    #[error("Broker error{}: {source}", format_context(.context))]
    Broker { source: BrokerError, context: Option<Cow<'static, str>> },

    /// A consumer group with the same name is already registered.
    #[error("Duplicate consumer group{}: {message}", format_context(.context))]
    DuplicateGroup { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Options failed validation.
    #[error("Invalid configuration{}: {message}", format_context(.context))]
    InvalidConfiguration { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Configuration sources could not be loaded or deserialized.
    #[error("Config error{}: {source}", format_context(.context))]
    Config { source: config::ConfigError, context: Option<Cow<'static, str>> },

    /// Internal logic errors.
    #[error("Internal error{}: {message}", format_context(.context))]
    Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}
