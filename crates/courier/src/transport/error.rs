use std::borrow::Cow;

/// Errors reported by a broker transport.
///
/// Transports map their client-specific failures onto these variants so the
/// rest of the crate can log and propagate them uniformly.
#[courier_derive::courier_error]
#[derive(Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker could not be reached or the connection dropped.
    #[error("Broker unavailable{}: {message}", format_context(.context))]
    Unavailable { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The broker refused a record or a request.
    #[error("Broker rejected request{}: {message}", format_context(.context))]
    Rejected { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// A requested offset no longer exists on the broker.
    #[error("Offset out of range{}: {message}", format_context(.context))]
    OffsetOutOfRange { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The handle was already closed.
    #[error("Broker handle closed{}: {message}", format_context(.context))]
    Closed { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Any other transport failure.
    #[error("Broker transport error{}: {message}", format_context(.context))]
    Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}
