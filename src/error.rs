//! Error taxonomy for the aggregator, mirroring the error-kind table in
//! the design doc one-to-one so call sites can match on the policy that
//! applies to them instead of re-deriving it from context.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggregatorError {
    /// A `UserEvent`/`UserEventStats` invariant was violated.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// The wire payload was not valid JSON.
    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),

    /// A store operation failed in a way the retry policy considers
    /// transient (connection error, timeout).
    #[error("transient store error: {0}")]
    TransientStoreError(String),

    /// A store operation failed in a way that is not retryable, or the
    /// retry budget was exhausted.
    #[error("store error: {0}")]
    StoreError(String),

    /// A non-fatal broker error; the poll loop logs and continues.
    #[error("transient consume error: {0}")]
    TransientConsumeError(String),

    /// A fatal broker error; the poll loop publishes it and exits.
    #[error("fatal broker error: {0}")]
    FatalBrokerError(String),

    /// An observer's `on_next`/`on_error` callback panicked or returned
    /// an error; the fan-out caught it so other observers still run.
    #[error("observer callback error: {0}")]
    ObserverCallbackError(String),

    /// Shutdown was requested; not a failure.
    #[error("cancelled")]
    Cancelled,

    /// Startup-time configuration is missing or malformed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// `Fan-out::publish`/`publish_error` was called with no payload.
    #[error("null input")]
    NullInput,
}

impl AggregatorError {
    /// Whether a store error is worth retrying under the bounded-retry
    /// policy in the design doc (§4.5).
    pub fn is_retryable(&self) -> bool {
        matches!(self, AggregatorError::TransientStoreError(_))
    }
}

pub type AggregatorResult<T> = Result<T, AggregatorError>;
