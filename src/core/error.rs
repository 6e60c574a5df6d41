//! Abort errors raised by pipeline stages.
//!
//! Only aborts are errors. Soft failures (a broken enricher or transformer)
//! are logged and absorbed, and silent drops (filtered, duplicate) are
//! reported through [`EventResult::Dropped`](crate::EventResult::Dropped).

use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by pluggable strategies (validators, enrichers, checks)
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error that stopped an event before delivery
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// A validator rejected the event.
    #[error("validation failed in {validator}: {message}")]
    Validation {
        /// Name of the rejecting validator
        validator: String,
        message: String,
    },

    /// A pluggable security check rejected the event.
    #[error("security check {check} failed: {message}")]
    Security {
        /// Name of the rejecting check
        check: String,
        message: String,
    },

    /// A sensitive event type arrived without the encryption flag.
    #[error("event type {event_type} is sensitive and must be encrypted")]
    EncryptionRequired { event_type: String },

    /// The token bucket for `key` is empty.
    #[error("rate limit exceeded for key {key}, retry after {retry_after:?}")]
    RateLimited { key: String, retry_after: Duration },

    /// The circuit for `key` is open and the call was not attempted.
    #[error("circuit open for key {key}")]
    CircuitOpen { key: String },

    /// The terminal delivery continuation failed.
    #[error("delivery failed: {message}")]
    Delivery { message: String },

    /// The caller cancelled processing before the event was delivered.
    #[error("event processing cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn validation(validator: impl Into<String>, message: impl ToString) -> Self {
        Self::Validation {
            validator: validator.into(),
            message: message.to_string(),
        }
    }

    pub fn security(check: impl Into<String>, message: impl ToString) -> Self {
        Self::Security {
            check: check.into(),
            message: message.to_string(),
        }
    }

    pub fn delivery(message: impl ToString) -> Self {
        Self::Delivery {
            message: message.to_string(),
        }
    }

    /// Name of the stage that produced this error
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Security { .. } | Self::EncryptionRequired { .. } => "security",
            Self::RateLimited { .. } => "rate_limit",
            Self::CircuitOpen { .. } => "circuit_breaker",
            Self::Delivery { .. } => "delivery",
            Self::Cancelled => "pipeline",
        }
    }

    /// Whether the bus may retry this event later instead of dead-lettering it.
    ///
    /// Validation and security rejections are properties of the event itself
    /// and will fail again; the rest are transient.
    ///
    /// # Retries and deduplication
    ///
    /// Deduplication records an event's hash before forwarding it. An abort
    /// raised by a later stage (circuit open, delivery failure with the
    /// default orders) therefore leaves the hash recorded, and retrying the
    /// same event within the deduplication TTL yields
    /// [`EventResult::Dropped`](crate::EventResult::Dropped) with
    /// [`DropReason::Duplicate`](crate::DropReason::Duplicate). Retry after
    /// the TTL, or with a hasher that tells attempts apart.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::CircuitOpen { .. }
                | Self::Delivery { .. }
                | Self::Cancelled
        )
    }

    /// Whether this error means the delivery target itself failed.
    ///
    /// Only delivery failures qualify. Cancellation is the caller's doing and
    /// the remaining variants are rejections of the event by a stage.
    pub fn is_target_failure(&self) -> bool {
        matches!(self, Self::Delivery { .. })
    }
}
