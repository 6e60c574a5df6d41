use std::fmt;

use crate::core::error::PipelineError;

/// Why an event was intentionally not delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Rejected by the filtering stage
    Filtered,
    /// Seen before within the deduplication window
    Duplicate,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Filtered => write!(f, "filtered"),
            DropReason::Duplicate => write!(f, "duplicate"),
        }
    }
}

/// Outcome of pushing one event through the pipeline
///
/// Exactly one variant describes every processed event: it was handed to
/// the delivery continuation, dropped on purpose, or aborted with an error
/// the bus should route to retry or dead-letter handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventResult {
    Delivered,
    Dropped(DropReason),
    Aborted(PipelineError),
}

/// Non-error outcomes, for callers that prefer `?`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Dropped(DropReason),
}

impl EventResult {
    pub fn is_delivered(&self) -> bool {
        matches!(self, EventResult::Delivered)
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, EventResult::Dropped(_))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, EventResult::Aborted(_))
    }

    pub fn drop_reason(&self) -> Option<DropReason> {
        match self {
            EventResult::Dropped(reason) => Some(*reason),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match self {
            EventResult::Aborted(err) => Some(err),
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<Delivery, PipelineError> {
        match self {
            EventResult::Delivered => Ok(Delivery::Delivered),
            EventResult::Dropped(reason) => Ok(Delivery::Dropped(reason)),
            EventResult::Aborted(err) => Err(err),
        }
    }
}

impl From<PipelineError> for EventResult {
    fn from(err: PipelineError) -> Self {
        EventResult::Aborted(err)
    }
}

impl From<Result<(), PipelineError>> for EventResult {
    fn from(result: Result<(), PipelineError>) -> Self {
        match result {
            Ok(()) => EventResult::Delivered,
            Err(err) => EventResult::Aborted(err),
        }
    }
}

impl fmt::Display for EventResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventResult::Delivered => write!(f, "DELIVERED"),
            EventResult::Dropped(reason) => write!(f, "DROPPED ({})", reason),
            EventResult::Aborted(err) => write!(f, "ABORTED ({})", err),
        }
    }
}
