/// Abort errors and strategy error types
pub mod error;

/// Per-call context (cancellation)
pub mod event_context;

/// The ordered middleware pipeline
pub mod event_pipeline;

/// Delivered / dropped / aborted outcomes
pub mod event_result;
