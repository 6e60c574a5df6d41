//! Event Pipeline - an ordered middleware chain for event buses
//!
//! Every published event passes through a chain of stateful middleware
//! before it reaches subscribers. Each stage may forward the event
//! (optionally after mutating it), drop it silently, or abort with an
//! error the bus routes to retry or dead-letter handling.
//!
//! # Built-in middleware (default order)
//!
//! | Order | Middleware | Behaviour |
//! |------:|------------|-----------|
//! |    50 | Security | pluggable checks + sensitive-type encryption policy |
//! |   100 | Validation | first failing validator aborts |
//! |   150 | RateLimiting | token bucket per key |
//! |   200 | Enrichment | priority-ordered, continue on error |
//! |   250 | Deduplication | TTL window, silent drop |
//! |   300 | Filtering | include/exclude filters, silent drop |
//! |   400 | Transformation | priority-ordered, continue on error |
//! |   500 | CircuitBreaker | Closed/Open/HalfOpen per key |
//!
//! # Quick Start
//!
//! ```ignore
//! use event_pipeline::{Event, EventContext, EventPipeline, EventResult};
//! use event_pipeline::middleware::validation::{RequiredFieldsValidator, ValidationMiddleware};
//! use event_pipeline::middleware::deduplication::{DeduplicationConfig, DeduplicationMiddleware};
//!
//! let pipeline = EventPipeline::builder()
//!     .middleware(DeduplicationMiddleware::new(DeduplicationConfig::default()))
//!     .middleware(ValidationMiddleware::new().validator(RequiredFieldsValidator::new()))
//!     .build();
//!
//! let result = pipeline.process(
//!     Event::new("order.created", "svc-a"),
//!     &EventContext::new(),
//!     |event| bus.dispatch(event),
//! );
//! assert!(matches!(result, EventResult::Delivered));
//! ```

pub mod core;
pub mod events;
pub mod middleware;

// Convenience re-exports
pub use crate::core::error::{BoxError, PipelineError};
pub use crate::core::event_context::EventContext;
pub use crate::core::event_pipeline::{EventPipeline, EventPipelineBuilder};
pub use crate::core::event_result::{Delivery, DropReason, EventResult};
pub use crate::events::event::{Event, EventPriority};
pub use crate::events::event_middleware::{EventMiddleware, Next};
