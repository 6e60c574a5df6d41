use std::fmt;

use tracing::debug;

use crate::core::error::PipelineError;
use crate::core::event_context::EventContext;
use crate::core::event_result::EventResult;
use crate::events::event::Event;
use crate::events::event_middleware::EventMiddleware;

type Deliver<'a> = dyn FnMut(&Event) -> Result<(), PipelineError> + 'a;

/// Builder collecting middleware before the pipeline is frozen
///
/// Registration order does not matter: [`build`](Self::build) sorts the
/// stages by [`EventMiddleware::order`]. Stages with equal orders keep the
/// order they were registered in.
#[derive(Default)]
pub struct EventPipelineBuilder {
    middlewares: Vec<Box<dyn EventMiddleware>>,
}

impl EventPipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a middleware (fluent API - consumes self)
    pub fn middleware<M: EventMiddleware + 'static>(mut self, middleware: M) -> Self {
        self.middlewares.push(Box::new(middleware));
        self
    }

    /// Register an already boxed middleware (mutable reference API)
    pub fn use_middleware(&mut self, middleware: Box<dyn EventMiddleware>) -> &mut Self {
        self.middlewares.push(middleware);
        self
    }

    /// Sort the stages and freeze the pipeline
    pub fn build(mut self) -> EventPipeline {
        self.middlewares.sort_by_key(|m| m.order());
        EventPipeline {
            middlewares: self.middlewares,
        }
    }
}

/// Ordered chain of middleware every event passes through
///
/// The pipeline is immutable once built and is `Send + Sync`: any number of
/// threads or tasks may call [`process`](Self::process) at once. Each
/// middleware guards its own state.
///
/// # Execution flow
///
/// Stages run in ascending order. Each stage receives a `next` continuation
/// for the remaining stages; the innermost continuation is the `deliver`
/// callback supplied by the bus.
///
/// ```text
/// Security(50)
///   → Validation(100)
///     → RateLimiting(150)
///       → ...
///         → CircuitBreaker(500)
///           → deliver(event)
/// ```
///
/// # Example
///
/// ```ignore
/// let pipeline = EventPipeline::builder()
///     .middleware(DeduplicationMiddleware::new(DeduplicationConfig::default()))
///     .middleware(ValidationMiddleware::new().validator(RequiredFieldsValidator::new()))
///     .build();
///
/// let result = pipeline.process(event, &EventContext::new(), |event| bus.dispatch(event));
///
/// match result {
///     EventResult::Delivered => {}
///     EventResult::Dropped(reason) => debug!(%reason, "dropped"),
///     EventResult::Aborted(err) if err.is_retryable() => retry_queue.push(err),
///     EventResult::Aborted(err) => dead_letters.push(err),
/// }
/// ```
pub struct EventPipeline {
    middlewares: Vec<Box<dyn EventMiddleware>>,
}

impl EventPipeline {
    pub fn builder() -> EventPipelineBuilder {
        EventPipelineBuilder::new()
    }

    /// Stage names in execution order
    pub fn stage_names(&self) -> Vec<&str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run one event through every stage and, if no stage stops it, hand it
    /// to `deliver`.
    ///
    /// An error returned by `deliver` comes back as
    /// [`EventResult::Aborted`] after unwinding through the stages, so
    /// stages such as the circuit breaker observe delivery failures.
    pub fn process<F>(&self, mut event: Event, ctx: &EventContext, mut deliver: F) -> EventResult
    where
        F: FnMut(&Event) -> Result<(), PipelineError>,
    {
        let result = self.execute_recursive(0, &mut event, ctx, &mut deliver);

        debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            outcome = %result,
            "event processed"
        );

        result
    }

    /// Stop background work owned by any stage
    pub fn shutdown(&self) {
        for middleware in &self.middlewares {
            middleware.shutdown();
        }
    }

    fn execute_recursive(
        &self,
        index: usize,
        event: &mut Event,
        ctx: &EventContext,
        deliver: &mut Deliver<'_>,
    ) -> EventResult {
        if ctx.is_cancelled() {
            return EventResult::Aborted(PipelineError::Cancelled);
        }

        let Some(middleware) = self.middlewares.get(index) else {
            // Base case: hand the event to the bus
            return deliver(event).into();
        };

        let mut next = |event: &mut Event| -> EventResult {
            self.execute_recursive(index + 1, event, ctx, &mut *deliver)
        };

        middleware.process(event, ctx, &mut next)
    }
}

impl fmt::Debug for EventPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}
