use crate::core::event_context::EventContext;
use crate::core::event_result::EventResult;
use crate::events::event::Event;

/// Continuation invoking the rest of the chain
pub type Next<'a> = dyn FnMut(&mut Event) -> EventResult + 'a;

/// A single pipeline stage
///
/// A middleware decides, per event, to do one of three things:
///
/// * call `next(event)` to continue, optionally after mutating the event
/// * return [`EventResult::Dropped`] without calling `next` (silent drop)
/// * return [`EventResult::Aborted`] without calling `next` (abort)
///
/// The outcome returned by `next` should normally be passed back unchanged.
///
/// # Ordering
///
/// Stages run in ascending [`order`](Self::order); lower runs first. Equal
/// orders keep their registration order.
///
/// # Example
///
/// ```ignore
/// struct Tag;
///
/// impl EventMiddleware for Tag {
///     fn name(&self) -> &str { "tag" }
///     fn order(&self) -> i32 { 210 }
///
///     fn process(
///         &self,
///         event: &mut Event,
///         _ctx: &EventContext,
///         next: &mut Next<'_>,
///     ) -> EventResult {
///         event.set_metadata("tagged", true);
///         next(event)
///     }
/// }
/// ```
pub trait EventMiddleware: Send + Sync {
    /// Stage name used in logs and
    /// [`EventPipeline::stage_names`](crate::EventPipeline::stage_names)
    fn name(&self) -> &str;

    /// Execution priority, lower runs first
    fn order(&self) -> i32;

    fn process(&self, event: &mut Event, ctx: &EventContext, next: &mut Next<'_>) -> EventResult;

    /// Stop background work owned by this middleware
    fn shutdown(&self) {}
}

impl<M: EventMiddleware + ?Sized> EventMiddleware for std::sync::Arc<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn order(&self) -> i32 {
        (**self).order()
    }

    fn process(&self, event: &mut Event, ctx: &EventContext, next: &mut Next<'_>) -> EventResult {
        (**self).process(event, ctx, next)
    }

    fn shutdown(&self) {
        (**self).shutdown()
    }
}
