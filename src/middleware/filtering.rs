use std::fmt;
use std::sync::Arc;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::event_context::EventContext;
use crate::core::event_result::{DropReason, EventResult};
use crate::events::event::{Event, EventPriority};
use crate::events::event_middleware::{EventMiddleware, Next};
use crate::middleware::order;

/// How a filter match is interpreted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Forward only events matching some filter
    #[default]
    Include,
    /// Forward only events matching no filter
    Exclude,
}

type Predicate = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// A conjunction of optional criteria
///
/// Every non-empty criterion must match. A filter with no criteria matches
/// every event.
#[derive(Clone, Default)]
pub struct EventFilter {
    event_types: HashSet<String>,
    sources: HashSet<String>,
    priorities: HashSet<EventPriority>,
    predicate: Option<Predicate>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources.extend(sources.into_iter().map(Into::into));
        self
    }

    pub fn priorities<I>(mut self, priorities: I) -> Self
    where
        I: IntoIterator<Item = EventPriority>,
    {
        self.priorities.extend(priorities);
        self
    }

    pub fn predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        (self.event_types.is_empty() || self.event_types.contains(&event.event_type))
            && (self.sources.is_empty() || self.sources.contains(&event.source))
            && (self.priorities.is_empty() || self.priorities.contains(&event.priority))
            && self.predicate.as_ref().is_none_or(|p| p(event))
    }
}

impl fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventFilter")
            .field("event_types", &self.event_types)
            .field("sources", &self.sources)
            .field("priorities", &self.priorities)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

/// Middleware that silently drops events by filter
///
/// In [`FilterMode::Include`] an event is forwarded only if some filter
/// matches; in [`FilterMode::Exclude`] only if none does. For a fixed
/// filter set the two modes are exact complements, including the empty
/// set: with no filters registered, include mode drops every event and
/// exclude mode forwards every event.
///
/// Dropped events return [`EventResult::Dropped`] with
/// [`DropReason::Filtered`], never an error.
///
/// # Example
///
/// ```ignore
/// // Only order events from the checkout service
/// let filtering = FilteringMiddleware::new(FilterMode::Include).filter(
///     EventFilter::new()
///         .sources(["checkout"])
///         .predicate(|e| e.event_type.starts_with("order.")),
/// );
/// ```
#[derive(Debug)]
pub struct FilteringMiddleware {
    mode: FilterMode,
    filters: Vec<EventFilter>,
    order: i32,
}

impl FilteringMiddleware {
    pub fn new(mode: FilterMode) -> Self {
        Self {
            mode,
            filters: Vec::new(),
            order: order::FILTERING,
        }
    }

    pub fn filter(mut self, filter: EventFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    /// Whether the event should continue down the chain
    pub fn should_forward(&self, event: &Event) -> bool {
        let matched = self.filters.iter().any(|f| f.matches(event));
        match self.mode {
            FilterMode::Include => matched,
            FilterMode::Exclude => !matched,
        }
    }
}

impl EventMiddleware for FilteringMiddleware {
    fn name(&self) -> &str {
        "filtering"
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn process(&self, event: &mut Event, _ctx: &EventContext, next: &mut Next<'_>) -> EventResult {
        if !self.should_forward(event) {
            debug!(
                event_id = %event.id,
                event_type = %event.event_type,
                mode = ?self.mode,
                "event filtered out"
            );
            return EventResult::Dropped(DropReason::Filtered);
        }
        next(event)
    }
}
