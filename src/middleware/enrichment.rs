use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::error::BoxError;
use crate::core::event_context::EventContext;
use crate::core::event_result::EventResult;
use crate::events::event::Event;
use crate::events::event_middleware::{EventMiddleware, Next};
use crate::middleware::order;

/// Adds information to an event before it is delivered
pub trait Enricher: Send + Sync {
    fn name(&self) -> &str;

    /// Lower priorities run first
    fn priority(&self) -> i32 {
        0
    }

    fn can_enrich(&self, event_type: &str) -> bool;

    fn enrich(&self, event: &mut Event) -> Result<(), BoxError>;
}

/// Sets a fixed metadata entry on every event (or on selected types)
#[derive(Debug, Clone)]
pub struct StaticMetadataEnricher {
    key: String,
    value: Value,
    event_types: Vec<String>,
    priority: i32,
}

impl StaticMetadataEnricher {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            event_types: Vec::new(),
            priority: 0,
        }
    }

    /// Restrict to these event types; empty means all
    pub fn for_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl Enricher for StaticMetadataEnricher {
    fn name(&self) -> &str {
        "static_metadata"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn can_enrich(&self, event_type: &str) -> bool {
        self.event_types.is_empty() || self.event_types.iter().any(|t| t == event_type)
    }

    fn enrich(&self, event: &mut Event) -> Result<(), BoxError> {
        event.set_metadata(self.key.clone(), self.value.clone());
        Ok(())
    }
}

/// Stamps `processed_at` with the RFC 3339 processing time
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessedAtEnricher;

impl Enricher for ProcessedAtEnricher {
    fn name(&self) -> &str {
        "processed_at"
    }

    fn can_enrich(&self, _event_type: &str) -> bool {
        true
    }

    fn enrich(&self, event: &mut Event) -> Result<(), BoxError> {
        event.set_metadata("processed_at", Utc::now().to_rfc3339());
        Ok(())
    }
}

/// Enricher backed by a closure, applied to every event type
pub struct FnEnricher {
    name: String,
    priority: i32,
    apply: Arc<dyn Fn(&mut Event) -> Result<(), BoxError> + Send + Sync>,
}

impl FnEnricher {
    pub fn new<F>(name: impl Into<String>, priority: i32, apply: F) -> Self
    where
        F: Fn(&mut Event) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            priority,
            apply: Arc::new(apply),
        }
    }
}

impl Enricher for FnEnricher {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn can_enrich(&self, _event_type: &str) -> bool {
        true
    }

    fn enrich(&self, event: &mut Event) -> Result<(), BoxError> {
        (self.apply)(event)
    }
}

/// Middleware that applies every matching enricher in priority order
///
/// Enrichers whose [`can_enrich`](Enricher::can_enrich) accepts the event
/// type run in ascending [`priority`](Enricher::priority), ties keeping
/// registration order.
///
/// # Soft failures
///
/// A failing enricher is logged and skipped. Enrichment is optional, so it
/// never stops the event from being forwarded.
///
/// # Example
///
/// ```ignore
/// let enrichment = EnrichmentMiddleware::new()
///     .enricher(ProcessedAtEnricher)
///     .enricher(StaticMetadataEnricher::new("region", "eu-west-1").with_priority(-10));
/// ```
pub struct EnrichmentMiddleware {
    enrichers: Vec<Box<dyn Enricher>>,
    order: i32,
}

impl EnrichmentMiddleware {
    pub fn new() -> Self {
        Self {
            enrichers: Vec::new(),
            order: order::ENRICHMENT,
        }
    }

    pub fn enricher<E: Enricher + 'static>(mut self, enricher: E) -> Self {
        self.enrichers.push(Box::new(enricher));
        // Stable: equal priorities keep registration order
        self.enrichers.sort_by_key(|e| e.priority());
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Apply matching enrichers, returning how many failed
    pub fn enrich(&self, event: &mut Event) -> usize {
        let event_type = event.event_type.clone();
        let mut failures = 0;

        for enricher in self.enrichers.iter().filter(|e| e.can_enrich(&event_type)) {
            match enricher.enrich(event) {
                Ok(()) => {
                    debug!(enricher = enricher.name(), event_id = %event.id, "enriched event")
                }
                Err(err) => {
                    failures += 1;
                    warn!(
                        enricher = enricher.name(),
                        event_id = %event.id,
                        error = %err,
                        "enricher failed, continuing"
                    );
                }
            }
        }

        failures
    }
}

impl Default for EnrichmentMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl EventMiddleware for EnrichmentMiddleware {
    fn name(&self) -> &str {
        "enrichment"
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn process(&self, event: &mut Event, _ctx: &EventContext, next: &mut Next<'_>) -> EventResult {
        self.enrich(event);
        next(event)
    }
}
