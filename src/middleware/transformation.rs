use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::error::BoxError;
use crate::core::event_context::EventContext;
use crate::core::event_result::EventResult;
use crate::events::event::{Event, EventPriority};
use crate::events::event_middleware::{EventMiddleware, Next};
use crate::middleware::order;

/// Rewrites values on an event before it is delivered
pub trait Transformer: Send + Sync {
    fn name(&self) -> &str;

    /// Lower priorities run first
    fn priority(&self) -> i32 {
        0
    }

    fn can_transform(&self, event_type: &str) -> bool;

    fn transform(&self, event: &mut Event) -> Result<(), BoxError>;
}

/// Moves a metadata value to a new key
#[derive(Debug, Clone)]
pub struct MetadataRenameTransformer {
    from: String,
    to: String,
}

impl MetadataRenameTransformer {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl Transformer for MetadataRenameTransformer {
    fn name(&self) -> &str {
        "metadata_rename"
    }

    fn can_transform(&self, _event_type: &str) -> bool {
        true
    }

    fn transform(&self, event: &mut Event) -> Result<(), BoxError> {
        if let Some(value) = event.metadata.remove(&self.from) {
            event.metadata.insert(self.to.clone(), value);
        }
        Ok(())
    }
}

/// Forces the priority of selected event types
#[derive(Debug, Clone)]
pub struct PriorityOverrideTransformer {
    event_types: Vec<String>,
    priority: EventPriority,
}

impl PriorityOverrideTransformer {
    pub fn new<I, S>(event_types: I, priority: EventPriority) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            event_types: event_types.into_iter().map(Into::into).collect(),
            priority,
        }
    }
}

impl Transformer for PriorityOverrideTransformer {
    fn name(&self) -> &str {
        "priority_override"
    }

    fn can_transform(&self, event_type: &str) -> bool {
        self.event_types.iter().any(|t| t == event_type)
    }

    fn transform(&self, event: &mut Event) -> Result<(), BoxError> {
        event.priority = self.priority;
        Ok(())
    }
}

/// Transformer backed by a closure, applied to every event type
pub struct FnTransformer {
    name: String,
    priority: i32,
    apply: Arc<dyn Fn(&mut Event) -> Result<(), BoxError> + Send + Sync>,
}

impl FnTransformer {
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

impl Transformer for FnTransformer {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn can_transform(&self, _event_type: &str) -> bool {
        true
    }

    fn transform(&self, event: &mut Event) -> Result<(), BoxError> {
        (self.apply)(event)
    }
}

/// Middleware that rewrites event values through prioritized transformers
///
/// Same application rules as enrichment: matching transformers run in
/// ascending priority, and a failing transformer is logged and skipped
/// without stopping delivery.
pub struct TransformationMiddleware {
    transformers: Vec<Box<dyn Transformer>>,
    order: i32,
}

impl TransformationMiddleware {
    pub fn new() -> Self {
        Self {
            transformers: Vec::new(),
            order: order::TRANSFORMATION,
        }
    }

    pub fn transformer<T: Transformer + 'static>(mut self, transformer: T) -> Self {
        self.transformers.push(Box::new(transformer));
        self.transformers.sort_by_key(|t| t.priority());
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Apply matching transformers, returning how many failed
    pub fn transform(&self, event: &mut Event) -> usize {
        let event_type = event.event_type.clone();
        let mut failures = 0;

        for transformer in self.transformers.iter().filter(|t| t.can_transform(&event_type)) {
            match transformer.transform(event) {
                Ok(()) => debug!(
                    transformer = transformer.name(),
                    event_id = %event.id,
                    "transformed event"
                ),
                Err(err) => {
                    failures += 1;
                    warn!(
                        transformer = transformer.name(),
                        event_id = %event.id,
                        error = %err,
                        "transformer failed, continuing"
                    );
                }
            }
        }

        failures
    }
}

impl Default for TransformationMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl EventMiddleware for TransformationMiddleware {
    fn name(&self) -> &str {
        "transformation"
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn process(&self, event: &mut Event, _ctx: &EventContext, next: &mut Next<'_>) -> EventResult {
        self.transform(event);
        next(event)
    }
}
