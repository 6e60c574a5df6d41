use std::sync::Arc;

use hashbrown::HashSet;
use tracing::warn;

use crate::core::error::{BoxError, PipelineError};
use crate::core::event_context::EventContext;
use crate::core::event_result::EventResult;
use crate::events::event::Event;
use crate::events::event_middleware::{EventMiddleware, Next};
use crate::middleware::order;

/// A check an event must pass before anything else touches it
pub trait Validator: Send + Sync {
    fn name(&self) -> &str;

    fn validate(&self, event: &Event) -> Result<(), BoxError>;
}

/// Rejects events with an empty type or source (and optionally target)
#[derive(Debug, Clone, Default)]
pub struct RequiredFieldsValidator {
    require_target: bool,
}

impl RequiredFieldsValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_target(mut self) -> Self {
        self.require_target = true;
        self
    }
}

impl Validator for RequiredFieldsValidator {
    fn name(&self) -> &str {
        "required_fields"
    }

    fn validate(&self, event: &Event) -> Result<(), BoxError> {
        if event.event_type.trim().is_empty() {
            return Err("event type is empty".into());
        }
        if event.source.trim().is_empty() {
            return Err("event source is empty".into());
        }
        if self.require_target && event.target.trim().is_empty() {
            return Err("event target is empty".into());
        }
        Ok(())
    }
}

/// Rejects event types outside a fixed set
#[derive(Debug, Clone)]
pub struct AllowedTypesValidator {
    allowed: HashSet<String>,
}

impl AllowedTypesValidator {
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: types.into_iter().map(Into::into).collect(),
        }
    }
}

impl Validator for AllowedTypesValidator {
    fn name(&self) -> &str {
        "allowed_types"
    }

    fn validate(&self, event: &Event) -> Result<(), BoxError> {
        if self.allowed.contains(&event.event_type) {
            Ok(())
        } else {
            Err(format!("event type {} is not allowed", event.event_type).into())
        }
    }
}

/// Validator backed by a closure
pub struct FnValidator {
    name: String,
    check: Arc<dyn Fn(&Event) -> Result<(), BoxError> + Send + Sync>,
}

impl FnValidator {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Event) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }
}

impl Validator for FnValidator {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, event: &Event) -> Result<(), BoxError> {
        (self.check)(event)
    }
}

/// Middleware that runs validators in registration order
///
/// The first failing validator aborts the chain with
/// [`PipelineError::Validation`]; later validators do not run. The event
/// is never modified.
///
/// # Example
///
/// ```ignore
/// let validation = ValidationMiddleware::new()
///     .validator(RequiredFieldsValidator::new())
///     .validator(AllowedTypesValidator::new(["order.created", "order.paid"]));
/// ```
pub struct ValidationMiddleware {
    validators: Vec<Box<dyn Validator>>,
    order: i32,
}

impl ValidationMiddleware {
    pub fn new() -> Self {
        Self {
            validators: Vec::new(),
            order: order::VALIDATION,
        }
    }

    pub fn validator<V: Validator + 'static>(mut self, validator: V) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Run every validator, stopping at the first failure
    pub fn validate(&self, event: &Event) -> Result<(), PipelineError> {
        for validator in &self.validators {
            validator
                .validate(event)
                .map_err(|err| PipelineError::validation(validator.name(), err))?;
        }
        Ok(())
    }
}

impl Default for ValidationMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl EventMiddleware for ValidationMiddleware {
    fn name(&self) -> &str {
        "validation"
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn process(&self, event: &mut Event, _ctx: &EventContext, next: &mut Next<'_>) -> EventResult {
        if let Err(err) = self.validate(event) {
            warn!(event_id = %event.id, error = %err, "event failed validation");
            return EventResult::Aborted(err);
        }
        next(event)
    }
}
