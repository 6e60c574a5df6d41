use std::fmt;
use std::sync::Arc;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::core::error::{BoxError, PipelineError};
use crate::core::event_context::EventContext;
use crate::core::event_result::EventResult;
use crate::events::event::Event;
use crate::events::event_middleware::{EventMiddleware, Next};
use crate::middleware::order;

/// Category of a security check, which also fixes when it runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityCheckKind {
    Authentication,
    Authorization,
    Sanitization,
    Encryption,
}

impl fmt::Display for SecurityCheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityCheckKind::Authentication => write!(f, "authentication"),
            SecurityCheckKind::Authorization => write!(f, "authorization"),
            SecurityCheckKind::Sanitization => write!(f, "sanitization"),
            SecurityCheckKind::Encryption => write!(f, "encryption"),
        }
    }
}

/// A pluggable security gate
pub trait SecurityCheck: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> SecurityCheckKind;

    fn check(&self, event: &Event) -> Result<(), BoxError>;
}

/// Declarative policy enforced on top of the pluggable checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    /// Event types that must carry the encryption flag
    #[serde(default)]
    pub sensitive_types: HashSet<String>,
    /// Whether sensitive types are enforced at all
    #[serde(default = "default_require_encryption")]
    pub require_encryption: bool,
    /// Metadata key holding the encryption flag
    #[serde(default = "default_encrypted_flag")]
    pub encrypted_flag: String,
}

fn default_require_encryption() -> bool {
    true
}

fn default_encrypted_flag() -> String {
    "encrypted".to_string()
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            sensitive_types: HashSet::new(),
            require_encryption: default_require_encryption(),
            encrypted_flag: default_encrypted_flag(),
        }
    }
}

impl SecurityPolicy {
    pub fn sensitive<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sensitive_types: types.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn enforce(&self, event: &Event) -> Result<(), PipelineError> {
        if self.require_encryption
            && self.sensitive_types.contains(&event.event_type)
            && !event.metadata_flag(&self.encrypted_flag)
        {
            return Err(PipelineError::EncryptionRequired {
                event_type: event.event_type.clone(),
            });
        }
        Ok(())
    }
}

/// Authentication: a metadata key (e.g. an auth token) must be present and non-empty
#[derive(Debug, Clone)]
pub struct RequiredMetadataCheck {
    key: String,
}

impl RequiredMetadataCheck {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl SecurityCheck for RequiredMetadataCheck {
    fn name(&self) -> &str {
        "required_metadata"
    }

    fn kind(&self) -> SecurityCheckKind {
        SecurityCheckKind::Authentication
    }

    fn check(&self, event: &Event) -> Result<(), BoxError> {
        match event.metadata(&self.key) {
            None | Some(Value::Null) => Err(format!("missing {}", self.key).into()),
            Some(Value::String(s)) if s.is_empty() => Err(format!("empty {}", self.key).into()),
            Some(_) => Ok(()),
        }
    }
}

/// Authorization: only listed sources may publish
#[derive(Debug, Clone)]
pub struct SourceAllowlistCheck {
    allowed: HashSet<String>,
}

impl SourceAllowlistCheck {
    pub fn new<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: sources.into_iter().map(Into::into).collect(),
        }
    }
}

impl SecurityCheck for SourceAllowlistCheck {
    fn name(&self) -> &str {
        "source_allowlist"
    }

    fn kind(&self) -> SecurityCheckKind {
        SecurityCheckKind::Authorization
    }

    fn check(&self, event: &Event) -> Result<(), BoxError> {
        if self.allowed.contains(&event.source) {
            Ok(())
        } else {
            Err(format!("source {} is not allowed to publish", event.source).into())
        }
    }
}

/// Sanitization: rejects control characters in identifying fields and string metadata
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlCharacterCheck;

impl SecurityCheck for ControlCharacterCheck {
    fn name(&self) -> &str {
        "control_characters"
    }

    fn kind(&self) -> SecurityCheckKind {
        SecurityCheckKind::Sanitization
    }

    fn check(&self, event: &Event) -> Result<(), BoxError> {
        let has_control = |s: &str| s.chars().any(char::is_control);

        for (field, value) in [
            ("type", event.event_type.as_str()),
            ("source", event.source.as_str()),
            ("target", event.target.as_str()),
        ] {
            if has_control(value) {
                return Err(format!("control character in {field}").into());
            }
        }

        for (key, value) in &event.metadata {
            if has_control(key.as_str()) || value.as_str().is_some_and(has_control) {
                return Err(format!("control character in metadata {key}").into());
            }
        }

        Ok(())
    }
}

/// Security check backed by a closure
pub struct FnSecurityCheck {
    name: String,
    kind: SecurityCheckKind,
    check: Arc<dyn Fn(&Event) -> Result<(), BoxError> + Send + Sync>,
}

impl FnSecurityCheck {
    pub fn new<F>(name: impl Into<String>, kind: SecurityCheckKind, check: F) -> Self
    where
        F: Fn(&Event) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind,
            check: Arc::new(check),
        }
    }
}

impl SecurityCheck for FnSecurityCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SecurityCheckKind {
        self.kind
    }

    fn check(&self, event: &Event) -> Result<(), BoxError> {
        (self.check)(event)
    }
}

/// Middleware that gates events on security checks and policy
///
/// Checks run ordered by kind (authentication, authorization,
/// sanitization, encryption), registration order within a kind. The first
/// failing check aborts with [`PipelineError::Security`]. Events that pass
/// every check are then held to the [`SecurityPolicy`]: a sensitive type
/// without the encryption flag aborts with
/// [`PipelineError::EncryptionRequired`].
///
/// # Example
///
/// ```ignore
/// let security = SecurityMiddleware::new(SecurityPolicy::sensitive(["payment.captured"]))
///     .check(RequiredMetadataCheck::new("auth_token"))
///     .check(SourceAllowlistCheck::new(["checkout", "billing"]));
/// ```
pub struct SecurityMiddleware {
    checks: Vec<Box<dyn SecurityCheck>>,
    policy: SecurityPolicy,
    order: i32,
}

impl SecurityMiddleware {
    pub fn new(policy: SecurityPolicy) -> Self {
        Self {
            checks: Vec::new(),
            policy,
            order: order::SECURITY,
        }
    }

    pub fn check<C: SecurityCheck + 'static>(mut self, check: C) -> Self {
        self.checks.push(Box::new(check));
        self.checks.sort_by_key(|c| c.kind());
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// Run every check, then the policy
    pub fn authorize(&self, event: &Event) -> Result<(), PipelineError> {
        for check in &self.checks {
            check.check(event).map_err(|err| {
                PipelineError::security(check.name(), format!("{}: {err}", check.kind()))
            })?;
        }
        self.policy.enforce(event)
    }
}

impl Default for SecurityMiddleware {
    fn default() -> Self {
        Self::new(SecurityPolicy::default())
    }
}

impl EventMiddleware for SecurityMiddleware {
    fn name(&self) -> &str {
        "security"
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn process(&self, event: &mut Event, _ctx: &EventContext, next: &mut Next<'_>) -> EventResult {
        if let Err(err) = self.authorize(event) {
            warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                source = %event.source,
                error = %err,
                "event rejected by security"
            );
            return EventResult::Aborted(err);
        }
        next(event)
    }
}
