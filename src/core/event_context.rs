use tokio_util::sync::CancellationToken;

/// Per-call context handed to every middleware
///
/// Carries the caller's cancellation token. The pipeline checks it before
/// entering each stage; middleware doing anything unbounded should check
/// [`is_cancelled`](Self::is_cancelled) as well.
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    cancel: CancellationToken,
}

impl EventContext {
    /// Context that is never cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Context bound to the caller's cancellation token
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
