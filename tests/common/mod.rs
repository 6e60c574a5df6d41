#![allow(dead_code)]

use std::sync::{Arc, Once};

use event_pipeline::{Event, EventContext, EventMiddleware, EventResult, Next};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Route pipeline logs through the test harness (`RUST_LOG=debug` to see them)
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Shared log of which stages saw an event, in order
pub type ExecutionLog = Arc<Mutex<Vec<String>>>;

pub fn execution_log() -> ExecutionLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Middleware that records its name and forwards
pub struct RecordingMiddleware {
    name: String,
    order: i32,
    log: ExecutionLog,
}

impl RecordingMiddleware {
    pub fn new(name: &str, order: i32, log: &ExecutionLog) -> Self {
        Self {
            name: name.to_string(),
            order,
            log: Arc::clone(log),
        }
    }
}

impl EventMiddleware for RecordingMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn process(&self, event: &mut Event, _ctx: &EventContext, next: &mut Next<'_>) -> EventResult {
        self.log.lock().push(self.name.clone());
        next(event)
    }
}

pub fn order_created() -> Event {
    Event::new("order.created", "svc-a").with_target("billing")
}
