use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::error::PipelineError;
use crate::core::event_context::EventContext;
use crate::core::event_result::EventResult;
use crate::events::event::Event;
use crate::events::event_middleware::{EventMiddleware, Next};
use crate::middleware::keyed::{KeyExtractor, KeyedRegistry, resolve_key};
use crate::middleware::order;

/// Capacity and refill rate of one token bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Maximum number of tokens, also the initial fill
    pub capacity: u32,
    /// Tokens added per second
    pub refill_rate: f64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            refill_rate: 10.0,
        }
    }
}

/// Rate limit settings for every key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Bucket used for keys without an override
    #[serde(default)]
    pub default: BucketConfig,
    /// Per-key overrides
    #[serde(default)]
    pub per_key: HashMap<String, BucketConfig>,
}

impl RateLimitConfig {
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            default: BucketConfig {
                capacity,
                refill_rate,
            },
            per_key: HashMap::new(),
        }
    }

    /// Override the bucket for one key
    pub fn with_key(mut self, key: impl Into<String>, capacity: u32, refill_rate: f64) -> Self {
        self.per_key.insert(
            key.into(),
            BucketConfig {
                capacity,
                refill_rate,
            },
        );
        self
    }

    pub fn bucket_for(&self, key: &str) -> BucketConfig {
        self.per_key.get(key).copied().unwrap_or(self.default)
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter
///
/// Tokens refill continuously in proportion to elapsed time and never
/// exceed capacity, so `0 <= tokens <= capacity` always holds. An admitted
/// call spends one whole token.
pub struct RateLimiter {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_rate: f64,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self::starting_at(capacity, refill_rate, Instant::now())
    }

    fn starting_at(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        let capacity = f64::from(capacity);
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: now,
            }),
            capacity,
            // Negative or NaN rates would drain or poison the bucket
            refill_rate: if refill_rate.is_finite() && refill_rate > 0.0 {
                refill_rate
            } else {
                0.0
            },
        }
    }

    /// Try to spend one token
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Current token count after refilling up to now
    pub fn tokens(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());
        state.tokens
    }

    /// Time until one whole token will be available
    pub fn retry_after(&self) -> Duration {
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());
        self.wait_for_token(&state)
    }

    fn allow_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state, now);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
            state.last_refill = now;
        }
    }

    fn wait_for_token(&self, state: &BucketState) -> Duration {
        let deficit = (1.0 - state.tokens).max(0.0);
        if deficit == 0.0 {
            return Duration::ZERO;
        }
        if self.refill_rate == 0.0 {
            return Duration::MAX;
        }
        Duration::try_from_secs_f64(deficit / self.refill_rate).unwrap_or(Duration::MAX)
    }
}

/// Middleware that enforces a token bucket per key
///
/// The key comes from a configurable extractor (the event source by
/// default; an empty key becomes `"default"`). Buckets are created lazily
/// the first time a key is seen, sized from the per-key override or the
/// default bucket.
///
/// Exceeding the limit aborts the chain with
/// [`PipelineError::RateLimited`], which the bus may retry.
///
/// # Example
///
/// ```ignore
/// use event_pipeline::middleware::rate_limit::{RateLimitConfig, RateLimitMiddleware};
///
/// // 10 events burst, 5 per second sustained, tighter for one noisy source
/// let limiter = RateLimitMiddleware::new(
///     RateLimitConfig::new(10, 5.0).with_key("svc-noisy", 2, 0.5),
/// );
/// ```
pub struct RateLimitMiddleware {
    config: RateLimitConfig,
    limiters: KeyedRegistry<RateLimiter>,
    key_extractor: KeyExtractor,
    order: i32,
}

impl RateLimitMiddleware {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            limiters: KeyedRegistry::new(),
            key_extractor: Arc::new(|event: &Event| event.source.clone()),
            order: order::RATE_LIMITING,
        }
    }

    /// Resolve the bucket key from the event
    pub fn with_key_extractor<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&Event) -> String + Send + Sync + 'static,
    {
        self.key_extractor = Arc::new(extractor);
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Remaining tokens for a key, if its bucket exists yet
    pub fn tokens(&self, key: &str) -> Option<f64> {
        self.limiters.get(key).map(|limiter| limiter.tokens())
    }

    /// Number of keys with a live bucket
    pub fn tracked_keys(&self) -> usize {
        self.limiters.len()
    }

    fn limiter_for(&self, key: &str) -> Arc<RateLimiter> {
        self.limiters.get_or_insert_with(key, || {
            let bucket = self.config.bucket_for(key);
            debug!(
                key,
                capacity = bucket.capacity,
                refill_rate = bucket.refill_rate,
                "creating token bucket"
            );
            RateLimiter::new(bucket.capacity, bucket.refill_rate)
        })
    }
}

impl EventMiddleware for RateLimitMiddleware {
    fn name(&self) -> &str {
        "rate_limit"
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn process(&self, event: &mut Event, _ctx: &EventContext, next: &mut Next<'_>) -> EventResult {
        let key = resolve_key(&self.key_extractor, event);
        let limiter = self.limiter_for(&key);

        if limiter.allow() {
            return next(event);
        }

        let retry_after = limiter.retry_after();
        warn!(
            key = %key,
            event_id = %event.id,
            event_type = %event.event_type,
            ?retry_after,
            "rate limit exceeded"
        );
        EventResult::Aborted(PipelineError::RateLimited { key, retry_after })
    }
}
