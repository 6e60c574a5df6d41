//! TTL-based suppression of repeated events.
//!
//! Events are identified by a pluggable [`DedupHasher`]. The default hash
//! covers type, source, target and the timestamp truncated to whole
//! seconds: two otherwise identical events published within the same
//! wall-clock second are treated as the same event, even if the publisher
//! meant them as two.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::runtime::{Handle, TryCurrentError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::event_context::EventContext;
use crate::core::event_result::{DropReason, EventResult};
use crate::events::event::Event;
use crate::events::event_middleware::{EventMiddleware, Next};
use crate::middleware::order;

const MIN_RECLAIM_PERIOD: Duration = Duration::from_millis(1);

/// Deduplication window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeduplicationConfig {
    /// How long a hash suppresses repeats after it was last forwarded
    pub ttl: Duration,
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
        }
    }
}

/// Derives the identity used to spot repeated events
pub trait DedupHasher: Send + Sync {
    fn hash(&self, event: &Event) -> String;
}

impl<F> DedupHasher for F
where
    F: Fn(&Event) -> String + Send + Sync,
{
    fn hash(&self, event: &Event) -> String {
        self(event)
    }
}

/// Hex SHA-256 of type, source, target and the unix second of the timestamp
///
/// Each string field is length-prefixed, so no choice of field contents can
/// make two different events produce the same input.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecondGranularityHasher;

fn update_field(hasher: &mut Sha256, field: &str) {
    hasher.update((field.len() as u64).to_be_bytes());
    hasher.update(field.as_bytes());
}

impl DedupHasher for SecondGranularityHasher {
    fn hash(&self, event: &Event) -> String {
        let mut hasher = Sha256::new();
        update_field(&mut hasher, &event.event_type);
        update_field(&mut hasher, &event.source);
        update_field(&mut hasher, &event.target);
        hasher.update(event.timestamp.timestamp().to_be_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Hash → last time an event with that hash was forwarded
///
/// An entry older than the TTL is expired: it no longer suppresses
/// anything and may be evicted by [`reclaim_expired`](Self::reclaim_expired).
pub struct DedupCache {
    entries: RwLock<HashMap<String, Instant>>,
    ttl: Duration,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Record `hash` unless it was seen within the TTL.
    ///
    /// Returns `true` for a first sighting (the caller should forward) and
    /// `false` for a duplicate.
    pub fn check_and_record(&self, hash: &str) -> bool {
        self.check_and_record_at(hash, Instant::now())
    }

    /// Evict every expired entry, returning how many were removed
    pub fn reclaim_expired(&self) -> usize {
        self.reclaim_at(Instant::now())
    }

    fn is_live(&self, seen: Instant, now: Instant) -> bool {
        now.saturating_duration_since(seen) <= self.ttl
    }

    fn check_and_record_at(&self, hash: &str, now: Instant) -> bool {
        let seen_recently = |entries: &HashMap<String, Instant>| {
            entries.get(hash).is_some_and(|seen| self.is_live(*seen, now))
        };

        if seen_recently(&*self.entries.read()) {
            return false;
        }

        let mut entries = self.entries.write();
        // Re-check: a concurrent identical event may have been recorded
        // between releasing the read lock and taking the write lock
        if seen_recently(&*entries) {
            return false;
        }
        entries.insert(hash.to_string(), now);
        true
    }

    fn reclaim_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, seen| self.is_live(*seen, now));
        before - entries.len()
    }
}

/// Middleware that silently drops events seen within the TTL
///
/// A duplicate returns [`EventResult::Dropped`] with
/// [`DropReason::Duplicate`] and never reaches `next`. A first sighting is
/// recorded before being forwarded.
///
/// # Retries
///
/// The record stays even when a later stage aborts the event. A bus that
/// retries a [retryable](crate::PipelineError::is_retryable) abort with the
/// same event inside the TTL gets `Dropped(Duplicate)` back, not a second
/// delivery attempt.
///
/// Expired entries are evicted by a background task started with
/// [`spawn_reclaimer`](Self::spawn_reclaimer). It ticks every `ttl / 2`
/// and stops on [`shutdown`](EventMiddleware::shutdown) or when the
/// middleware is dropped.
///
/// # Example
///
/// ```ignore
/// let dedup = DeduplicationMiddleware::new(DeduplicationConfig { ttl: Duration::from_secs(60) });
/// let reclaimer = dedup.spawn_reclaimer()?;
///
/// let pipeline = EventPipeline::builder().middleware(dedup).build();
/// // ...
/// pipeline.shutdown();
/// reclaimer.await?;
/// ```
pub struct DeduplicationMiddleware {
    cache: Arc<DedupCache>,
    hasher: Arc<dyn DedupHasher>,
    order: i32,
    cancel: CancellationToken,
}

impl DeduplicationMiddleware {
    pub fn new(config: DeduplicationConfig) -> Self {
        Self {
            cache: Arc::new(DedupCache::new(config.ttl)),
            hasher: Arc::new(SecondGranularityHasher),
            order: order::DEDUPLICATION,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_hasher<H: DedupHasher + 'static>(mut self, hasher: H) -> Self {
        self.hasher = Arc::new(hasher);
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn cache(&self) -> &DedupCache {
        &self.cache
    }

    /// Start the periodic eviction task on the current Tokio runtime
    pub fn spawn_reclaimer(&self) -> Result<JoinHandle<()>, TryCurrentError> {
        let handle = Handle::try_current()?;
        Ok(self.spawn_reclaimer_on(&handle))
    }

    /// Start the periodic eviction task on a specific runtime
    pub fn spawn_reclaimer_on(&self, handle: &Handle) -> JoinHandle<()> {
        let cache = Arc::clone(&self.cache);
        let cancel = self.cancel.child_token();
        let period = (cache.ttl() / 2).max(MIN_RECLAIM_PERIOD);

        handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            info!(?period, "deduplication reclaimer started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = cache.reclaim_expired();
                        if evicted > 0 {
                            debug!(
                                evicted,
                                remaining = cache.len(),
                                "reclaimed expired dedup entries"
                            );
                        }
                    }
                }
            }

            info!("deduplication reclaimer stopped");
        })
    }
}

impl EventMiddleware for DeduplicationMiddleware {
    fn name(&self) -> &str {
        "deduplication"
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn process(&self, event: &mut Event, _ctx: &EventContext, next: &mut Next<'_>) -> EventResult {
        let hash = self.hasher.hash(event);

        if !self.cache.check_and_record(&hash) {
            debug!(
                event_id = %event.id,
                event_type = %event.event_type,
                "dropping duplicate event"
            );
            return EventResult::Dropped(DropReason::Duplicate);
        }

        next(event)
    }

    fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for DeduplicationMiddleware {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
