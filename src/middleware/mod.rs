/// Default execution orders (lower runs first)
pub mod order {
    pub const SECURITY: i32 = 50;
    pub const VALIDATION: i32 = 100;
    pub const RATE_LIMITING: i32 = 150;
    pub const ENRICHMENT: i32 = 200;
    pub const DEDUPLICATION: i32 = 250;
    pub const FILTERING: i32 = 300;
    pub const TRANSFORMATION: i32 = 400;
    pub const CIRCUIT_BREAKER: i32 = 500;
}

/// Per-key registry shared by the rate limiter and circuit breaker
#[cfg(any(feature = "rate_limit", feature = "circuit_breaker"))]
pub mod keyed;

/// Validator chain, aborts on first failure
#[cfg(feature = "validation")]
pub mod validation;

/// Priority-ordered enrichers, continue on error
#[cfg(feature = "enrichment")]
pub mod enrichment;

/// Per-key token bucket rate limiting
#[cfg(feature = "rate_limit")]
pub mod rate_limit;

/// Include/exclude event filters
#[cfg(feature = "filtering")]
pub mod filtering;

/// Priority-ordered value rewriting, continue on error
#[cfg(feature = "transformation")]
pub mod transformation;

/// Security checks and sensitive-type encryption policy
#[cfg(feature = "security")]
pub mod security;

/// Per-key circuit breaker for fault isolation
#[cfg(feature = "circuit_breaker")]
pub mod circuit_breaker;

/// TTL-based duplicate suppression with a background reclaimer
#[cfg(feature = "deduplication")]
pub mod deduplication;
