#![cfg(feature = "middleware")]

mod common;

use std::sync::Arc;
use std::sync::Barrier;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use common::init_tracing;
use event_pipeline::middleware::circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerMiddleware, CircuitState,
};
use event_pipeline::middleware::deduplication::{DeduplicationConfig, DeduplicationMiddleware};
use event_pipeline::middleware::rate_limit::{RateLimitConfig, RateLimitMiddleware};
use event_pipeline::{DropReason, Event, EventContext, EventPipeline, EventResult, PipelineError};

const THREADS: usize = 16;

/// Run `process` once per thread, all released together
fn race<F>(pipeline: &Arc<EventPipeline>, make_event: F) -> (Vec<EventResult>, usize)
where
    F: Fn(usize) -> Event + Send + Sync + Copy + 'static,
{
    let barrier = Arc::new(Barrier::new(THREADS));
    let delivered = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let pipeline = Arc::clone(pipeline);
            let barrier = Arc::clone(&barrier);
            let delivered = Arc::clone(&delivered);
            thread::spawn(move || {
                barrier.wait();
                pipeline.process(make_event(i), &EventContext::new(), |_| {
                    delivered.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
        })
        .collect();

    let results = handles
        .into_iter()
        .map(|h| h.join().expect("worker panicked"))
        .collect();
    (results, delivered.load(Ordering::SeqCst))
}

fn identical_event(_: usize) -> Event {
    let ts = Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid timestamp");
    Event::new("order.created", "svc-a")
        .with_target("billing")
        .with_timestamp(ts)
}

#[test]
fn identical_events_across_threads_are_forwarded_once() {
    init_tracing();
    let pipeline = Arc::new(
        EventPipeline::builder()
            .middleware(DeduplicationMiddleware::new(DeduplicationConfig::default()))
            .build(),
    );

    let (results, delivered) = race(&pipeline, identical_event);

    assert_eq!(delivered, 1);
    assert_eq!(results.iter().filter(|r| r.is_delivered()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| **r == EventResult::Dropped(DropReason::Duplicate))
            .count(),
        THREADS - 1
    );
}

#[test]
fn shared_bucket_admits_exactly_its_capacity() {
    let pipeline = Arc::new(
        EventPipeline::builder()
            .middleware(RateLimitMiddleware::new(RateLimitConfig::new(10, 0.0)))
            .build(),
    );

    let (results, delivered) = race(&pipeline, |_| Event::new("tick", "svc-a"));

    assert_eq!(delivered, 10);
    let limited = results
        .iter()
        .filter(|r| matches!(r, EventResult::Aborted(PipelineError::RateLimited { .. })))
        .count();
    assert_eq!(limited, THREADS - 10);
}

#[test]
fn distinct_keys_get_independent_buckets() {
    let limiter = Arc::new(RateLimitMiddleware::new(RateLimitConfig::new(1, 0.0)));
    let pipeline = Arc::new(
        EventPipeline::builder()
            .middleware(Arc::clone(&limiter))
            .build(),
    );

    let (_, delivered) = race(&pipeline, |i| Event::new("tick", format!("svc-{i}")));

    assert_eq!(delivered, THREADS);
    assert_eq!(limiter.tracked_keys(), THREADS);
}

#[test]
fn concurrent_failures_open_the_circuit_once() {
    let breaker = Arc::new(CircuitBreakerMiddleware::new(CircuitBreakerConfig::new(
        4,
        Duration::from_secs(30),
    )));
    let pipeline = Arc::new(
        EventPipeline::builder()
            .middleware(Arc::clone(&breaker))
            .build(),
    );
    let failures = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            let failures = Arc::clone(&failures);
            thread::spawn(move || {
                let event = Event::new("invoice.sent", "svc-a").with_target("mailer");
                pipeline.process(event, &EventContext::new(), |_| {
                    failures.fetch_add(1, Ordering::SeqCst);
                    Err(PipelineError::delivery("smtp down"))
                })
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().expect("worker panicked").is_aborted());
    }

    assert_eq!(breaker.state("mailer"), Some(CircuitState::Open));
    // At least the threshold reached delivery; the rest may have been
    // rejected once the circuit opened
    assert!(failures.load(Ordering::SeqCst) >= 4);
}
