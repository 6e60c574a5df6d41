#![cfg(feature = "middleware")]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{RecordingMiddleware, execution_log, init_tracing, order_created};
use event_pipeline::middleware::enrichment::{EnrichmentMiddleware, FnEnricher};
use event_pipeline::middleware::filtering::{EventFilter, FilterMode, FilteringMiddleware};
use event_pipeline::middleware::validation::{RequiredFieldsValidator, ValidationMiddleware};
use event_pipeline::{
    DropReason, Event, EventContext, EventPipeline, EventResult, PipelineError,
};
use tokio_util::sync::CancellationToken;

#[test]
fn stages_run_in_ascending_order_regardless_of_registration() {
    init_tracing();
    let log = execution_log();

    let pipeline = EventPipeline::builder()
        .middleware(RecordingMiddleware::new("circuit_breaker", 500, &log))
        .middleware(RecordingMiddleware::new("transformation", 400, &log))
        .middleware(RecordingMiddleware::new("filtering", 300, &log))
        .middleware(RecordingMiddleware::new("deduplication", 250, &log))
        .middleware(RecordingMiddleware::new("enrichment", 200, &log))
        .middleware(RecordingMiddleware::new("rate_limit", 150, &log))
        .middleware(RecordingMiddleware::new("validation", 100, &log))
        .middleware(RecordingMiddleware::new("security", 50, &log))
        .build();

    let result = pipeline.process(order_created(), &EventContext::new(), |_| {
        log.lock().push("deliver".to_string());
        Ok(())
    });

    assert_eq!(result, EventResult::Delivered);
    assert_eq!(
        *log.lock(),
        vec![
            "security",
            "validation",
            "rate_limit",
            "enrichment",
            "deduplication",
            "filtering",
            "transformation",
            "circuit_breaker",
            "deliver",
        ]
    );
    assert_eq!(pipeline.stage_names()[0], "security");
}

#[test]
fn equal_orders_keep_registration_order() {
    let log = execution_log();
    let pipeline = EventPipeline::builder()
        .middleware(RecordingMiddleware::new("first", 10, &log))
        .middleware(RecordingMiddleware::new("second", 10, &log))
        .middleware(RecordingMiddleware::new("early", 5, &log))
        .build();

    assert_eq!(pipeline.stage_names(), vec!["early", "first", "second"]);
}

#[test]
fn empty_pipeline_delivers_directly() {
    let pipeline = EventPipeline::builder().build();
    let delivered = AtomicUsize::new(0);

    let result = pipeline.process(order_created(), &EventContext::new(), |_| {
        delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    assert!(pipeline.is_empty());
    assert!(result.is_delivered());
    assert_eq!(delivered.load(Ordering::SeqCst), 1);
}

#[test]
fn abort_stops_later_stages_and_delivery() {
    let log = execution_log();
    let pipeline = EventPipeline::builder()
        .middleware(RecordingMiddleware::new("later", 200, &log))
        .middleware(ValidationMiddleware::new().validator(RequiredFieldsValidator::new()))
        .build();

    let result = pipeline.process(Event::new("", "svc-a"), &EventContext::new(), |_| {
        panic!("must not deliver an invalid event")
    });

    assert!(result.is_aborted());
    assert_eq!(result.error().map(PipelineError::stage), Some("validation"));
    assert!(log.lock().is_empty());
}

#[test]
fn silent_drop_is_not_an_error() {
    let pipeline = EventPipeline::builder()
        .middleware(
            FilteringMiddleware::new(FilterMode::Include)
                .filter(EventFilter::new().event_types(["order.paid"])),
        )
        .build();

    let result = pipeline.process(order_created(), &EventContext::new(), |_| Ok(()));

    assert_eq!(result, EventResult::Dropped(DropReason::Filtered));
    assert!(result.error().is_none());
    assert!(result.clone().into_result().is_ok());
}

#[test]
fn exactly_one_outcome_per_event() {
    let pipeline = EventPipeline::builder()
        .middleware(ValidationMiddleware::new().validator(RequiredFieldsValidator::new()))
        .middleware(
            FilteringMiddleware::new(FilterMode::Exclude)
                .filter(EventFilter::new().sources(["noisy"])),
        )
        .build();

    let events = [
        order_created(),
        Event::new("order.created", "noisy"),
        Event::new("", "svc-a"),
    ];

    let mut delivered = 0;
    let results: Vec<_> = events
        .into_iter()
        .map(|event| {
            pipeline.process(event, &EventContext::new(), |_| {
                delivered += 1;
                Ok(())
            })
        })
        .collect();

    for result in &results {
        let outcomes = [result.is_delivered(), result.is_dropped(), result.is_aborted()];
        assert_eq!(outcomes.iter().filter(|o| **o).count(), 1);
    }
    assert!(results[0].is_delivered());
    assert!(results[1].is_dropped());
    assert!(results[2].is_aborted());
    assert_eq!(delivered, 1);
}

#[test]
fn enrichment_failure_still_forwards_with_other_enrichers_applied() {
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = |name: &'static str, priority: i32| {
        let ran = Arc::clone(&ran);
        FnEnricher::new(name, priority, move |event: &mut Event| {
            ran.fetch_add(1, Ordering::SeqCst);
            event.set_metadata(name, true);
            Ok(())
        })
    };

    let pipeline = EventPipeline::builder()
        .middleware(
            EnrichmentMiddleware::new()
                .enricher(counter("region", 1))
                .enricher(FnEnricher::new("broken", 2, |_: &mut Event| {
                    Err("directory unavailable".into())
                }))
                .enricher(counter("tenant", 3)),
        )
        .build();

    let mut seen = None;
    let result = pipeline.process(order_created(), &EventContext::new(), |event| {
        seen = Some(event.clone());
        Ok(())
    });

    assert!(result.is_delivered());
    assert_eq!(ran.load(Ordering::SeqCst), 2);
    let seen = seen.expect("event delivered");
    assert!(seen.metadata_flag("region"));
    assert!(seen.metadata_flag("tenant"));
    assert!(seen.metadata("broken").is_none());
}

#[test]
fn delivery_error_comes_back_as_abort() {
    let pipeline = EventPipeline::builder().build();

    let result = pipeline.process(order_created(), &EventContext::new(), |_| {
        Err(PipelineError::delivery("subscriber timed out"))
    });

    assert_eq!(
        result,
        EventResult::Aborted(PipelineError::delivery("subscriber timed out"))
    );
    assert!(result.error().is_some_and(PipelineError::is_retryable));
}

#[test]
fn cancelled_context_aborts_before_any_stage() {
    let log = execution_log();
    let pipeline = EventPipeline::builder()
        .middleware(RecordingMiddleware::new("only", 1, &log))
        .build();

    let token = CancellationToken::new();
    token.cancel();
    let ctx = EventContext::with_cancellation(token);

    let result = pipeline.process(order_created(), &ctx, |_| panic!("must not deliver"));

    assert_eq!(result, EventResult::Aborted(PipelineError::Cancelled));
    assert!(log.lock().is_empty());
}
