/// Order Pipeline Demonstration
///
/// Wires every built-in middleware in front of a toy event bus and pushes a
/// handful of order events through it. Run with:
///
///     RUST_LOG=event_pipeline=debug cargo run --example order_pipeline
use std::sync::Arc;
use std::time::Duration;

use event_pipeline::middleware::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerMiddleware};
use event_pipeline::middleware::deduplication::{DeduplicationConfig, DeduplicationMiddleware};
use event_pipeline::middleware::enrichment::{
    EnrichmentMiddleware, ProcessedAtEnricher, StaticMetadataEnricher,
};
use event_pipeline::middleware::filtering::{EventFilter, FilterMode, FilteringMiddleware};
use event_pipeline::middleware::rate_limit::{RateLimitConfig, RateLimitMiddleware};
use event_pipeline::middleware::security::{
    ControlCharacterCheck, RequiredMetadataCheck, SecurityMiddleware, SecurityPolicy,
};
use event_pipeline::middleware::transformation::{
    MetadataRenameTransformer, PriorityOverrideTransformer, TransformationMiddleware,
};
use event_pipeline::middleware::validation::{
    AllowedTypesValidator, RequiredFieldsValidator, ValidationMiddleware,
};
use event_pipeline::{
    Event, EventContext, EventPipeline, EventPriority, EventResult, PipelineError,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ============================================================================
// A TOY BUS
// ============================================================================

/// Subscriber registry standing in for the real bus; "legacy-erp" is down
struct ToyBus;

impl ToyBus {
    fn dispatch(&self, event: &Event) -> Result<(), PipelineError> {
        if event.target == "legacy-erp" {
            return Err(PipelineError::delivery("legacy-erp connection refused"));
        }
        println!(
            "      [BUS] {} -> {} ({} priority, {} metadata keys)",
            event.event_type,
            event.target,
            event.priority,
            event.metadata.len()
        );
        Ok(())
    }
}

fn order(event_type: &str, target: &str) -> Event {
    Event::new(event_type, "checkout")
        .with_target(target)
        .with_metadata("auth_token", "demo-token")
        .with_metadata("region", "eu-west-1")
}

fn report(label: &str, result: &EventResult) {
    match result {
        EventResult::Delivered => println!("   [OK]   {label}"),
        EventResult::Dropped(reason) => println!("   [DROP] {label}: {reason}"),
        EventResult::Aborted(err) if err.is_retryable() => {
            println!("   [RETRY] {label}: {err}")
        }
        EventResult::Aborted(err) => println!("   [DEAD] {label}: {err}"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Replays carry the original id; fresh publishes get a new one
    let dedup = Arc::new(
        DeduplicationMiddleware::new(DeduplicationConfig {
            ttl: Duration::from_secs(2),
        })
        .with_hasher(|event: &Event| event.id.clone()),
    );
    let reclaimer = dedup.spawn_reclaimer()?;

    let breaker = Arc::new(CircuitBreakerMiddleware::new(
        CircuitBreakerConfig::new(2, Duration::from_millis(300)).with_success_threshold(1),
    ));

    let pipeline = EventPipeline::builder()
        .middleware(
            SecurityMiddleware::new(SecurityPolicy::sensitive(["payment.captured"]))
                .check(RequiredMetadataCheck::new("auth_token"))
                .check(ControlCharacterCheck),
        )
        .middleware(
            ValidationMiddleware::new()
                .validator(RequiredFieldsValidator::new().require_target())
                .validator(AllowedTypesValidator::new([
                    "order.created",
                    "order.paid",
                    "payment.captured",
                    "heartbeat",
                ])),
        )
        .middleware(RateLimitMiddleware::new(RateLimitConfig::new(20, 5.0)))
        .middleware(
            EnrichmentMiddleware::new()
                .enricher(ProcessedAtEnricher)
                .enricher(StaticMetadataEnricher::new("pipeline", "orders-v1").with_priority(-10)),
        )
        .middleware(Arc::clone(&dedup))
        .middleware(
            FilteringMiddleware::new(FilterMode::Exclude)
                .filter(EventFilter::new().event_types(["heartbeat"])),
        )
        .middleware(
            TransformationMiddleware::new()
                .transformer(MetadataRenameTransformer::new("region", "origin_region"))
                .transformer(PriorityOverrideTransformer::new(
                    ["payment.captured"],
                    EventPriority::Critical,
                )),
        )
        .middleware(Arc::clone(&breaker))
        .build();

    info!(stages = ?pipeline.stage_names(), "pipeline ready");

    let bus = ToyBus;
    let ctx = EventContext::new();
    let publish = |label: &str, event: Event| {
        let result = pipeline.process(event, &ctx, |event| bus.dispatch(event));
        report(label, &result);
    };

    println!("\n=== Normal traffic ===");
    let created = order("order.created", "billing");
    publish("order created", created.clone());
    publish("same order replayed", created);
    publish("heartbeat", order("heartbeat", "billing"));

    println!("\n=== Security ===");
    publish("unencrypted payment", order("payment.captured", "ledger"));
    publish(
        "encrypted payment",
        order("payment.captured", "ledger").with_metadata("encrypted", true),
    );
    publish("anonymous order", Event::new("order.paid", "checkout").with_target("billing"));

    println!("\n=== Validation ===");
    publish("unknown type", order("order.teleported", "billing"));

    println!("\n=== Failing target ===");
    for attempt in 1..=3 {
        publish(&format!("erp sync #{attempt}"), order("order.paid", "legacy-erp"));
    }
    publish("billing unaffected", order("order.paid", "billing"));

    tokio::time::sleep(Duration::from_millis(400)).await;
    println!("\n=== After reset timeout ===");
    publish("erp probe", order("order.paid", "legacy-erp"));
    println!("   erp circuit: {:?}", breaker.state("legacy-erp"));

    pipeline.shutdown();
    reclaimer.await?;
    Ok(())
}
