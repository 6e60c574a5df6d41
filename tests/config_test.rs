#![cfg(feature = "middleware")]

use std::time::Duration;

use event_pipeline::middleware::circuit_breaker::CircuitBreakerConfig;
use event_pipeline::middleware::deduplication::DeduplicationConfig;
use event_pipeline::middleware::filtering::FilterMode;
use event_pipeline::middleware::rate_limit::{BucketConfig, RateLimitConfig};
use event_pipeline::middleware::security::SecurityPolicy;
use event_pipeline::{Event, EventPriority};
use serde_json::json;

#[test]
fn rate_limit_config_from_json() {
    let config: RateLimitConfig = serde_json::from_value(json!({
        "default": { "capacity": 20, "refill_rate": 2.5 },
        "per_key": {
            "svc-noisy": { "capacity": 1, "refill_rate": 0.5 }
        }
    }))
    .unwrap();

    assert_eq!(
        config.bucket_for("svc-a"),
        BucketConfig {
            capacity: 20,
            refill_rate: 2.5
        }
    );
    assert_eq!(config.bucket_for("svc-noisy").capacity, 1);
}

#[test]
fn missing_rate_limit_sections_fall_back_to_defaults() {
    let config: RateLimitConfig = serde_json::from_value(json!({})).unwrap();
    assert_eq!(config, RateLimitConfig::default());
    assert_eq!(config.bucket_for("anything").capacity, 100);
}

#[test]
fn circuit_breaker_config_round_trips_durations() {
    let config =
        CircuitBreakerConfig::new(3, Duration::from_millis(1500)).with_success_threshold(1);
    let value = serde_json::to_value(&config).unwrap();

    assert_eq!(value["reset_timeout"], json!({ "secs": 1, "nanos": 500_000_000 }));

    let parsed: CircuitBreakerConfig = serde_json::from_value(value).unwrap();
    assert_eq!(parsed, config);
    assert_eq!(parsed.success_threshold, 1);
}

#[test]
fn dedup_config_from_json() {
    let config: DeduplicationConfig =
        serde_json::from_value(json!({ "ttl": { "secs": 5, "nanos": 0 } })).unwrap();
    assert_eq!(config.ttl, Duration::from_secs(5));
}

#[test]
fn security_policy_defaults_fill_missing_fields() {
    let policy: SecurityPolicy =
        serde_json::from_value(json!({ "sensitive_types": ["payment.captured"] })).unwrap();

    assert!(policy.require_encryption);
    assert_eq!(policy.encrypted_flag, "encrypted");
    assert!(policy.sensitive_types.contains("payment.captured"));
}

#[test]
fn filter_mode_is_lowercase() {
    let mode: FilterMode = serde_json::from_value(json!("exclude")).unwrap();
    assert_eq!(mode, FilterMode::Exclude);
    assert_eq!(serde_json::to_value(FilterMode::Include).unwrap(), json!("include"));
}

#[test]
fn event_wire_format() {
    let event: Event = serde_json::from_value(json!({
        "id": "evt-1",
        "type": "order.created",
        "source": "svc-a",
        "target": "billing",
        "priority": "high",
        "timestamp": "2023-11-14T22:13:20Z",
        "metadata": { "encrypted": true, "amount": 42 }
    }))
    .unwrap();

    assert_eq!(event.id, "evt-1");
    assert_eq!(event.event_type, "order.created");
    assert_eq!(event.priority, EventPriority::High);
    assert_eq!(event.timestamp.timestamp(), 1_700_000_000);
    assert!(event.metadata_flag("encrypted"));
    assert_eq!(event.metadata("amount"), Some(&json!(42)));

    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], "order.created");
    assert_eq!(value["priority"], "high");
}
