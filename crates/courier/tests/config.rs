use courier::{CourierConfig, CourierError};
use std::fs;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("write config file");
    path
}

#[test]
fn loads_producer_and_groups_from_toml() {
    let dir = TempDir::new().expect("tempdir");
    let path = write(
        &dir,
        "courier.toml",
        r#"
[producer]
host = "kafka.internal"
port = 29092

[[consumer_groups]]
name = "billing"
broker_address = "kafka.internal:29092"
group_id = "billing-svc"
topics = ["invoices", "refunds"]
concurrency = 4

[[consumer_groups]]
name = "mailer"
kafka_host = "kafka.internal:29092"
group_id = "mailer-svc"
topics = ["emails"]
"#,
    );

    let config = CourierConfig::load(Some(&path)).expect("config loads");

    assert_eq!(config.producer.address(), "kafka.internal:29092");
    assert_eq!(config.consumer_groups.len(), 2);

    let billing = &config.consumer_groups[0];
    assert_eq!(billing.group_id, "billing-svc");
    assert_eq!(billing.topics, vec!["invoices", "refunds"]);
    assert_eq!(billing.concurrency, 4);

    let mailer = &config.consumer_groups[1];
    assert_eq!(mailer.broker_address, "kafka.internal:29092");
    assert_eq!(mailer.concurrency, 1);
}

#[test]
fn loads_json_and_fills_producer_defaults() {
    let dir = TempDir::new().expect("tempdir");
    let path = write(
        &dir,
        "courier.json",
        r#"{ "consumer_groups": [
            { "name": "audit", "broker_address": "localhost:9092", "group_id": "audit", "topics": ["events"] }
        ] }"#,
    );

    let config = CourierConfig::load(Some(&path)).expect("config loads");

    assert_eq!(config.producer.address(), "localhost:9092");
    assert_eq!(config.consumer_groups[0].name, "audit");
}

#[test]
fn missing_file_is_a_config_error() {
    let dir = TempDir::new().expect("tempdir");

    let err = CourierConfig::load(Some(dir.path().join("absent.toml"))).unwrap_err();

    assert!(matches!(err, CourierError::Config { .. }));
    assert!(err.to_string().contains("Failed to build config"));
}

#[test]
fn invalid_groups_fail_validation() {
    let dir = TempDir::new().expect("tempdir");
    let path = write(
        &dir,
        "courier.toml",
        r#"
[[consumer_groups]]
name = "audit"
broker_address = "localhost:9092"
group_id = "audit"
topics = ["events"]

[[consumer_groups]]
name = "audit"
broker_address = "localhost:9092"
group_id = "audit-2"
topics = ["events"]
"#,
    );

    let err = CourierConfig::load(Some(&path)).unwrap_err();

    assert!(matches!(err, CourierError::InvalidConfiguration { .. }));
    assert!(err.to_string().contains("declared twice"));
}
