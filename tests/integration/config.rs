use crate::*;

use std::collections::HashMap;

use fwbroker_core::config::{BrokerConfig, ConfigError, FailureIsolation, PacingConfig};

// ══════════════════════════════════════════════════════════════════════════════
//  Config file + deployment environment → running broker
// ══════════════════════════════════════════════════════════════════════════════

fn lookup<'a>(vars: &'a HashMap<&str, String>) -> impl Fn(&str) -> Option<String> + 'a {
    move |key| vars.get(key).cloned()
}

/// The deployment environment alone is enough to run the broker; the file
/// only tunes pacing.
#[tokio::test]
async fn test_environment_config_drives_the_broker() {
    let site = Site::new();
    let root = site.root();

    let mut config = BrokerConfig::from_toml(
        r#"
        [transfer]
        chunk_send_interval_ms = 1

        [supervisor]
        resubscribe_backoff_ms = 50

        [event_log]
        poll_interval_ms = 5
        "#,
    )
    .unwrap();
    let vars: HashMap<&str, String> = [
        (
            "IOTHUB_CONNECTION_STRING",
            format!("SpoolPath={}", root.join("spool").display()),
        ),
        (
            "IOTHUB_EVENT_HUB_COMPATIBLE_ENDPOINT",
            root.join("hub").display().to_string(),
        ),
        ("IOTHUB_EVENT_HUB_COMPATIBLE_PATH", "d2c".to_string()),
        (
            "STORAGE_CONNECTION_STRING",
            format!("RootPath={}", root.join("storage").display()),
        ),
        ("BLOB_CONTAINER_NAME", "firmware".to_string()),
        ("D2C_PARTITION_ID", "0".to_string()),
    ]
    .into_iter()
    .collect();
    config.apply_overrides(lookup(&vars)).unwrap();
    config.validate().unwrap();
    assert_eq!(config.event_log.partition_id.as_deref(), Some("0"));

    let mut site = site;
    site.config = config;
    let data = firmware(50);
    site.put_blob("fw.bin", &data);
    site.publish(PARTITION, update_ready("dev-1", "fw.bin", 25)).await;

    let broker = site.start();
    site.wait_for_checkpoint(PARTITION, 0).await;
    broker.stop().await;

    assert_eq!(reassemble(&site.spooled("dev-1"), "fw.bin"), data);
}

#[test]
fn test_missing_deployment_settings_are_reported() {
    let mut config = BrokerConfig::default();
    let vars: HashMap<&str, String> = [
        ("IOTHUB_CONNECTION_STRING", "SpoolPath=/tmp/spool".to_string()),
        ("IOTHUB_EVENT_HUB_COMPATIBLE_ENDPOINT", "/tmp/hub".to_string()),
        ("IOTHUB_EVENT_HUB_COMPATIBLE_PATH", "d2c".to_string()),
        ("STORAGE_CONNECTION_STRING", "RootPath=/tmp/storage".to_string()),
    ]
    .into_iter()
    .collect();
    config.apply_overrides(lookup(&vars)).unwrap();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::Missing("storage.container"))
    ));
}

#[test]
fn test_policy_switches_from_file() {
    let config = BrokerConfig::from_toml(
        r#"
        [transfer]
        failure_isolation = "fail_fast"
        pacing = { mode = "token_bucket", rate_per_minute = 6, burst = 2 }
        "#,
    )
    .unwrap();
    assert_eq!(config.transfer.failure_isolation, FailureIsolation::FailFast);
    assert_eq!(
        config.transfer.pacing,
        PacingConfig::TokenBucket {
            rate_per_minute: 6,
            burst: 2
        }
    );
    // Untouched sections keep their defaults.
    assert_eq!(config.event_log.consumer_group, "$Default");
    assert_eq!(config.supervisor.resubscribe_backoff_ms, 5_000);
}
