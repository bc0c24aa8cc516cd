use crate::*;

use fwbroker_services::EventRecord;

// ══════════════════════════════════════════════════════════════════════════════
//  Event → chunked transfer → device spool
// ══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_update_ready_event_delivers_every_chunk() {
    let site = Site::new();
    let data = firmware(2500);
    site.put_blob("fw.bin", &data);
    site.publish(PARTITION, update_ready("dev-1", "fw.bin", 1024)).await;

    let broker = site.start();
    site.wait_for_checkpoint(PARTITION, 0).await;
    assert_eq!(broker.stop().await, 0);

    let chunks = site.spooled("dev-1");
    assert_eq!(chunks.len(), 3);
    assert!(chunks.iter().all(|c| c.total_chunks == 3));
    assert_eq!(
        chunks.iter().map(|c| c.write_position).collect::<Vec<_>>(),
        vec![0, 1024, 2048]
    );
    assert_eq!(reassemble(&chunks, "fw.bin"), data);
}

#[tokio::test]
async fn test_message_ids_name_the_spool_files() {
    let site = Site::new();
    site.put_blob("fw.bin", &firmware(2048));
    site.publish(PARTITION, update_ready("dev-1", "fw.bin", 1024)).await;

    let broker = site.start();
    site.wait_for_checkpoint(PARTITION, 0).await;
    broker.stop().await;

    let mut names: Vec<_> = std::fs::read_dir(site.spool_dir("dev-1"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["fw.bin_0.json", "fw.bin_1.json"]);
}

#[tokio::test]
async fn test_blob_in_subdirectory() {
    let site = Site::new();
    let data = firmware(300);
    site.put_blob("releases/v2/fw.bin", &data);
    site.publish(PARTITION, update_ready("dev-1", "releases/v2/fw.bin", 128)).await;

    let broker = site.start();
    site.wait_for_checkpoint(PARTITION, 0).await;
    broker.stop().await;

    let chunks = site.spooled("dev-1");
    assert_eq!(chunks.len(), 3);
    assert_eq!(reassemble(&chunks, "releases/v2/fw.bin"), data);
}

#[tokio::test]
async fn test_empty_blob_sends_nothing() {
    let site = Site::new();
    site.put_blob("empty.bin", b"");
    site.publish(PARTITION, update_ready("dev-1", "empty.bin", 1024)).await;

    let broker = site.start();
    site.wait_for_checkpoint(PARTITION, 0).await;
    broker.stop().await;

    assert!(site.spooled("dev-1").is_empty());
}

#[tokio::test]
async fn test_unrelated_and_malformed_events_are_skipped_and_checkpointed() {
    let site = Site::new();
    site.put_blob("fw.bin", &firmware(10));
    site.publish(PARTITION, EventRecord::new(r#"{"event_type":"Other"}"#)).await;
    site.publish_raw(PARTITION, "this is not a record");
    site.publish(PARTITION, EventRecord::new("{broken json")).await;
    site.publish(
        PARTITION,
        EventRecord::new(r#"{"event_type":"FirmwareUpdateReady","filename":"fw.bin"}"#)
            .with_property("device_id", "dev-1"),
    )
    .await;
    site.publish(PARTITION, update_ready("dev-2", "fw.bin", 4)).await;

    let broker = site.start();
    site.wait_for_checkpoint(PARTITION, 4).await;
    assert_eq!(broker.stop().await, 0);

    assert!(site.spooled("dev-1").is_empty());
    assert_eq!(site.spooled("dev-2").len(), 3);
}

#[tokio::test]
async fn test_failed_transfer_does_not_block_the_next_event() {
    let site = Site::new();
    site.put_blob("fw.bin", &firmware(64));
    site.publish(PARTITION, update_ready("dev-1", "missing.bin", 16)).await;
    site.publish(PARTITION, update_ready("dev-2", "fw.bin", 16)).await;

    let broker = site.start();
    site.wait_for_checkpoint(PARTITION, 1).await;
    assert_eq!(broker.stop().await, 0);

    assert!(site.spooled("dev-1").is_empty());
    assert_eq!(site.spooled("dev-2").len(), 4);
}

#[tokio::test]
async fn test_oversize_chunk_aborts_at_first_chunk() {
    let mut site = Site::new();
    site.config.hub.connection_string = format!(
        "SpoolPath={};MaxMessageBytes=512",
        site.root().join("spool").display()
    );
    // Hex doubles the payload: 1024-byte chunks cannot fit in 512 bytes.
    site.put_blob("fw.bin", &firmware(4096));
    site.publish(PARTITION, update_ready("dev-1", "fw.bin", 1024)).await;
    site.publish(PARTITION, update_ready("dev-1", "fw.bin", 64)).await;

    let broker = site.start();
    site.wait_for_checkpoint(PARTITION, 1).await;
    broker.stop().await;

    let chunks = site.spooled("dev-1");
    assert_eq!(chunks.len(), 64);
    assert!(chunks.iter().all(|c| c.total_chunks == 64));
}

#[tokio::test]
async fn test_unregistered_device_is_rejected() {
    let mut site = Site::new();
    site.config.hub.connection_string = format!(
        "SpoolPath={};RequireRegistered=true",
        site.root().join("spool").display()
    );
    site.put_blob("fw.bin", &firmware(32));
    std::fs::create_dir_all(site.spool_dir("known")).unwrap();
    site.publish(PARTITION, update_ready("ghost", "fw.bin", 16)).await;
    site.publish(PARTITION, update_ready("known", "fw.bin", 16)).await;

    let broker = site.start();
    site.wait_for_checkpoint(PARTITION, 1).await;
    broker.stop().await;

    assert!(!site.spool_dir("ghost").exists());
    assert_eq!(site.spooled("known").len(), 2);
}

#[tokio::test]
async fn test_all_partitions_are_consumed() {
    let site = Site::new();
    site.put_blob("fw.bin", &firmware(20));
    site.publish("0", update_ready("dev-0", "fw.bin", 10)).await;
    site.publish("1", update_ready("dev-1", "fw.bin", 10)).await;

    let broker = site.start();
    site.wait_for_checkpoint("0", 0).await;
    site.wait_for_checkpoint("1", 0).await;
    broker.stop().await;

    assert_eq!(site.spooled("dev-0").len(), 2);
    assert_eq!(site.spooled("dev-1").len(), 2);
}

#[tokio::test]
async fn test_partition_restriction() {
    let mut site = Site::new();
    site.config.event_log.partition_id = Some("1".into());
    site.put_blob("fw.bin", &firmware(20));
    site.publish("0", update_ready("dev-0", "fw.bin", 10)).await;
    site.publish("1", update_ready("dev-1", "fw.bin", 10)).await;

    let broker = site.start();
    site.wait_for_checkpoint("1", 0).await;
    broker.stop().await;

    assert!(site.spooled("dev-0").is_empty());
    assert_eq!(site.spooled("dev-1").len(), 2);
    assert_eq!(site.checkpoint("0").await, None);
}

#[tokio::test]
async fn test_events_published_while_running_are_picked_up() {
    let site = Site::new();
    site.put_blob("fw.bin", &firmware(10));
    site.publish(PARTITION, EventRecord::new(r#"{"event_type":"Heartbeat"}"#)).await;

    let broker = site.start();
    site.wait_for_checkpoint(PARTITION, 0).await;
    site.publish(PARTITION, update_ready("dev-1", "fw.bin", 5)).await;
    site.wait_for_checkpoint(PARTITION, 1).await;
    broker.stop().await;

    assert_eq!(site.spooled("dev-1").len(), 2);
}
