use crate::*;

use fwbroker_core::config::FailureIsolation;

// ══════════════════════════════════════════════════════════════════════════════
//  Checkpoints, restarts and fail-fast resubscription
// ══════════════════════════════════════════════════════════════════════════════

/// A restarted broker resumes after the last checkpoint instead of
/// replaying the partition.
#[tokio::test]
async fn test_restart_resumes_after_checkpoint() {
    let site = Site::new();
    site.put_blob("fw.bin", &firmware(40));
    site.publish(PARTITION, update_ready("dev-1", "fw.bin", 10)).await;

    let broker = site.start();
    site.wait_for_checkpoint(PARTITION, 0).await;
    broker.stop().await;
    assert_eq!(site.spooled("dev-1").len(), 4);

    // Clear the spool so any re-send would show up.
    std::fs::remove_dir_all(site.spool_dir("dev-1")).unwrap();
    site.publish(PARTITION, update_ready("dev-2", "fw.bin", 20)).await;

    let broker = site.start();
    site.wait_for_checkpoint(PARTITION, 1).await;
    broker.stop().await;

    assert!(site.spooled("dev-1").is_empty());
    assert_eq!(site.spooled("dev-2").len(), 2);
}

/// Losing the checkpoint redelivers the event and the whole file is sent
/// again under the same message ids.
#[tokio::test]
async fn test_lost_checkpoint_resends_whole_file() {
    let site = Site::new();
    let data = firmware(30);
    site.put_blob("fw.bin", &data);
    site.publish(PARTITION, update_ready("dev-1", "fw.bin", 10)).await;

    let broker = site.start();
    site.wait_for_checkpoint(PARTITION, 0).await;
    broker.stop().await;

    let checkpoint_dir = site.backends().checkpoints.root().to_path_buf();
    std::fs::remove_dir_all(&checkpoint_dir).unwrap();
    std::fs::remove_dir_all(site.spool_dir("dev-1")).unwrap();

    let broker = site.start();
    site.wait_for_checkpoint(PARTITION, 0).await;
    broker.stop().await;

    let chunks = site.spooled("dev-1");
    assert_eq!(chunks.len(), 3);
    assert_eq!(reassemble(&chunks, "fw.bin"), data);
}

/// Under fail-fast a failing event tears the subscription down, but it was
/// checkpointed first, so the resubscribed broker moves on past it.
#[tokio::test]
async fn test_fail_fast_resubscribes_past_failed_event() {
    let mut site = Site::new();
    site.config.transfer.failure_isolation = FailureIsolation::FailFast;
    site.put_blob("fw.bin", &firmware(16));
    site.publish(PARTITION, update_ready("dev-1", "missing.bin", 8)).await;
    site.publish(PARTITION, update_ready("dev-2", "fw.bin", 8)).await;

    let broker = site.start();
    site.wait_for_checkpoint(PARTITION, 1).await;
    assert_eq!(broker.stop().await, 1);

    assert!(site.spooled("dev-1").is_empty());
    assert_eq!(site.spooled("dev-2").len(), 2);
}

/// A subscription with nothing to subscribe to keeps retrying until
/// partitions appear.
#[tokio::test]
async fn test_retries_until_partitions_appear() {
    let site = Site::new();
    site.put_blob("fw.bin", &firmware(8));

    let broker = site.start();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    site.publish(PARTITION, update_ready("dev-1", "fw.bin", 8)).await;
    site.wait_for_checkpoint(PARTITION, 0).await;

    assert!(broker.stop().await >= 1);
    assert_eq!(site.spooled("dev-1").len(), 1);
}
