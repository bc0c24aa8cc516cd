//! fwbroker integration test harness.
//!
//! Every test gets its own scratch site: a JSONL event log, a blob
//! container, a device spool and file checkpoints, all under one temp dir,
//! wired together exactly the way fwbrokerd does it.
//!
//!   cargo test --test integration

mod config;
mod pipeline;
mod recovery;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use fwbroker_core::config::BrokerConfig;
use fwbroker_core::ChunkMessage;
use fwbroker_services::{wiring, CheckpointStore, EventRecord, LocalBackends};

// ── Harness ───────────────────────────────────────────────────────────────────

pub const PARTITION: &str = "0";

pub struct Site {
    dir: TempDir,
    pub config: BrokerConfig,
}

impl Site {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("scratch dir");
        let root = dir.path();

        let mut config = BrokerConfig::default();
        config.hub.connection_string = format!("SpoolPath={}", root.join("spool").display());
        config.event_log.endpoint = format!("file://{}", root.join("hub").display());
        config.event_log.path = "d2c".into();
        config.event_log.poll_interval_ms = 5;
        config.storage.connection_string = format!("RootPath={}", root.join("storage").display());
        config.storage.container = "firmware".into();
        config.transfer.chunk_send_interval_ms = 0;
        config.supervisor.resubscribe_backoff_ms = 50;
        config.validate().expect("harness config is complete");

        std::fs::create_dir_all(root.join("hub/d2c")).expect("event log dir");
        std::fs::create_dir_all(root.join("storage/firmware")).expect("container dir");
        Self { dir, config }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn backends(&self) -> LocalBackends {
        LocalBackends::from_config(&self.config).expect("backends")
    }

    pub fn put_blob(&self, name: &str, data: &[u8]) {
        let path = self.root().join("storage/firmware").join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, data).unwrap();
    }

    pub async fn publish(&self, partition: &str, record: EventRecord) {
        self.backends()
            .events
            .append(partition, &record)
            .await
            .expect("append event");
    }

    /// Append a raw line, bypassing the record encoder.
    pub fn publish_raw(&self, partition: &str, line: &str) {
        use std::io::Write;
        let path = self.root().join("hub/d2c").join(format!("{partition}.jsonl"));
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        writeln!(file, "{line}").unwrap();
    }

    pub fn spool_dir(&self, device_id: &str) -> PathBuf {
        self.root().join("spool").join(device_id)
    }

    /// Chunks spooled for a device, ordered by chunk index.
    pub fn spooled(&self, device_id: &str) -> Vec<ChunkMessage> {
        read_spool(&self.spool_dir(device_id)).unwrap_or_default()
    }

    pub async fn checkpoint(&self, partition: &str) -> Option<u64> {
        self.backends()
            .checkpoints
            .load(partition)
            .await
            .expect("checkpoint readable")
            .map(|p| p.sequence_number)
    }

    pub async fn wait_for_checkpoint(&self, partition: &str, seq: u64) {
        let reached = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if self.checkpoint(partition).await.is_some_and(|s| s >= seq) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(reached.is_ok(), "partition {partition} never reached seq {seq}");
    }

    pub fn start(&self) -> Broker {
        let supervisor = wiring::supervisor(&self.config, self.backends());
        let (shutdown, rx) = broadcast::channel(1);
        let handle = tokio::spawn(async move { supervisor.run(rx).await });
        Broker { shutdown, handle }
    }
}

fn read_spool(dir: &Path) -> Result<Vec<ChunkMessage>> {
    let mut chunks = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let message: serde_json::Value = serde_json::from_slice(&std::fs::read(&path)?)?;
        let body = message["body"]
            .as_str()
            .with_context(|| format!("{} has no body", path.display()))?;
        chunks.push(serde_json::from_str::<ChunkMessage>(body)?);
    }
    chunks.sort_by(|a, b| (&a.filename, a.chunk_index).cmp(&(&b.filename, b.chunk_index)));
    Ok(chunks)
}

/// Reassemble a file from its spooled chunks.
pub fn reassemble(chunks: &[ChunkMessage], filename: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in chunks.iter().filter(|c| c.filename == filename) {
        assert_eq!(
            chunk.write_position as usize,
            out.len(),
            "gap before chunk {}",
            chunk.chunk_index
        );
        out.extend_from_slice(&chunk.data);
    }
    out
}

pub fn update_ready(device_id: &str, filename: &str, chunk_size: u64) -> EventRecord {
    EventRecord::new(
        serde_json::json!({
            "event_type": "FirmwareUpdateReady",
            "filename": filename,
            "chunk_size": chunk_size,
        })
        .to_string(),
    )
    .with_property("device_id", device_id)
}

pub struct Broker {
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<u64>,
}

impl Broker {
    /// Stop the broker; returns how many subscriptions failed.
    pub async fn stop(self) -> u64 {
        self.shutdown.send(()).expect("broker still running");
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("broker stops")
            .expect("broker task")
    }
}

pub fn firmware(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}
