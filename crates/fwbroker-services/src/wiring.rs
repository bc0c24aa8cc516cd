//! Builds the broker from its config: local backends from the connection
//! strings, then engine → dispatcher → consumer → supervisor.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use fwbroker_core::config::BrokerConfig;

use crate::blob::FsBlobStore;
use crate::channel::SpoolChannel;
use crate::checkpoint::FileCheckpointStore;
use crate::consumer::StreamConsumer;
use crate::dispatch::EventDispatcher;
use crate::engine::TransferEngine;
use crate::event_log::JsonlEventLog;
use crate::fsutil::validate_segment;
use crate::pacing;
use crate::supervisor::Supervisor;

/// Filesystem-backed collaborators.
pub struct LocalBackends {
    pub blobs: FsBlobStore,
    pub channel: SpoolChannel,
    pub events: JsonlEventLog,
    pub checkpoints: FileCheckpointStore,
}

impl LocalBackends {
    /// Resolve every backend location from a validated config.
    ///
    /// Storage: `RootPath=<dir>`; blobs live in `<dir>/<container>`,
    /// checkpoints below it. Hub: `SpoolPath=<dir>`.
    pub fn from_config(config: &BrokerConfig) -> Result<Self> {
        let storage = config.storage_connection()?;
        let root = PathBuf::from(
            storage
                .require("RootPath")
                .context("storage connection string")?,
        );
        validate_segment(&config.storage.container).context("storage.container")?;
        let container = root.join(&config.storage.container);

        let hub = config.hub_connection()?;
        let channel = SpoolChannel::from_connection(&hub).context("hub connection string")?;

        let events = JsonlEventLog::from_endpoint(
            &config.event_log.endpoint,
            &config.event_log.path,
            config.event_log.poll_interval(),
        )
        .context("event_log.path")?;

        let checkpoints = FileCheckpointStore::for_group(
            &container,
            &config.event_log.path,
            &config.event_log.consumer_group,
        )
        .context("checkpoint location")?;

        Ok(Self {
            blobs: FsBlobStore::new(container),
            channel,
            events,
            checkpoints,
        })
    }
}

/// Assemble the supervised subscription.
pub fn supervisor(config: &BrokerConfig, backends: LocalBackends) -> Supervisor {
    let pacer = Arc::from(pacing::from_config(&config.transfer));
    let engine = TransferEngine::new(Arc::new(backends.blobs), Arc::new(backends.channel), pacer);
    let dispatcher = EventDispatcher::new(Arc::new(engine), config.transfer.failure_isolation);
    let consumer = StreamConsumer::new(
        Arc::new(backends.events),
        Arc::new(backends.checkpoints),
        Arc::new(dispatcher),
        config.event_log.partition_id.clone(),
    );
    Supervisor::new(consumer, config.supervisor.resubscribe_backoff())
}
