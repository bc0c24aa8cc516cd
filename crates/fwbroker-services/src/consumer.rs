//! Stream consumer: one subscription over the event log.
//!
//! One task per partition: load checkpoint → open after it → loop
//! {next event → dispatch → save checkpoint}. Each partition handles one
//! event at a time, in order. The checkpoint for an event is written after
//! its handler returns, whether it succeeded or not.
//!
//! The first partition failure stops the subscription: the other
//! partitions finish their in-flight event and the error is returned.
//! Shutdown is honored the same way, between events only.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use crate::checkpoint::CheckpointStore;
use crate::dispatch::EventDispatcher;
use crate::event_log::EventSource;

pub struct StreamConsumer {
    source: Arc<dyn EventSource>,
    checkpoints: Arc<dyn CheckpointStore>,
    dispatcher: Arc<EventDispatcher>,
    /// Restrict the subscription to one partition.
    partition_id: Option<String>,
}

impl StreamConsumer {
    pub fn new(
        source: Arc<dyn EventSource>,
        checkpoints: Arc<dyn CheckpointStore>,
        dispatcher: Arc<EventDispatcher>,
        partition_id: Option<String>,
    ) -> Self {
        Self {
            source,
            checkpoints,
            dispatcher,
            partition_id,
        }
    }

    async fn resolve_partitions(&self) -> Result<Vec<String>> {
        if let Some(id) = &self.partition_id {
            return Ok(vec![id.clone()]);
        }
        let partitions = self
            .source
            .partitions()
            .await
            .context("listing event log partitions")?;
        if partitions.is_empty() {
            bail!(crate::event_log::StreamError::NoPartitions);
        }
        Ok(partitions)
    }

    /// Run one subscription.
    ///
    /// Returns `Ok` once a shutdown signal has been received and every
    /// partition has stopped, `Err` when the subscription failed.
    pub async fn run(&self, shutdown: &mut broadcast::Receiver<()>) -> Result<()> {
        let partitions = tokio::select! {
            biased;
            _ = shutdown.recv() => return Ok(()),
            partitions = self.resolve_partitions() => partitions?,
        };
        tracing::info!(
            partitions = ?partitions,
            isolation = ?self.dispatcher.isolation(),
            "subscription started"
        );

        let (stop_tx, _) = broadcast::channel::<()>(1);
        let mut tasks = JoinSet::new();
        for partition_id in partitions {
            let worker = PartitionWorker {
                partition_id,
                source: self.source.clone(),
                checkpoints: self.checkpoints.clone(),
                dispatcher: self.dispatcher.clone(),
            };
            tasks.spawn(worker.run(stop_tx.subscribe()));
        }

        let mut failure: Option<anyhow::Error> = None;
        let mut shutting_down = false;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv(), if !shutting_down => {
                    tracing::info!("shutdown requested, finishing in-flight events");
                    shutting_down = true;
                    let _ = stop_tx.send(());
                }
                joined = tasks.join_next() => {
                    let result = match joined {
                        None => break,
                        Some(Ok(result)) => result,
                        Some(Err(e)) => Err(anyhow!("partition task aborted: {e}")),
                    };
                    if let Err(e) = result {
                        if failure.is_none() {
                            let _ = stop_tx.send(());
                            failure = Some(e);
                        } else {
                            tracing::warn!(
                                error = %format!("{e:#}"),
                                "additional partition failure"
                            );
                        }
                    }
                }
            }
        }

        match failure {
            Some(e) if shutting_down => {
                tracing::warn!(error = %format!("{e:#}"), "partition failed during shutdown");
                Ok(())
            }
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

struct PartitionWorker {
    partition_id: String,
    source: Arc<dyn EventSource>,
    checkpoints: Arc<dyn CheckpointStore>,
    dispatcher: Arc<EventDispatcher>,
}

impl PartitionWorker {
    async fn run(self, mut stop: broadcast::Receiver<()>) -> Result<()> {
        let partition_id = self.partition_id.as_str();
        let after = self
            .checkpoints
            .load(partition_id)
            .await
            .with_context(|| format!("loading checkpoint for partition {partition_id}"))?;
        tracing::info!(
            partition_id,
            resume_after = after.as_ref().map(|p| p.sequence_number),
            "partition opened"
        );
        let mut receiver = self
            .source
            .open(partition_id, after)
            .await
            .with_context(|| format!("opening partition {partition_id}"))?;

        loop {
            let event = tokio::select! {
                biased;
                _ = stop.recv() => {
                    tracing::debug!(partition_id, "partition stopped");
                    return Ok(());
                }
                next = receiver.next() => {
                    next.with_context(|| format!("reading partition {partition_id}"))?
                }
            };

            let outcome = self.dispatcher.handle(&event).await;

            let checkpoint = event.checkpoint();
            self.checkpoints
                .save(&checkpoint)
                .await
                .with_context(|| format!("saving checkpoint for partition {partition_id}"))?;
            tracing::debug!(
                partition_id,
                sequence_number = checkpoint.position.sequence_number,
                offset = checkpoint.position.offset,
                "checkpoint written"
            );

            outcome.with_context(|| {
                format!(
                    "handling event {} on partition {partition_id}",
                    checkpoint.position.sequence_number
                )
            })?;
        }
    }
}
