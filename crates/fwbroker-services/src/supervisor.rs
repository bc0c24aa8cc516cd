//! Keeps a subscription running: on failure, wait a fixed backoff and
//! subscribe again. No retry limit. Returns only on shutdown.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::consumer::StreamConsumer;

pub struct Supervisor {
    consumer: StreamConsumer,
    backoff: Duration,
}

impl Supervisor {
    pub fn new(consumer: StreamConsumer, backoff: Duration) -> Self {
        Self { consumer, backoff }
    }

    /// Run until shutdown. Returns how many subscriptions failed.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> u64 {
        let mut failures = 0u64;
        loop {
            match self.consumer.run(&mut shutdown).await {
                Ok(()) => {
                    tracing::info!(failures, "broker stopped");
                    return failures;
                }
                Err(e) => {
                    failures += 1;
                    tracing::error!(error = %format!("{e:#}"), failures, "subscription failed");
                }
            }

            tracing::warn!(
                backoff_ms = self.backoff.as_millis() as u64,
                "resubscribing after backoff"
            );
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(failures, "broker stopped during backoff");
                    return failures;
                }
                _ = tokio::time::sleep(self.backoff) => {}
            }
        }
    }
}
