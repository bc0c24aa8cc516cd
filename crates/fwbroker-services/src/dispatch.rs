//! Routes stream events to the transfer engine.
//!
//! Only `FirmwareUpdateReady` events reach the engine. What happens when
//! decoding or the transfer fails depends on the failure isolation policy:
//! `PerEvent` logs and contains it, `FailFast` hands it back to the caller.

use std::sync::Arc;

use fwbroker_core::config::FailureIsolation;
use fwbroker_core::{decode_event, DecodeError, EventKind, StreamEvent};

use crate::engine::{TransferEngine, TransferError, TransferReport};

/// How one event was handled.
#[derive(Debug)]
pub enum Dispatch {
    /// Not a firmware update event; the engine was not called.
    Skipped { event_type: Option<String> },
    Delivered(TransferReport),
    /// Contained under `PerEvent`: the body could not be decoded.
    Rejected(DecodeError),
    /// Contained under `PerEvent`: the transfer aborted.
    TransferFailed(TransferError),
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("event at partition {partition_id} seq {sequence_number} rejected: {source}")]
    Decode {
        partition_id: String,
        sequence_number: u64,
        #[source]
        source: DecodeError,
    },
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

pub struct EventDispatcher {
    engine: Arc<TransferEngine>,
    isolation: FailureIsolation,
}

impl EventDispatcher {
    pub fn new(engine: Arc<TransferEngine>, isolation: FailureIsolation) -> Self {
        Self { engine, isolation }
    }

    pub fn isolation(&self) -> FailureIsolation {
        self.isolation
    }

    /// Handle one event to completion.
    ///
    /// `Err` is only returned under `FailFast`.
    pub async fn handle(&self, event: &StreamEvent) -> Result<Dispatch, DispatchError> {
        let command = match decode_event(event) {
            Ok(EventKind::UpdateReady(command)) => command,
            Ok(EventKind::Ignored { event_type }) => {
                tracing::debug!(
                    partition_id = %event.partition_id,
                    sequence_number = event.position.sequence_number,
                    event_type = event_type.as_deref().unwrap_or("<none>"),
                    "event skipped"
                );
                return Ok(Dispatch::Skipped { event_type });
            }
            Err(e) => {
                tracing::warn!(
                    partition_id = %event.partition_id,
                    sequence_number = event.position.sequence_number,
                    error = %e,
                    "event rejected"
                );
                return match self.isolation {
                    FailureIsolation::PerEvent => Ok(Dispatch::Rejected(e)),
                    FailureIsolation::FailFast => Err(DispatchError::Decode {
                        partition_id: event.partition_id.clone(),
                        sequence_number: event.position.sequence_number,
                        source: e,
                    }),
                };
            }
        };

        match self
            .engine
            .transfer(&command.device_id, &command.filename, command.chunk_size)
            .await
        {
            Ok(report) => Ok(Dispatch::Delivered(report)),
            Err(e) => {
                tracing::error!(
                    device_id = %command.device_id,
                    filename = %command.filename,
                    chunk_index = e.failed_chunk(),
                    chunks_sent = e.chunks_sent(),
                    error = %e,
                    "transfer failed"
                );
                match self.isolation {
                    FailureIsolation::PerEvent => Ok(Dispatch::TransferFailed(e)),
                    FailureIsolation::FailFast => Err(e.into()),
                }
            }
        }
    }
}
