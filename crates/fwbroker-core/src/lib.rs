//! fwbroker-core: shared types, wire format, chunk planning and config.
//! All other fwbroker crates depend on this one.

pub mod command;
pub mod config;
pub mod connection;
pub mod event;
pub mod plan;
pub mod wire;

pub use command::{decode_event, DecodeError, EventKind, UpdateReadyCommand, FIRMWARE_UPDATE_READY};
pub use event::{Checkpoint, Position, PropertyValue, StreamEvent};
pub use plan::{plan, ChunkPlan, ChunkRange, PlanError};
pub use wire::{ChunkMessage, OutboundMessage};
