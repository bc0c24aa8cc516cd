//! fwbroker-services: collaborators, the transfer pipeline and the
//! subscription loop.

pub mod blob;
pub mod channel;
pub mod checkpoint;
pub mod consumer;
pub mod dispatch;
pub mod engine;
pub mod event_log;
pub mod fsutil;
pub mod pacing;
pub mod supervisor;
pub mod wiring;

pub use blob::{BlobError, BlobFetcher, FsBlobStore, MemoryBlobStore};
pub use channel::{DeviceChannel, MemoryChannel, SendError, SpoolChannel};
pub use checkpoint::{CheckpointError, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use consumer::StreamConsumer;
pub use dispatch::{Dispatch, DispatchError, EventDispatcher};
pub use engine::{TransferEngine, TransferError, TransferReport};
pub use event_log::{
    EventRecord, EventSource, JsonlEventLog, MemoryEventLog, PartitionReceiver, StreamError,
};
pub use pacing::{FixedInterval, Pacer, TokenBucket};
pub use supervisor::Supervisor;
pub use wiring::LocalBackends;
