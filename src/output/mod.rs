pub mod senders;
pub mod snapshot;

pub use senders::{FileSink, MemorySink, SnapshotSink};
pub use snapshot::{Snapshot, SnapshotSaver};
