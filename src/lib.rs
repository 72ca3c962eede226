//! Modbus slave with a periodically updated register map.
//!
//! Serves four register tables per unit over RTU, ASCII or TCP, bumps a
//! configured register window on a fixed interval and writes a JSON snapshot
//! of the updated slave after every firing.

pub mod cli;
pub mod config;
pub mod datastore;
pub mod modbus;
pub mod output;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use datastore::{RegisterBank, ServerContext, SlaveContext, TableKind};
pub use modbus::{DeviceIdentity, ProtocolEngine};
pub use output::{FileSink, MemorySink, Snapshot, SnapshotSaver, SnapshotSink};
pub use services::{ModbusSlaveServer, PeriodicUpdater, Transform};
pub use utils::error::{SlaveError, SlaveResult};

pub const VERSION: &str = "0.1.0";
