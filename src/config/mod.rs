pub mod settings;

pub use settings::{
    Config,
    DatastoreConfig,
    ParityConfig,
    SerialConfig,
    SerialFramer,
    SlaveConfig,
    SnapshotConfig,
    TableConfig,
    TcpConfig,
    TransportKind,
    UnknownUnitPolicy,
    UpdaterConfig,
};
