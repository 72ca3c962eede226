use thiserror::Error;

use crate::datastore::TableKind;

#[derive(Error, Debug)]
pub enum SlaveError {
    #[error("Illegal function: 0x{0:02X}")]
    IllegalFunction(u8),

    #[error("Illegal data address: {kind} address {address} count {count} outside offset {offset} extent {extent}")]
    IllegalAddress {
        kind: TableKind,
        address: u16,
        count: u16,
        offset: u16,
        extent: u32,
    },

    #[error("Device identification object 0x{0:02X} not available")]
    UnknownObject(u8),

    #[error("Illegal data value: {0}")]
    IllegalDataValue(String),

    #[error("Unknown unit id: {0}")]
    UnknownUnit(u8),

    #[error("Snapshot failure: {0}")]
    SnapshotFailure(String),

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("CRC checksum mismatch")]
    CrcError,

    #[error("LRC checksum mismatch")]
    LrcError,

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Lock acquisition failed")]
    LockError,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for SlaveError {
    fn from(err: serde_json::Error) -> Self {
        SlaveError::SerializationError(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for SlaveError {
    fn from(err: toml::de::Error) -> Self {
        SlaveError::ConfigError(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for SlaveError {
    fn from(err: toml::ser::Error) -> Self {
        SlaveError::SerializationError(format!("TOML error: {}", err))
    }
}

impl From<std::io::Error> for SlaveError {
    fn from(err: std::io::Error) -> Self {
        SlaveError::TransportFailure(format!("IO error: {}", err))
    }
}

impl From<serialport::Error> for SlaveError {
    fn from(err: serialport::Error) -> Self {
        SlaveError::ConnectionError(format!("Serial port error: {}", err))
    }
}

pub type SlaveResult<T> = Result<T, SlaveError>;
