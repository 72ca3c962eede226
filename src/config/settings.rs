use clap::ArgMatches;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::datastore::TableKind;
use crate::modbus::identity::DeviceIdentity;
use crate::services::updater::Transform;
use crate::utils::error::{SlaveError, SlaveResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transport: TransportKind,
    pub serial: SerialConfig,
    pub tcp: TcpConfig,
    pub slave: SlaveConfig,
    pub datastore: DatastoreConfig,
    pub updater: UpdaterConfig,
    pub snapshot: SnapshotConfig,
    pub identity: DeviceIdentity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Serial,
    Tcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParityConfig {
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialFramer {
    Rtu,
    Ascii,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub parity: ParityConfig,
    pub stop_bits: u8,
    pub data_bits: u8,
    pub framer: SerialFramer,
    /// Read timeout; also the idle gap that closes an RTU frame of unknown length.
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownUnitPolicy {
    /// Stay silent, like a device that is simply not on the line.
    Ignore,
    /// Answer with exception 0x0B (gateway target device failed to respond).
    Exception,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaveConfig {
    pub unit_ids: Vec<u8>,
    pub single: bool,
    pub unknown_unit: UnknownUnitPolicy,
    /// Execute writes addressed to unit 0 on every slave without replying.
    /// Serial transports only.
    pub broadcast_enable: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TableConfig {
    pub offset: u16,
    pub extent: u32,
    /// Initial value of every cell; any non-zero value means `true` for bit tables.
    pub fill: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatastoreConfig {
    pub discrete_inputs: TableConfig,
    pub coils: TableConfig,
    pub holding_registers: TableConfig,
    pub input_registers: TableConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub unit_id: u8,
    pub table: TableKind,
    pub address: u16,
    pub count: u16,
    pub transform: Transform,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            parity: ParityConfig::None,
            stop_bits: 2,
            data_bits: 8,
            framer: SerialFramer::Rtu,
            timeout_ms: 50,
        }
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 502,
        }
    }
}

impl Default for SlaveConfig {
    fn default() -> Self {
        Self {
            unit_ids: vec![0x01],
            single: true,
            unknown_unit: UnknownUnitPolicy::Ignore,
            broadcast_enable: false,
        }
    }
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        let single_cell = TableConfig { offset: 0, extent: 1, fill: 17 };
        Self {
            discrete_inputs: single_cell,
            coils: single_cell,
            holding_registers: TableConfig { offset: 1, extent: 20, fill: 17 },
            input_registers: single_cell,
        }
    }
}

impl DatastoreConfig {
    pub fn table(&self, kind: TableKind) -> &TableConfig {
        match kind {
            TableKind::DiscreteInputs => &self.discrete_inputs,
            TableKind::Coils => &self.coils,
            TableKind::HoldingRegisters => &self.holding_registers,
            TableKind::InputRegisters => &self.input_registers,
        }
    }
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 5,
            unit_id: 0x01,
            table: TableKind::HoldingRegisters,
            address: 0x10,
            count: 5,
            transform: Transform::Increment,
        }
    }
}

impl UpdaterConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "logij.json".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportKind::Serial,
            serial: SerialConfig::default(),
            tcp: TcpConfig::default(),
            slave: SlaveConfig::default(),
            datastore: DatastoreConfig::default(),
            updater: UpdaterConfig::default(),
            snapshot: SnapshotConfig::default(),
            identity: DeviceIdentity::default(),
        }
    }
}

impl Config {
    /// Start from `--config` (or defaults) and apply command line overrides.
    pub fn from_matches(matches: &ArgMatches) -> SlaveResult<Self> {
        let mut config = match matches.get_one::<String>("config") {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(port) = matches.get_one::<String>("port") {
            config.serial.port = port.clone();
            config.transport = TransportKind::Serial;
        }
        if let Some(baud) = matches.get_one::<String>("baud") {
            config.serial.baud_rate = parse_arg("baud", baud)?;
        }
        if let Some(framer) = matches.get_one::<String>("framer") {
            config.serial.framer = match framer.as_str() {
                "rtu" => SerialFramer::Rtu,
                "ascii" => SerialFramer::Ascii,
                other => {
                    return Err(SlaveError::ConfigError(format!("unknown framer '{}'", other)))
                }
            };
        }
        if matches.get_flag("tcp") {
            config.transport = TransportKind::Tcp;
        }
        if let Some(bind) = matches.get_one::<String>("bind") {
            let (host, port) = bind.rsplit_once(':').ok_or_else(|| {
                SlaveError::ConfigError(format!("bind address '{}' must be host:port", bind))
            })?;
            config.tcp.bind_address = host.to_string();
            config.tcp.port = parse_arg("bind", port)?;
            config.transport = TransportKind::Tcp;
        }
        if let Some(unit) = matches.get_one::<String>("unit") {
            let unit_id: u8 = parse_arg("unit", unit)?;
            config.slave.unit_ids = vec![unit_id];
            config.slave.single = true;
            config.updater.unit_id = unit_id;
        }
        if let Some(interval) = matches.get_one::<String>("interval") {
            config.updater.interval_seconds = parse_arg("interval", interval)?;
        }
        if let Some(snapshot) = matches.get_one::<String>("snapshot") {
            config.snapshot.path = snapshot.clone();
        }
        if matches.get_flag("no-updater") {
            config.updater.enabled = false;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> SlaveResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SlaveError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)?;
        info!("⚙️  Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> SlaveResult<()> {
        // Create directory if it doesn't exist
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| SlaveError::ConfigError(format!("cannot create {}: {}", parent.display(), e)))?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)
            .map_err(|e| SlaveError::ConfigError(format!("cannot write {}: {}", path.as_ref().display(), e)))?;
        Ok(())
    }

    pub fn validate(&self) -> SlaveResult<()> {
        if self.slave.unit_ids.is_empty() {
            return Err(SlaveError::ConfigError("at least one unit id is required".to_string()));
        }
        if let Some(id) = self.slave.unit_ids.iter().find(|id| !(1..=247).contains(*id)) {
            return Err(SlaveError::ConfigError(format!(
                "unit id {} outside 1..=247",
                id
            )));
        }
        if self.slave.single && self.slave.unit_ids.len() > 1 {
            warn!(
                "Single mode serves one slave; ignoring unit ids {:?}",
                &self.slave.unit_ids[1..]
            );
        }

        for kind in TableKind::ALL {
            let table = self.datastore.table(kind);
            if table.extent == 0 {
                return Err(SlaveError::ConfigError(format!("{} extent must be at least 1", kind)));
            }
            if table.offset as u64 + table.extent as u64 > 0x1_0000 {
                return Err(SlaveError::ConfigError(format!(
                    "{} offset {} + extent {} exceeds 65536",
                    kind, table.offset, table.extent
                )));
            }
        }

        if self.updater.enabled {
            let updater = &self.updater;
            if updater.interval_seconds == 0 {
                return Err(SlaveError::ConfigError("updater interval must be at least 1 second".to_string()));
            }
            if updater.count == 0 {
                return Err(SlaveError::ConfigError("updater window count must be at least 1".to_string()));
            }
            let table = self.datastore.table(updater.table);
            let start = updater.address as u64;
            let end = start + updater.count as u64;
            let upper = table.offset as u64 + table.extent as u64;
            if start < table.offset as u64 || end > upper {
                return Err(SlaveError::ConfigError(format!(
                    "updater window {} {}..{} outside configured {} {}..{}",
                    updater.table,
                    start,
                    end,
                    updater.table,
                    table.offset,
                    upper
                )));
            }
            if !self.slave.single && !self.slave.unit_ids.contains(&updater.unit_id) {
                return Err(SlaveError::ConfigError(format!(
                    "updater unit id {} is not served",
                    updater.unit_id
                )));
            }
        }

        if self.serial.stop_bits != 1 && self.serial.stop_bits != 2 {
            return Err(SlaveError::ConfigError(format!("stop bits must be 1 or 2, got {}", self.serial.stop_bits)));
        }
        if !(5..=8).contains(&self.serial.data_bits) {
            return Err(SlaveError::ConfigError(format!("data bits must be 5..=8, got {}", self.serial.data_bits)));
        }
        if self.snapshot.enabled && self.snapshot.path.is_empty() {
            return Err(SlaveError::ConfigError("snapshot path must not be empty".to_string()));
        }
        Ok(())
    }

    /// Unit ids actually served: one in single mode.
    pub fn served_unit_ids(&self) -> &[u8] {
        if self.slave.single {
            &self.slave.unit_ids[..1.min(self.slave.unit_ids.len())]
        } else {
            &self.slave.unit_ids
        }
    }

    pub fn broadcast_enabled(&self) -> bool {
        self.slave.broadcast_enable && self.transport == TransportKind::Serial
    }
}

fn parse_arg<T: std::str::FromStr>(name: &str, value: &str) -> SlaveResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| SlaveError::ConfigError(format!("invalid --{} '{}': {}", name, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.datastore.holding_registers.offset, 1);
        assert_eq!(config.datastore.holding_registers.extent, 20);
        assert_eq!(config.updater.address, 0x10);
        assert_eq!(config.updater.interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
transport = "tcp"

[tcp]
port = 1502

[updater]
interval_seconds = 2
transform = "decrement"
"#,
        )
        .unwrap();
        assert_eq!(config.transport, TransportKind::Tcp);
        assert_eq!(config.tcp.port, 1502);
        assert_eq!(config.tcp.bind_address, "0.0.0.0");
        assert_eq!(config.updater.interval_seconds, 2);
        assert_eq!(config.updater.transform, Transform::Decrement);
        assert_eq!(config.updater.count, 5);
        assert_eq!(config.serial.baud_rate, 9600);
    }

    #[test]
    fn test_toml_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("slave.toml");
        let mut config = Config::default();
        config.serial.framer = SerialFramer::Ascii;
        config.slave.unknown_unit = UnknownUnitPolicy::Exception;
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.serial.framer, SerialFramer::Ascii);
        assert_eq!(loaded.slave.unknown_unit, UnknownUnitPolicy::Exception);
        assert_eq!(loaded.snapshot.path, "logij.json");
    }

    #[test]
    fn test_window_outside_table_is_rejected() {
        let mut config = Config::default();
        config.updater.address = 18;
        assert!(config.validate().is_err());

        config.updater.enabled = false;
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_tables_and_units() {
        let mut config = Config::default();
        config.datastore.coils.extent = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.datastore.coils = TableConfig { offset: 0xFFFF, extent: 2, fill: 0 };
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.slave.unit_ids = vec![0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_huge_extent_is_config_error() {
        let mut config = Config::default();
        config.datastore.holding_registers = TableConfig { offset: 1, extent: u32::MAX, fill: 17 };
        assert!(matches!(config.validate(), Err(SlaveError::ConfigError(_))));

        let parsed: Config = toml::from_str(
            "[datastore.coils]\noffset = 0\nextent = 4294967295\nfill = 1\n",
        )
        .unwrap();
        assert!(matches!(parsed.validate(), Err(SlaveError::ConfigError(_))));
    }

    #[test]
    fn test_broadcast_only_on_serial() {
        let mut config = Config::default();
        config.slave.broadcast_enable = true;
        assert!(config.broadcast_enabled());
        config.transport = TransportKind::Tcp;
        assert!(!config.broadcast_enabled());
    }
}
