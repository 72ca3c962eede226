use clap::{Arg, ArgAction, ArgMatches, Command};
use log::info;

use crate::config::Config;
use crate::utils::error::{SlaveError, SlaveResult};

pub fn build_cli() -> Command {
    Command::new("modbus_slave_updater")
        .version(crate::VERSION)
        .about("Modbus slave with a periodically updated register map")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("Path to a TOML configuration file"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("DEVICE")
                .help("Serial device, selects the serial transport"),
        )
        .arg(
            Arg::new("baud")
                .short('b')
                .long("baud")
                .value_name("RATE")
                .help("Serial baud rate"),
        )
        .arg(
            Arg::new("framer")
                .long("framer")
                .value_name("FRAMER")
                .value_parser(["rtu", "ascii"])
                .help("Serial framing"),
        )
        .arg(
            Arg::new("tcp")
                .long("tcp")
                .action(ArgAction::SetTrue)
                .help("Serve Modbus TCP instead of a serial line"),
        )
        .arg(
            Arg::new("bind")
                .long("bind")
                .value_name("HOST:PORT")
                .help("TCP listen address, selects the TCP transport"),
        )
        .arg(
            Arg::new("unit")
                .short('u')
                .long("unit")
                .value_name("ID")
                .help("Unit id of the single served slave"),
        )
        .arg(
            Arg::new("interval")
                .short('i')
                .long("interval")
                .value_name("SECONDS")
                .help("Periodic update interval"),
        )
        .arg(
            Arg::new("snapshot")
                .short('s')
                .long("snapshot")
                .value_name("FILE")
                .help("Snapshot file written after every update"),
        )
        .arg(
            Arg::new("no-updater")
                .long("no-updater")
                .action(ArgAction::SetTrue)
                .help("Serve the register map without periodic updates"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .global(true)
                .value_parser(["error", "warn", "info", "debug", "trace"])
                .help("Log level (RUST_LOG overrides per module)"),
        )
        .subcommand(Command::new("run").about("Start the slave (default)"))
        .subcommand(
            Command::new("init-config")
                .about("Write a configuration file with the effective settings")
                .arg(
                    Arg::new("path")
                        .value_name("FILE")
                        .default_value("modbus_slave.toml")
                        .help("Where to write the file"),
                ),
        )
        .subcommand(Command::new("show-config").about("Print the effective configuration"))
        .subcommand(Command::new("list-ports").about("List serial ports on this machine"))
}

/// Run a one-shot subcommand. Returns `Ok(true)` when one was handled and
/// the process should exit instead of serving.
pub fn handle_subcommands(matches: &ArgMatches, config: &Config) -> SlaveResult<bool> {
    match matches.subcommand() {
        Some(("init-config", sub)) => {
            let path = sub
                .get_one::<String>("path")
                .ok_or_else(|| SlaveError::ConfigError("missing path".to_string()))?;
            config.save_to_file(path)?;
            info!("📝 Configuration written to {}", path);
            println!("✅ Configuration written to {}", path);
            Ok(true)
        }
        Some(("show-config", _)) => {
            print!("{}", toml::to_string_pretty(config)?);
            Ok(true)
        }
        Some(("list-ports", _)) => {
            list_serial_ports()?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn list_serial_ports() -> SlaveResult<()> {
    println!("📡 Available Serial Ports:");

    let ports = serialport::available_ports()?;
    if ports.is_empty() {
        println!("   ⚠️  No serial ports found");
        return Ok(());
    }

    for (index, port) in ports.iter().enumerate() {
        println!("   {}. {}", index + 1, port.port_name);
        if let serialport::SerialPortType::UsbPort(usb_info) = &port.port_type {
            if let Some(manufacturer) = &usb_info.manufacturer {
                println!("      📱 Manufacturer: {}", manufacturer);
            }
            if let Some(serial_number) = &usb_info.serial_number {
                println!("      🔢 Serial Number: {}", serial_number);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::{SerialFramer, TransportKind};

    #[test]
    fn test_overrides_apply_to_config() {
        let matches = build_cli()
            .try_get_matches_from([
                "modbus_slave_updater",
                "--bind",
                "127.0.0.1:1502",
                "--unit",
                "3",
                "--interval",
                "2",
                "--framer",
                "ascii",
            ])
            .unwrap();
        let config = Config::from_matches(&matches).unwrap();
        assert_eq!(config.transport, TransportKind::Tcp);
        assert_eq!(config.tcp.port, 1502);
        assert_eq!(config.slave.unit_ids, vec![3]);
        assert_eq!(config.updater.unit_id, 3);
        assert_eq!(config.updater.interval_seconds, 2);
        assert_eq!(config.serial.framer, SerialFramer::Ascii);
    }

    #[test]
    fn test_bad_override_is_config_error() {
        let matches = build_cli()
            .try_get_matches_from(["modbus_slave_updater", "--baud", "fast"])
            .unwrap();
        assert!(matches!(Config::from_matches(&matches), Err(SlaveError::ConfigError(_))));
    }

    #[test]
    fn test_init_config_writes_loadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slave.toml");
        let path_arg = path.to_string_lossy().to_string();
        let matches = build_cli()
            .try_get_matches_from(["modbus_slave_updater", "--no-updater", "init-config", &path_arg])
            .unwrap();
        let config = Config::from_matches(&matches).unwrap();
        assert!(handle_subcommands(&matches, &config).unwrap());

        let loaded = Config::from_file(&path).unwrap();
        assert!(!loaded.updater.enabled);
        assert_eq!(loaded.datastore.holding_registers.extent, 20);
    }

    #[test]
    fn test_run_is_not_a_one_shot() {
        let matches = build_cli().try_get_matches_from(["modbus_slave_updater", "run"]).unwrap();
        assert!(!handle_subcommands(&matches, &Config::default()).unwrap());
    }
}
