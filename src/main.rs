use anyhow::{Context, Result};
use log::info;

use modbus_slave_updater::cli::{build_cli, handle_subcommands};
use modbus_slave_updater::utils::logging::init_logging;
use modbus_slave_updater::{Config, ModbusSlaveServer, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();
    init_logging(matches.get_one::<String>("log-level").map(String::as_str));

    info!("🖥️  Modbus slave updater v{}", VERSION);

    let config = Config::from_matches(&matches).context("invalid configuration")?;
    if handle_subcommands(&matches, &config)? {
        return Ok(());
    }

    let server = ModbusSlaveServer::new(config).context("failed to build server")?;
    server.run().await.context("server stopped with an error")?;
    Ok(())
}
