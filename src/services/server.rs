use log::{error, info, warn};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use super::serial_transport::SerialTransport;
use super::tcp_transport::TcpTransport;
use super::updater::PeriodicUpdater;
use crate::config::settings::{Config, TransportKind};
use crate::datastore::ServerContext;
use crate::modbus::engine::ProtocolEngine;
use crate::output::{FileSink, MemorySink, SnapshotSaver, SnapshotSink};
use crate::utils::error::{SlaveError, SlaveResult};

/// Owns the transport, the protocol engine and the periodic updater for the
/// lifetime of the process.
pub struct ModbusSlaveServer {
    config: Config,
    context: Arc<ServerContext>,
    engine: Arc<ProtocolEngine>,
    saver: SnapshotSaver,
}

impl ModbusSlaveServer {
    pub fn new(config: Config) -> SlaveResult<Self> {
        config.validate()?;
        let context = Arc::new(ServerContext::from_config(
            config.served_unit_ids(),
            config.slave.single,
            &config.datastore,
        )?);

        let engine = ProtocolEngine::new(context.clone(), config.identity.clone())
            .with_unknown_unit_policy(config.slave.unknown_unit)
            .with_broadcast(config.broadcast_enabled());

        let sink: Arc<dyn SnapshotSink> = if config.snapshot.enabled {
            Arc::new(FileSink::new(&config.snapshot.path))
        } else {
            Arc::new(MemorySink::new())
        };
        info!("💾 Snapshots go to {} {}", sink.sink_type(), sink.destination());

        Ok(Self {
            config,
            context,
            engine: Arc::new(engine),
            saver: SnapshotSaver::new(sink),
        })
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    pub fn engine(&self) -> &Arc<ProtocolEngine> {
        &self.engine
    }

    /// Serve until Ctrl-C or a fatal transport error.
    pub async fn run(self) -> SlaveResult<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("❌ Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("🛑 Shutdown requested");
        })
        .await
    }

    pub async fn run_until<F>(self, shutdown: F) -> SlaveResult<()>
    where
        F: Future<Output = ()>,
    {
        info!("🚀 Starting Modbus slave ({:?} transport)", self.config.transport);

        let (stop_tx, stop_rx) = watch::channel(false);
        let updater = if self.config.updater.enabled {
            let updater = PeriodicUpdater::from_config(
                self.context.clone(),
                &self.config.updater,
                Some(self.saver.clone()),
            );
            Some(updater.spawn(stop_rx))
        } else {
            info!("⏸️  Periodic updater disabled");
            None
        };

        let stop_serial = Arc::new(AtomicBool::new(false));
        let result = match self.config.transport {
            TransportKind::Tcp => {
                let transport = TcpTransport::bind(&self.config.tcp).await;
                match transport {
                    Ok(transport) => tokio::select! {
                        served = transport.serve(self.engine.clone()) => served,
                        _ = shutdown => Ok(()),
                    },
                    Err(e) => Err(e),
                }
            }
            TransportKind::Serial => {
                match SerialTransport::open(&self.config.serial) {
                    Ok(transport) => {
                        let engine = self.engine.clone();
                        let stop = stop_serial.clone();
                        let mut task =
                            tokio::task::spawn_blocking(move || transport.serve(engine, stop));
                        tokio::select! {
                            served = &mut task => join_result(served),
                            _ = shutdown => {
                                // The blocking loop notices within one read timeout.
                                stop_serial.store(true, Ordering::Relaxed);
                                join_result(task.await)
                            }
                        }
                    }
                    Err(e) => Err(e),
                }
            }
        };

        if let Err(e) = &result {
            error!("❌ Transport stopped: {}", e);
        }

        // An in-flight firing completes before the updater exits.
        let _ = stop_tx.send(true);
        if let Some(handle) = updater {
            if let Err(e) = handle.await {
                warn!("Periodic updater task ended abnormally: {}", e);
            }
        }

        self.engine.log_stats();
        info!("✅ Modbus slave stopped");
        result
    }
}

fn join_result(joined: Result<SlaveResult<()>, tokio::task::JoinError>) -> SlaveResult<()> {
    joined.map_err(|e| SlaveError::TransportFailure(format!("serial task: {}", e)))?
}
