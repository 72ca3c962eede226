use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

use crate::config::settings::UpdaterConfig;
use crate::datastore::{BankRef, ServerContext, TableKind};
use crate::output::SnapshotSaver;
use crate::utils::error::SlaveResult;

/// Pure per-cell transform applied on every firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transform {
    /// +1, wrapping at the cell width (a bit flips).
    Increment,
    /// -1, wrapping at the cell width (a bit flips).
    Decrement,
    /// Bitwise not.
    Toggle,
}

impl Transform {
    pub fn apply_word(self, value: u16) -> u16 {
        match self {
            Transform::Increment => value.wrapping_add(1),
            Transform::Decrement => value.wrapping_sub(1),
            Transform::Toggle => !value,
        }
    }

    pub fn apply_bit(self, value: bool) -> bool {
        // A one-bit counter wraps on every step.
        !value
    }
}

/// The register window one firing reads, transforms and writes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateWindow {
    pub unit_id: u8,
    pub table: TableKind,
    pub address: u16,
    pub count: u16,
}

/// What one firing wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdatedValues {
    Bits(Vec<bool>),
    Words(Vec<u16>),
}

pub struct PeriodicUpdater {
    context: Arc<ServerContext>,
    window: UpdateWindow,
    transform: Transform,
    interval: Duration,
    saver: Option<SnapshotSaver>,
}

impl PeriodicUpdater {
    pub fn new(
        context: Arc<ServerContext>,
        window: UpdateWindow,
        transform: Transform,
        interval: Duration,
        saver: Option<SnapshotSaver>,
    ) -> Self {
        Self {
            context,
            window,
            transform,
            interval,
            saver,
        }
    }

    pub fn from_config(
        context: Arc<ServerContext>,
        config: &UpdaterConfig,
        saver: Option<SnapshotSaver>,
    ) -> Self {
        let window = UpdateWindow {
            unit_id: config.unit_id,
            table: config.table,
            address: config.address,
            count: config.count,
        };
        Self::new(context, window, config.transform, config.interval(), saver)
    }

    pub fn window(&self) -> UpdateWindow {
        self.window
    }

    /// Apply the transform to the window. Read and write happen under one
    /// lock, so a protocol write can never land between them and be lost.
    pub fn apply(&self) -> SlaveResult<UpdatedValues> {
        let UpdateWindow { unit_id, table, address, count } = self.window;
        let transform = self.transform;
        let updated = match self.context.resolve(unit_id, table)? {
            BankRef::Bits(bank) => {
                UpdatedValues::Bits(bank.update(address, count, |v| transform.apply_bit(v))?)
            }
            BankRef::Words(bank) => {
                UpdatedValues::Words(bank.update(address, count, |v| transform.apply_word(v))?)
            }
        };
        Ok(updated)
    }

    /// One firing: update the window, then save a snapshot of the unit.
    pub async fn fire(&self) -> SlaveResult<UpdatedValues> {
        debug!("🔄 Updating {} {}..+{} on unit {}", self.window.table, self.window.address, self.window.count, self.window.unit_id);
        let updated = self.apply()?;
        debug!("🔢 New values: {:?}", updated);

        if let Some(saver) = &self.saver {
            let slave = self.context.slave(self.window.unit_id)?;
            saver.save(slave).await?;
        }
        Ok(updated)
    }

    /// Run on a fixed interval until `shutdown` flips to true. The first
    /// firing happens one interval after start. A firing always runs to
    /// completion before shutdown is checked again; ticks missed while a
    /// firing is in progress are skipped rather than queued.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                "⏱️  Periodic updater started: every {:?} on {} {}..+{} (unit {})",
                self.interval, self.window.table, self.window.address, self.window.count, self.window.unit_id
            );

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.fire().await {
                            // Keep the schedule going; the next firing may succeed.
                            error!("❌ Periodic update failed: {}", e);
                        }
                    }
                }
            }
            info!("🛑 Periodic updater stopped");
        })
    }
}
