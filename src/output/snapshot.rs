//! Point-in-time JSON dump of a slave's tables.

use log::{debug, error};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::senders::SnapshotSink;
use crate::datastore::{Cell, RegisterBank, SlaveContext};
use crate::utils::error::{SlaveError, SlaveResult};

/// Every table of one slave, address → value, in ascending address order.
///
/// Contains nothing time-dependent, so two captures of unchanged tables
/// serialize to identical bytes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub unit_id: u8,
    pub discrete_inputs: BTreeMap<u16, bool>,
    pub coils: BTreeMap<u16, bool>,
    pub holding_registers: BTreeMap<u16, u16>,
    pub input_registers: BTreeMap<u16, u16>,
}

fn table<T: Cell>(bank: &RegisterBank<T>) -> SlaveResult<BTreeMap<u16, T>> {
    Ok(bank.entries()?.into_iter().collect())
}

impl Snapshot {
    /// Copy all tables. Each table is read under its own lock, so no table is
    /// ever observed mid-write.
    pub fn capture(slave: &SlaveContext) -> SlaveResult<Self> {
        Ok(Self {
            unit_id: slave.unit_id(),
            discrete_inputs: table(slave.discrete_inputs())?,
            coils: table(slave.coils())?,
            holding_registers: table(slave.holding_registers())?,
            input_registers: table(slave.input_registers())?,
        })
    }

    pub fn to_json(&self) -> SlaveResult<String> {
        let mut document = serde_json::to_string_pretty(self)?;
        document.push('\n');
        Ok(document)
    }
}

#[derive(Clone)]
pub struct SnapshotSaver {
    sink: Arc<dyn SnapshotSink>,
}

impl SnapshotSaver {
    pub fn new(sink: Arc<dyn SnapshotSink>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &Arc<dyn SnapshotSink> {
        &self.sink
    }

    /// Capture `slave` and hand the document to the sink. Failures are
    /// returned to the caller as `SnapshotFailure`, never retried.
    pub async fn save(&self, slave: &SlaveContext) -> SlaveResult<()> {
        let document = Snapshot::capture(slave)
            .and_then(|snapshot| snapshot.to_json())
            .map_err(|e| match e {
                SlaveError::SnapshotFailure(_) => e,
                other => SlaveError::SnapshotFailure(other.to_string()),
            })?;

        match self.sink.write(&document).await {
            Ok(()) => {
                debug!(
                    "💾 Saved snapshot of unit {} to {} {}",
                    slave.unit_id(),
                    self.sink.sink_type(),
                    self.sink.destination()
                );
                Ok(())
            }
            Err(e) => {
                error!("❌ Snapshot of unit {} failed: {}", slave.unit_id(), e);
                Err(match e {
                    SlaveError::SnapshotFailure(_) => e,
                    other => SlaveError::SnapshotFailure(other.to_string()),
                })
            }
        }
    }
}
