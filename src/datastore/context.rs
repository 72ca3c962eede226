use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::register_bank::{Cell, RegisterBank};
use super::TableKind;
use crate::config::settings::{DatastoreConfig, TableConfig};
use crate::utils::error::{SlaveError, SlaveResult};

/// Borrowed view of one table, typed by cell width.
#[derive(Debug, Clone, Copy)]
pub enum BankRef<'a> {
    Bits(&'a RegisterBank<bool>),
    Words(&'a RegisterBank<u16>),
}

impl BankRef<'_> {
    pub fn kind(&self) -> TableKind {
        match self {
            BankRef::Bits(bank) => bank.kind(),
            BankRef::Words(bank) => bank.kind(),
        }
    }
}

/// The four tables served under one unit id.
#[derive(Debug)]
pub struct SlaveContext {
    unit_id: u8,
    discrete_inputs: RegisterBank<bool>,
    coils: RegisterBank<bool>,
    holding_registers: RegisterBank<u16>,
    input_registers: RegisterBank<u16>,
}

fn build_bank<T: Cell>(kind: TableKind, table: &TableConfig) -> SlaveResult<RegisterBank<T>> {
    RegisterBank::filled(kind, table.offset, table.extent, T::from_fill(table.fill))
}

impl SlaveContext {
    pub fn new(
        unit_id: u8,
        discrete_inputs: RegisterBank<bool>,
        coils: RegisterBank<bool>,
        holding_registers: RegisterBank<u16>,
        input_registers: RegisterBank<u16>,
    ) -> Self {
        Self {
            unit_id,
            discrete_inputs,
            coils,
            holding_registers,
            input_registers,
        }
    }

    pub fn from_config(unit_id: u8, datastore: &DatastoreConfig) -> SlaveResult<Self> {
        let context = Self::new(
            unit_id,
            build_bank(TableKind::DiscreteInputs, &datastore.discrete_inputs)?,
            build_bank(TableKind::Coils, &datastore.coils)?,
            build_bank(TableKind::HoldingRegisters, &datastore.holding_registers)?,
            build_bank(TableKind::InputRegisters, &datastore.input_registers)?,
        );
        for kind in TableKind::ALL {
            let table = datastore.table(kind);
            debug!(
                "unit {}: {} offset={} extent={} fill={}",
                unit_id, kind, table.offset, table.extent, table.fill
            );
        }
        Ok(context)
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn discrete_inputs(&self) -> &RegisterBank<bool> {
        &self.discrete_inputs
    }

    pub fn coils(&self) -> &RegisterBank<bool> {
        &self.coils
    }

    pub fn holding_registers(&self) -> &RegisterBank<u16> {
        &self.holding_registers
    }

    pub fn input_registers(&self) -> &RegisterBank<u16> {
        &self.input_registers
    }

    pub fn bank(&self, kind: TableKind) -> BankRef<'_> {
        match kind {
            TableKind::DiscreteInputs => BankRef::Bits(&self.discrete_inputs),
            TableKind::Coils => BankRef::Bits(&self.coils),
            TableKind::HoldingRegisters => BankRef::Words(&self.holding_registers),
            TableKind::InputRegisters => BankRef::Words(&self.input_registers),
        }
    }
}

/// Server-wide unit id → slave mapping.
///
/// In single mode every unit id resolves to the one configured slave, the same
/// way a lone device on a line answers regardless of the address byte.
#[derive(Debug)]
pub struct ServerContext {
    slaves: BTreeMap<u8, Arc<SlaveContext>>,
    single: bool,
}

impl ServerContext {
    pub fn single(slave: SlaveContext) -> Self {
        let mut slaves = BTreeMap::new();
        slaves.insert(slave.unit_id(), Arc::new(slave));
        Self { slaves, single: true }
    }

    pub fn multi<I>(slaves: I) -> SlaveResult<Self>
    where
        I: IntoIterator<Item = SlaveContext>,
    {
        let mut map = BTreeMap::new();
        for slave in slaves {
            let unit_id = slave.unit_id();
            if map.insert(unit_id, Arc::new(slave)).is_some() {
                return Err(SlaveError::ConfigError(format!("duplicate unit id {}", unit_id)));
            }
        }
        if map.is_empty() {
            return Err(SlaveError::ConfigError("no slaves configured".to_string()));
        }
        Ok(Self { slaves: map, single: false })
    }

    pub fn from_config(unit_ids: &[u8], single: bool, datastore: &DatastoreConfig) -> SlaveResult<Self> {
        let context = if single {
            let unit_id = unit_ids.first().copied().ok_or_else(|| {
                SlaveError::ConfigError("single mode needs one unit id".to_string())
            })?;
            Self::single(SlaveContext::from_config(unit_id, datastore)?)
        } else {
            let slaves = unit_ids
                .iter()
                .map(|id| SlaveContext::from_config(*id, datastore))
                .collect::<SlaveResult<Vec<_>>>()?;
            Self::multi(slaves)?
        };
        info!(
            "📋 Server context ready: {} slave(s) {:?}, single mode {}",
            context.slaves.len(),
            context.unit_ids(),
            context.single
        );
        Ok(context)
    }

    pub fn is_single(&self) -> bool {
        self.single
    }

    pub fn unit_ids(&self) -> Vec<u8> {
        self.slaves.keys().copied().collect()
    }

    pub fn slaves(&self) -> impl Iterator<Item = &Arc<SlaveContext>> {
        self.slaves.values()
    }

    pub fn slave(&self, unit_id: u8) -> SlaveResult<&Arc<SlaveContext>> {
        if self.single {
            return self
                .slaves
                .values()
                .next()
                .ok_or(SlaveError::UnknownUnit(unit_id));
        }
        self.slaves.get(&unit_id).ok_or(SlaveError::UnknownUnit(unit_id))
    }

    pub fn resolve(&self, unit_id: u8, kind: TableKind) -> SlaveResult<BankRef<'_>> {
        Ok(self.slave(unit_id)?.bank(kind))
    }
}
