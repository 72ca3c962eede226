pub mod context;
pub mod register_bank;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use context::{BankRef, ServerContext, SlaveContext};
pub use register_bank::{Cell, RegisterBank};

/// The four Modbus data tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    DiscreteInputs,
    Coils,
    HoldingRegisters,
    InputRegisters,
}

impl TableKind {
    pub const ALL: [TableKind; 4] = [
        TableKind::DiscreteInputs,
        TableKind::Coils,
        TableKind::HoldingRegisters,
        TableKind::InputRegisters,
    ];

    pub fn is_bit(&self) -> bool {
        matches!(self, TableKind::DiscreteInputs | TableKind::Coils)
    }

    pub fn name(&self) -> &'static str {
        match self {
            TableKind::DiscreteInputs => "discrete_inputs",
            TableKind::Coils => "coils",
            TableKind::HoldingRegisters => "holding_registers",
            TableKind::InputRegisters => "input_registers",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
