//! Request dispatch against the server context.
//!
//! One call to [`ProtocolEngine::handle`] is one full pass through the
//! request cycle: decode the PDU, touch storage, encode the reply. Nothing
//! is carried over between calls apart from counters.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::identity::DeviceIdentity;
use super::protocol::{exception_pdu, ExceptionCode, Request, Response};
use crate::config::settings::UnknownUnitPolicy;
use crate::datastore::{ServerContext, SlaveContext};
use crate::utils::error::SlaveResult;

/// Address that every slave on a serial line listens to without replying.
pub const BROADCAST_UNIT: u8 = 0;

#[derive(Debug, Default)]
pub struct EngineStats {
    pub requests: AtomicU64,
    pub exceptions: AtomicU64,
    pub ignored: AtomicU64,
}

pub struct ProtocolEngine {
    context: Arc<ServerContext>,
    identity: DeviceIdentity,
    unknown_unit: UnknownUnitPolicy,
    broadcast: bool,
    stats: EngineStats,
}

impl ProtocolEngine {
    pub fn new(context: Arc<ServerContext>, identity: DeviceIdentity) -> Self {
        Self {
            context,
            identity,
            unknown_unit: UnknownUnitPolicy::Ignore,
            broadcast: false,
            stats: EngineStats::default(),
        }
    }

    pub fn with_unknown_unit_policy(mut self, policy: UnknownUnitPolicy) -> Self {
        self.unknown_unit = policy;
        self
    }

    pub fn with_broadcast(mut self, enabled: bool) -> Self {
        self.broadcast = enabled;
        self
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Handle one request PDU addressed to `unit_id`.
    ///
    /// Returns the response PDU, or `None` when nothing must be sent back
    /// (broadcast, ignored unit, empty PDU).
    pub fn handle(&self, unit_id: u8, pdu: &[u8]) -> Option<Vec<u8>> {
        let Some(&function_code) = pdu.first() else {
            warn!("Dropping empty PDU for unit {}", unit_id);
            return None;
        };
        self.stats.requests.fetch_add(1, Ordering::Relaxed);

        if self.broadcast && unit_id == BROADCAST_UNIT {
            self.handle_broadcast(pdu);
            return None;
        }

        let slave = match self.context.slave(unit_id) {
            Ok(slave) => slave,
            Err(_) => return self.unknown_unit_reply(unit_id, function_code),
        };

        let result = Request::decode(pdu).and_then(|request| {
            debug!("unit {} ← {:?}", unit_id, request);
            self.execute(slave, &request)
        });

        match result {
            Ok(response) => Some(response.encode()),
            Err(err) => {
                let code = ExceptionCode::from(&err);
                self.stats.exceptions.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "unit {} function 0x{:02X} → exception {}: {}",
                    unit_id, function_code, code, err
                );
                Some(exception_pdu(function_code, code))
            }
        }
    }

    fn unknown_unit_reply(&self, unit_id: u8, function_code: u8) -> Option<Vec<u8>> {
        match self.unknown_unit {
            UnknownUnitPolicy::Ignore => {
                self.stats.ignored.fetch_add(1, Ordering::Relaxed);
                debug!("Ignoring request for unknown unit {}", unit_id);
                None
            }
            UnknownUnitPolicy::Exception => {
                self.stats.exceptions.fetch_add(1, Ordering::Relaxed);
                debug!("Unknown unit {}, answering gateway exception", unit_id);
                Some(exception_pdu(function_code, ExceptionCode::GatewayTargetDevice))
            }
        }
    }

    fn handle_broadcast(&self, pdu: &[u8]) {
        let request = match Request::decode(pdu) {
            Ok(request) if request.is_write() => request,
            Ok(request) => {
                debug!("Ignoring broadcast read {:?}", request);
                return;
            }
            Err(err) => {
                debug!("Ignoring malformed broadcast: {}", err);
                return;
            }
        };
        for slave in self.context.slaves() {
            if let Err(err) = self.execute(slave, &request) {
                warn!("Broadcast to unit {} failed: {}", slave.unit_id(), err);
            }
        }
    }

    /// Run a decoded request against one slave's tables.
    pub fn execute(&self, slave: &SlaveContext, request: &Request) -> SlaveResult<Response> {
        let response = match request {
            Request::ReadCoils { address, quantity } => {
                Response::ReadCoils(slave.coils().get(*address, *quantity)?)
            }
            Request::ReadDiscreteInputs { address, quantity } => {
                Response::ReadDiscreteInputs(slave.discrete_inputs().get(*address, *quantity)?)
            }
            Request::ReadHoldingRegisters { address, quantity } => {
                Response::ReadHoldingRegisters(slave.holding_registers().get(*address, *quantity)?)
            }
            Request::ReadInputRegisters { address, quantity } => {
                Response::ReadInputRegisters(slave.input_registers().get(*address, *quantity)?)
            }
            Request::WriteSingleCoil { address, value } => {
                slave.coils().set(*address, std::slice::from_ref(value))?;
                Response::WriteSingleCoil { address: *address, value: *value }
            }
            Request::WriteSingleRegister { address, value } => {
                slave.holding_registers().set(*address, std::slice::from_ref(value))?;
                Response::WriteSingleRegister { address: *address, value: *value }
            }
            Request::WriteMultipleCoils { address, values } => {
                slave.coils().set(*address, values)?;
                Response::WriteMultipleCoils { address: *address, quantity: values.len() as u16 }
            }
            Request::WriteMultipleRegisters { address, values } => {
                slave.holding_registers().set(*address, values)?;
                Response::WriteMultipleRegisters {
                    address: *address,
                    quantity: values.len() as u16,
                }
            }
            Request::ReadDeviceIdentification { read_code, object_id } => {
                self.identity.read(*read_code, *object_id)?
            }
        };
        Ok(response)
    }

    pub fn log_stats(&self) {
        info!(
            "📊 Protocol engine: {} request(s), {} exception(s), {} ignored",
            self.stats.requests.load(Ordering::Relaxed),
            self.stats.exceptions.load(Ordering::Relaxed),
            self.stats.ignored.load(Ordering::Relaxed)
        );
    }
}
