//! Modbus PDU layout: function codes, request decoding, response encoding.
//!
//! Everything here works on the bare PDU (function code + data). Unit ids,
//! checksums and MBAP headers belong to the framers.

use std::fmt;

use crate::utils::error::SlaveError;

pub const READ_COILS: u8 = 0x01;
pub const READ_DISCRETE_INPUTS: u8 = 0x02;
pub const READ_HOLDING_REGISTERS: u8 = 0x03;
pub const READ_INPUT_REGISTERS: u8 = 0x04;
pub const WRITE_SINGLE_COIL: u8 = 0x05;
pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const WRITE_MULTIPLE_COILS: u8 = 0x0F;
pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
pub const ENCAPSULATED_INTERFACE: u8 = 0x2B;

pub const MEI_READ_DEVICE_ID: u8 = 0x0E;

/// Per-request limits from the Modbus application protocol.
pub const MAX_READ_BITS: u16 = 2000;
pub const MAX_READ_WORDS: u16 = 125;
pub const MAX_WRITE_BITS: u16 = 1968;
pub const MAX_WRITE_WORDS: u16 = 123;

const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    GatewayTargetDevice = 0x0B,
}

impl ExceptionCode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExceptionCode::IllegalFunction => "IllegalFunction",
            ExceptionCode::IllegalDataAddress => "IllegalDataAddress",
            ExceptionCode::IllegalDataValue => "IllegalDataValue",
            ExceptionCode::ServerDeviceFailure => "ServerDeviceFailure",
            ExceptionCode::GatewayTargetDevice => "GatewayTargetDeviceFailedToRespond",
        };
        write!(f, "{} (0x{:02X})", name, self.code())
    }
}

impl From<&SlaveError> for ExceptionCode {
    fn from(err: &SlaveError) -> Self {
        match err {
            SlaveError::IllegalFunction(_) => ExceptionCode::IllegalFunction,
            SlaveError::IllegalAddress { .. } | SlaveError::UnknownObject(_) => {
                ExceptionCode::IllegalDataAddress
            }
            SlaveError::IllegalDataValue(_) => ExceptionCode::IllegalDataValue,
            SlaveError::UnknownUnit(_) => ExceptionCode::GatewayTargetDevice,
            _ => ExceptionCode::ServerDeviceFailure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadCoils { address: u16, quantity: u16 },
    ReadDiscreteInputs { address: u16, quantity: u16 },
    ReadHoldingRegisters { address: u16, quantity: u16 },
    ReadInputRegisters { address: u16, quantity: u16 },
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { address: u16, values: Vec<bool> },
    WriteMultipleRegisters { address: u16, values: Vec<u16> },
    ReadDeviceIdentification { read_code: u8, object_id: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadCoils(Vec<bool>),
    ReadDiscreteInputs(Vec<bool>),
    ReadHoldingRegisters(Vec<u16>),
    ReadInputRegisters(Vec<u16>),
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { address: u16, quantity: u16 },
    WriteMultipleRegisters { address: u16, quantity: u16 },
    ReadDeviceIdentification {
        read_code: u8,
        conformity_level: u8,
        more_follows: bool,
        next_object_id: u8,
        objects: Vec<(u8, Vec<u8>)>,
    },
}

fn word(data: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_be_bytes([*data.get(at)?, *data.get(at + 1)?]))
}

fn truncated(fc: u8) -> SlaveError {
    SlaveError::IllegalDataValue(format!("truncated request for function 0x{:02X}", fc))
}

fn check_quantity(fc: u8, quantity: u16, max: u16) -> Result<(), SlaveError> {
    if quantity == 0 || quantity > max {
        return Err(SlaveError::IllegalDataValue(format!(
            "function 0x{:02X} quantity {} outside 1..={}",
            fc, quantity, max
        )));
    }
    Ok(())
}

/// Unpack `quantity` bits, least significant bit of the first byte first.
pub fn unpack_bits(bytes: &[u8], quantity: usize) -> Vec<bool> {
    (0..quantity)
        .map(|i| bytes[i / 8] & (1 << (i % 8)) != 0)
        .collect()
}

pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

impl Request {
    /// Decode a request PDU. Quantity limits and value-count consistency are
    /// checked here, before any storage is touched.
    pub fn decode(pdu: &[u8]) -> Result<Self, SlaveError> {
        let (&fc, data) = pdu
            .split_first()
            .ok_or_else(|| SlaveError::IllegalDataValue("empty PDU".to_string()))?;

        match fc {
            READ_COILS | READ_DISCRETE_INPUTS | READ_HOLDING_REGISTERS | READ_INPUT_REGISTERS => {
                if data.len() != 4 {
                    return Err(truncated(fc));
                }
                let address = word(data, 0).ok_or_else(|| truncated(fc))?;
                let quantity = word(data, 2).ok_or_else(|| truncated(fc))?;
                let max = if fc == READ_COILS || fc == READ_DISCRETE_INPUTS {
                    MAX_READ_BITS
                } else {
                    MAX_READ_WORDS
                };
                check_quantity(fc, quantity, max)?;
                Ok(match fc {
                    READ_COILS => Request::ReadCoils { address, quantity },
                    READ_DISCRETE_INPUTS => Request::ReadDiscreteInputs { address, quantity },
                    READ_HOLDING_REGISTERS => Request::ReadHoldingRegisters { address, quantity },
                    _ => Request::ReadInputRegisters { address, quantity },
                })
            }
            WRITE_SINGLE_COIL => {
                if data.len() != 4 {
                    return Err(truncated(fc));
                }
                let address = word(data, 0).ok_or_else(|| truncated(fc))?;
                let value = match word(data, 2).ok_or_else(|| truncated(fc))? {
                    COIL_ON => true,
                    COIL_OFF => false,
                    other => {
                        return Err(SlaveError::IllegalDataValue(format!(
                            "coil value 0x{:04X} is neither 0xFF00 nor 0x0000",
                            other
                        )))
                    }
                };
                Ok(Request::WriteSingleCoil { address, value })
            }
            WRITE_SINGLE_REGISTER => {
                if data.len() != 4 {
                    return Err(truncated(fc));
                }
                let address = word(data, 0).ok_or_else(|| truncated(fc))?;
                let value = word(data, 2).ok_or_else(|| truncated(fc))?;
                Ok(Request::WriteSingleRegister { address, value })
            }
            WRITE_MULTIPLE_COILS | WRITE_MULTIPLE_REGISTERS => {
                if data.len() < 5 {
                    return Err(truncated(fc));
                }
                let address = word(data, 0).ok_or_else(|| truncated(fc))?;
                let quantity = word(data, 2).ok_or_else(|| truncated(fc))?;
                let byte_count = data[4] as usize;
                let values = &data[5..];

                let (max, expected_bytes) = if fc == WRITE_MULTIPLE_COILS {
                    (MAX_WRITE_BITS, (quantity as usize).div_ceil(8))
                } else {
                    (MAX_WRITE_WORDS, quantity as usize * 2)
                };
                check_quantity(fc, quantity, max)?;
                if byte_count != expected_bytes || values.len() != byte_count {
                    return Err(SlaveError::IllegalDataValue(format!(
                        "function 0x{:02X} quantity {} needs {} byte(s), byte count {} with {} supplied",
                        fc,
                        quantity,
                        expected_bytes,
                        byte_count,
                        values.len()
                    )));
                }

                if fc == WRITE_MULTIPLE_COILS {
                    Ok(Request::WriteMultipleCoils {
                        address,
                        values: unpack_bits(values, quantity as usize),
                    })
                } else {
                    Ok(Request::WriteMultipleRegisters {
                        address,
                        values: values
                            .chunks_exact(2)
                            .map(|c| u16::from_be_bytes([c[0], c[1]]))
                            .collect(),
                    })
                }
            }
            ENCAPSULATED_INTERFACE => {
                match data.first() {
                    Some(&MEI_READ_DEVICE_ID) => {}
                    Some(_) => return Err(SlaveError::IllegalFunction(fc)),
                    None => return Err(truncated(fc)),
                }
                if data.len() != 3 {
                    return Err(truncated(fc));
                }
                Ok(Request::ReadDeviceIdentification {
                    read_code: data[1],
                    object_id: data[2],
                })
            }
            other => Err(SlaveError::IllegalFunction(other)),
        }
    }

    pub fn function_code(&self) -> u8 {
        match self {
            Request::ReadCoils { .. } => READ_COILS,
            Request::ReadDiscreteInputs { .. } => READ_DISCRETE_INPUTS,
            Request::ReadHoldingRegisters { .. } => READ_HOLDING_REGISTERS,
            Request::ReadInputRegisters { .. } => READ_INPUT_REGISTERS,
            Request::WriteSingleCoil { .. } => WRITE_SINGLE_COIL,
            Request::WriteSingleRegister { .. } => WRITE_SINGLE_REGISTER,
            Request::WriteMultipleCoils { .. } => WRITE_MULTIPLE_COILS,
            Request::WriteMultipleRegisters { .. } => WRITE_MULTIPLE_REGISTERS,
            Request::ReadDeviceIdentification { .. } => ENCAPSULATED_INTERFACE,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Request::WriteSingleCoil { .. }
                | Request::WriteSingleRegister { .. }
                | Request::WriteMultipleCoils { .. }
                | Request::WriteMultipleRegisters { .. }
        )
    }
}

impl Response {
    pub fn function_code(&self) -> u8 {
        match self {
            Response::ReadCoils(_) => READ_COILS,
            Response::ReadDiscreteInputs(_) => READ_DISCRETE_INPUTS,
            Response::ReadHoldingRegisters(_) => READ_HOLDING_REGISTERS,
            Response::ReadInputRegisters(_) => READ_INPUT_REGISTERS,
            Response::WriteSingleCoil { .. } => WRITE_SINGLE_COIL,
            Response::WriteSingleRegister { .. } => WRITE_SINGLE_REGISTER,
            Response::WriteMultipleCoils { .. } => WRITE_MULTIPLE_COILS,
            Response::WriteMultipleRegisters { .. } => WRITE_MULTIPLE_REGISTERS,
            Response::ReadDeviceIdentification { .. } => ENCAPSULATED_INTERFACE,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut pdu = vec![self.function_code()];
        match self {
            Response::ReadCoils(bits) | Response::ReadDiscreteInputs(bits) => {
                let packed = pack_bits(bits);
                pdu.push(packed.len() as u8);
                pdu.extend_from_slice(&packed);
            }
            Response::ReadHoldingRegisters(words) | Response::ReadInputRegisters(words) => {
                pdu.push((words.len() * 2) as u8);
                for w in words {
                    pdu.extend_from_slice(&w.to_be_bytes());
                }
            }
            Response::WriteSingleCoil { address, value } => {
                pdu.extend_from_slice(&address.to_be_bytes());
                let raw = if *value { COIL_ON } else { COIL_OFF };
                pdu.extend_from_slice(&raw.to_be_bytes());
            }
            Response::WriteSingleRegister { address, value } => {
                pdu.extend_from_slice(&address.to_be_bytes());
                pdu.extend_from_slice(&value.to_be_bytes());
            }
            Response::WriteMultipleCoils { address, quantity }
            | Response::WriteMultipleRegisters { address, quantity } => {
                pdu.extend_from_slice(&address.to_be_bytes());
                pdu.extend_from_slice(&quantity.to_be_bytes());
            }
            Response::ReadDeviceIdentification {
                read_code,
                conformity_level,
                more_follows,
                next_object_id,
                objects,
            } => {
                pdu.push(MEI_READ_DEVICE_ID);
                pdu.push(*read_code);
                pdu.push(*conformity_level);
                pdu.push(if *more_follows { 0xFF } else { 0x00 });
                pdu.push(*next_object_id);
                pdu.push(objects.len() as u8);
                for (id, value) in objects {
                    pdu.push(*id);
                    pdu.push(value.len() as u8);
                    pdu.extend_from_slice(value);
                }
            }
        }
        pdu
    }
}

/// Two-byte exception PDU: function code with the high bit set, then the code.
pub fn exception_pdu(function_code: u8, code: ExceptionCode) -> Vec<u8> {
    vec![function_code | 0x80, code.code()]
}
