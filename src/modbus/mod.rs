pub mod crc;
pub mod engine;
pub mod framer;
pub mod identity;
pub mod protocol;

pub use crc::{crc16_modbus, lrc};
pub use engine::ProtocolEngine;
pub use framer::{AsciiFramer, Framer, RequestAdu, RtuFramer, TcpFramer};
pub use identity::DeviceIdentity;
pub use protocol::{ExceptionCode, Request, Response};
