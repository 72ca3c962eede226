pub mod serial_transport;
pub mod server;
pub mod tcp_transport;
pub mod updater;

pub use serial_transport::SerialTransport;
pub use server::ModbusSlaveServer;
pub use tcp_transport::TcpTransport;
pub use updater::{PeriodicUpdater, Transform, UpdateWindow, UpdatedValues};
