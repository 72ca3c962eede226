use bytes::BytesMut;
use log::{debug, error, info, warn};
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::settings::{ParityConfig, SerialConfig, SerialFramer};
use crate::modbus::engine::ProtocolEngine;
use crate::modbus::framer::{AsciiFramer, Framer, RtuFramer};
use crate::utils::error::{SlaveError, SlaveResult};

/// Serial line transport carrying RTU or ASCII frames.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    framer: Box<dyn Framer>,
    name: String,
}

pub fn framer_for(kind: SerialFramer) -> Box<dyn Framer> {
    match kind {
        SerialFramer::Rtu => Box::new(RtuFramer::new()),
        SerialFramer::Ascii => Box::new(AsciiFramer::new()),
    }
}

impl SerialTransport {
    pub fn open(config: &SerialConfig) -> SlaveResult<Self> {
        info!("🔌 Opening serial port: {}", config.port);
        info!(
            "⚙️  Configuration: {} baud, {} data bits, {:?} parity, {} stop bit(s), {:?} framing",
            config.baud_rate, config.data_bits, config.parity, config.stop_bits, config.framer
        );

        let parity = match config.parity {
            ParityConfig::None => serialport::Parity::None,
            ParityConfig::Even => serialport::Parity::Even,
            ParityConfig::Odd => serialport::Parity::Odd,
        };
        let stop_bits = match config.stop_bits {
            1 => serialport::StopBits::One,
            _ => serialport::StopBits::Two,
        };
        let data_bits = match config.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            _ => serialport::DataBits::Eight,
        };

        let port = serialport::new(&config.port, config.baud_rate)
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .open()
            .map_err(|e| {
                error!("❌ Failed to open serial port {}: {}", config.port, e);
                SlaveError::ConnectionError(format!("Failed to open port {}: {}", config.port, e))
            })?;

        info!("✅ Serial port {} ready", config.port);
        Ok(Self {
            port,
            framer: framer_for(config.framer),
            name: config.port.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serve requests until `stop` is set or the port fails. Blocking; run it
    /// on a blocking thread.
    pub fn serve(mut self, engine: Arc<ProtocolEngine>, stop: Arc<AtomicBool>) -> SlaveResult<()> {
        info!("📡 Serving {} on {}", self.framer.name(), self.name);
        serve_stream(&mut self.port, self.framer.as_mut(), &engine, &stop)
    }
}

/// Request/response loop over any byte stream whose reads time out when the
/// line goes quiet.
pub fn serve_stream<S>(
    stream: &mut S,
    framer: &mut dyn Framer,
    engine: &ProtocolEngine,
    stop: &AtomicBool,
) -> SlaveResult<()>
where
    S: Read + Write + ?Sized,
{
    let mut buf = BytesMut::with_capacity(512);
    let mut chunk = [0u8; 256];

    while !stop.load(Ordering::Relaxed) {
        match stream.read(&mut chunk) {
            Ok(0) => {
                return Err(SlaveError::TransportFailure("serial line closed".to_string()));
            }
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                loop {
                    match framer.decode(&mut buf) {
                        Ok(Some(adu)) => respond(stream, framer, engine, &adu)?,
                        Ok(None) => break,
                        Err(e) => warn!("⚠️  Dropped {} frame: {}", framer.name(), e),
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                match framer.decode_idle(&mut buf) {
                    Ok(Some(adu)) => respond(stream, framer, engine, &adu)?,
                    Ok(None) => {}
                    Err(e) => warn!("⚠️  Dropped {} frame: {}", framer.name(), e),
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                error!("❌ Serial read failed: {}", e);
                return Err(SlaveError::TransportFailure(format!("read: {}", e)));
            }
        }
    }
    debug!("Serial loop stopped");
    Ok(())
}

fn respond<S>(
    stream: &mut S,
    framer: &dyn Framer,
    engine: &ProtocolEngine,
    adu: &crate::modbus::framer::RequestAdu,
) -> SlaveResult<()>
where
    S: Write + ?Sized,
{
    let Some(pdu) = engine.handle(adu.unit_id, &adu.pdu) else {
        return Ok(());
    };
    let frame = framer.encode(adu, &pdu);
    debug!("{} tx {}", framer.name(), hex::encode(&frame));
    stream
        .write_all(&frame)
        .and_then(|_| stream.flush())
        .map_err(|e| SlaveError::TransportFailure(format!("write: {}", e)))
}
