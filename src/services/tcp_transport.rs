use bytes::BytesMut;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::config::settings::TcpConfig;
use crate::modbus::engine::ProtocolEngine;
use crate::modbus::framer::{Framer, TcpFramer};
use crate::utils::error::{SlaveError, SlaveResult};

/// Modbus TCP listener. Each client connection gets its own task; they share
/// the engine and therefore the same register banks.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    pub async fn bind(config: &TcpConfig) -> SlaveResult<Self> {
        let address = format!("{}:{}", config.bind_address, config.port);
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            error!("❌ Failed to bind Modbus TCP server on {}: {}", address, e);
            SlaveError::TransportFailure(format!("bind {}: {}", address, e))
        })?;
        info!("🔌 Modbus TCP server listening on {}", address);
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> SlaveResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever. Only a failing listener ends the loop.
    pub async fn serve(self, engine: Arc<ProtocolEngine>) -> SlaveResult<()> {
        loop {
            let (stream, peer) = self.listener.accept().await.map_err(|e| {
                error!("❌ Failed to accept connection: {}", e);
                SlaveError::TransportFailure(format!("accept: {}", e))
            })?;
            info!("🔗 Modbus TCP client connected: {}", peer);
            let engine = engine.clone();
            tokio::spawn(async move {
                match handle_client(stream, &engine).await {
                    Ok(()) => info!("👋 Client {} disconnected", peer),
                    Err(e) => warn!("Client {} dropped: {}", peer, e),
                }
            });
        }
    }
}

async fn handle_client(mut stream: TcpStream, engine: &ProtocolEngine) -> SlaveResult<()> {
    let mut framer = TcpFramer::new();
    let mut buf = BytesMut::with_capacity(512);

    loop {
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        loop {
            let adu = match framer.decode(&mut buf) {
                Ok(Some(adu)) => adu,
                Ok(None) => break,
                Err(e) => {
                    warn!("⚠️  Dropped TCP frame: {}", e);
                    continue;
                }
            };
            let Some(pdu) = engine.handle(adu.unit_id, &adu.pdu) else {
                continue;
            };
            let frame = framer.encode(&adu, &pdu);
            debug!("TCP tx {} byte(s) for transaction {:?}", frame.len(), adu.transaction_id);
            stream.write_all(&frame).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::DatastoreConfig;
    use crate::datastore::ServerContext;
    use crate::modbus::identity::DeviceIdentity;

    async fn start() -> SocketAddr {
        let context = ServerContext::from_config(&[1], true, &DatastoreConfig::default()).unwrap();
        let engine = Arc::new(ProtocolEngine::new(Arc::new(context), DeviceIdentity::default()));
        let transport = TcpTransport::bind(&TcpConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
        })
        .await
        .unwrap();
        let addr = transport.local_addr().unwrap();
        tokio::spawn(transport.serve(engine));
        addr
    }

    #[tokio::test]
    async fn test_request_response_over_loopback() {
        let addr = start().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(&[0x00, 0x2A, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x01, 0x00, 0x02])
            .await
            .unwrap();
        let mut reply = [0u8; 13];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(
            reply,
            [0x00, 0x2A, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x00, 0x11, 0x00, 0x11]
        );
    }

    #[tokio::test]
    async fn test_exception_over_loopback() {
        let addr = start().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x05])
            .await
            .unwrap();
        let mut reply = [0u8; 9];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x02]);
    }
}
