use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;

use modbus_slave_updater::config::settings::{DatastoreConfig, TcpConfig};
use modbus_slave_updater::services::{TcpTransport, UpdateWindow};
use modbus_slave_updater::{
    DeviceIdentity, MemorySink, PeriodicUpdater, ProtocolEngine, ServerContext, SnapshotSaver,
    TableKind, Transform,
};

async fn read_window(client: &mut TcpStream, transaction: u16) -> Vec<u16> {
    let mut request = transaction.to_be_bytes().to_vec();
    request.extend_from_slice(&[0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x10, 0x00, 0x05]);
    client.write_all(&request).await.unwrap();

    let mut reply = [0u8; 9 + 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply[..2], &transaction.to_be_bytes());
    assert_eq!(reply[7], 0x03);
    assert_eq!(reply[8], 10);
    reply[9..]
        .chunks(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

#[tokio::test]
async fn test_clients_see_periodic_updates() {
    let context = Arc::new(ServerContext::from_config(&[1], true, &DatastoreConfig::default()).unwrap());
    let engine = Arc::new(ProtocolEngine::new(context.clone(), DeviceIdentity::default()));
    let transport = TcpTransport::bind(&TcpConfig { bind_address: "127.0.0.1".to_string(), port: 0 })
        .await
        .unwrap();
    let addr = transport.local_addr().unwrap();
    tokio::spawn(transport.serve(engine.clone()));

    let mut client = TcpStream::connect(addr).await.unwrap();
    assert_eq!(read_window(&mut client, 1).await, vec![17; 5]);

    let sink = Arc::new(MemorySink::new());
    let updater = PeriodicUpdater::new(
        context.clone(),
        UpdateWindow { unit_id: 1, table: TableKind::HoldingRegisters, address: 16, count: 5 },
        Transform::Increment,
        Duration::from_millis(100),
        Some(SnapshotSaver::new(sink.clone())),
    );
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = updater.spawn(stop_rx);

    // Wait for the first snapshot, then stop before a second firing can land.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while sink.documents().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "updater never fired");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    stop_tx.send(true).unwrap();
    handle.await.unwrap();

    let firings = sink.documents().len() as u16;
    assert_eq!(read_window(&mut client, 2).await, vec![17 + firings; 5]);

    // A second client shares the same tables.
    let mut other = TcpStream::connect(addr).await.unwrap();
    assert_eq!(read_window(&mut other, 3).await, vec![17 + firings; 5]);
}

#[tokio::test]
async fn test_write_from_one_client_is_visible_to_another() {
    let context = Arc::new(ServerContext::from_config(&[1], true, &DatastoreConfig::default()).unwrap());
    let engine = Arc::new(ProtocolEngine::new(context, DeviceIdentity::default()));
    let transport = TcpTransport::bind(&TcpConfig { bind_address: "127.0.0.1".to_string(), port: 0 })
        .await
        .unwrap();
    let addr = transport.local_addr().unwrap();
    tokio::spawn(transport.serve(engine));

    let mut writer = TcpStream::connect(addr).await.unwrap();
    let write = [0x00, 0x07, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, 0x10, 0x01, 0x00];
    writer.write_all(&write).await.unwrap();
    let mut echo = [0u8; 12];
    writer.read_exact(&mut echo).await.unwrap();
    assert_eq!(echo, write);

    let mut reader = TcpStream::connect(addr).await.unwrap();
    assert_eq!(read_window(&mut reader, 8).await, vec![0x0100, 17, 17, 17, 17]);
}
