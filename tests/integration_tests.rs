//! End-to-end tunnel tests over real loopback sockets.

use shroud_core::Role;
use shroud_integration_tests::{spawn_endpoint, start_tunnel, unused_tcp_addr};
use shroud_transport::TransportKind;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const SECRET: &str = "swordfish";
const STEP: Duration = Duration::from_secs(10);

async fn ping_through_tunnel(transport: TransportKind) {
    let far = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let entry = start_tunnel(far.local_addr().unwrap(), transport, SECRET, SECRET).await;

    let mut client = TcpStream::connect(entry).await.unwrap();
    client.write_all(b"PING").await.unwrap();

    let (mut peer, _) = timeout(STEP, far.accept()).await.unwrap().unwrap();
    let mut buf = [0u8; 4];
    timeout(STEP, peer.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"PING");

    peer.write_all(b"PONG").await.unwrap();
    timeout(STEP, client.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"PONG");
}

#[tokio::test]
async fn test_ping_over_tcp() {
    ping_through_tunnel(TransportKind::Tcp).await;
}

#[tokio::test]
async fn test_ping_over_arq() {
    ping_through_tunnel(TransportKind::Arq).await;
}

#[tokio::test]
async fn test_mismatched_secrets_deliver_garbage() {
    let far = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let entry = start_tunnel(
        far.local_addr().unwrap(),
        TransportKind::Tcp,
        "swordfish",
        "SWORDFISH",
    )
    .await;

    let mut client = TcpStream::connect(entry).await.unwrap();
    client.write_all(b"PING").await.unwrap();

    let (mut peer, _) = timeout(STEP, far.accept()).await.unwrap().unwrap();
    let mut buf = [0u8; 4];
    timeout(STEP, peer.read_exact(&mut buf)).await.unwrap().unwrap();
    // Same length, wrong bytes: nothing detects the mismatch
    assert_ne!(&buf, b"PING");
}

#[tokio::test]
async fn test_dial_failure_does_not_stop_accepting() {
    let destination = unused_tcp_addr();
    let entry = spawn_endpoint(Role::A, destination, TransportKind::Tcp, SECRET).await;

    // Peer not up yet: the connection is dropped
    let mut first = TcpStream::connect(entry).await.unwrap();
    let mut buf = Vec::new();
    let result = timeout(STEP, first.read_to_end(&mut buf))
        .await
        .expect("failed connection was left open");
    assert!(result.is_err() || buf.is_empty());

    // Peer comes up on the same address; the same listener now relays
    let far = TcpListener::bind(destination).await.unwrap();
    let mut second = TcpStream::connect(entry).await.unwrap();
    second.write_all(b"again").await.unwrap();

    let (raw, _) = timeout(STEP, far.accept()).await.unwrap().unwrap();
    let mut tunnel = shroud_crypto::CipherStream::new(shroud_integration_tests::key(SECRET), raw)
        .await
        .unwrap();
    let mut buf = [0u8; 5];
    timeout(STEP, tunnel.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"again");
}

async fn client_close_reaches_destination(transport: TransportKind) {
    let far = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let entry = start_tunnel(far.local_addr().unwrap(), transport, SECRET, SECRET).await;

    let mut client = TcpStream::connect(entry).await.unwrap();
    client.write_all(b"last words").await.unwrap();
    drop(client);

    let (mut peer, _) = timeout(STEP, far.accept()).await.unwrap().unwrap();
    let mut received = Vec::new();
    timeout(STEP, peer.read_to_end(&mut received))
        .await
        .expect("teardown did not reach the destination")
        .unwrap();
    assert_eq!(received, b"last words");
}

#[tokio::test]
async fn test_client_close_tears_down_tcp_tunnel() {
    client_close_reaches_destination(TransportKind::Tcp).await;
}

#[tokio::test]
async fn test_client_close_tears_down_arq_tunnel() {
    client_close_reaches_destination(TransportKind::Arq).await;
}

#[tokio::test]
async fn test_destination_close_reaches_client() {
    let far = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let entry = start_tunnel(far.local_addr().unwrap(), TransportKind::Tcp, SECRET, SECRET).await;

    let mut client = TcpStream::connect(entry).await.unwrap();
    client.write_all(b"hello").await.unwrap();

    let (mut peer, _) = timeout(STEP, far.accept()).await.unwrap().unwrap();
    let mut buf = [0u8; 5];
    peer.read_exact(&mut buf).await.unwrap();
    peer.write_all(b"bye").await.unwrap();
    drop(peer);

    let mut received = Vec::new();
    timeout(STEP, client.read_to_end(&mut received))
        .await
        .expect("teardown did not reach the client")
        .unwrap();
    assert_eq!(received, b"bye");
}

#[tokio::test]
async fn test_concurrent_connections_are_independent() {
    let far = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let entry = start_tunnel(far.local_addr().unwrap(), TransportKind::Arq, SECRET, SECRET).await;

    // Echo every destination connection back
    tokio::spawn(async move {
        while let Ok((mut conn, _)) = far.accept().await {
            tokio::spawn(async move {
                let (mut rx, mut tx) = conn.split();
                let _ = tokio::io::copy(&mut rx, &mut tx).await;
            });
        }
    });

    let mut clients = Vec::new();
    for i in 0..8u8 {
        clients.push(tokio::spawn(async move {
            let mut conn = TcpStream::connect(entry).await.unwrap();
            let payload: Vec<u8> = (0..64 * 1024).map(|j| (j as u8) ^ i).collect();
            conn.write_all(&payload).await.unwrap();

            let mut echoed = vec![0u8; payload.len()];
            timeout(STEP, conn.read_exact(&mut echoed)).await.unwrap().unwrap();
            assert_eq!(echoed, payload);
        }));
    }

    for client in clients {
        client.await.unwrap();
    }
}

#[tokio::test]
async fn test_large_transfer_over_arq() {
    let far = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let entry = start_tunnel(far.local_addr().unwrap(), TransportKind::Arq, SECRET, SECRET).await;

    let payload: Vec<u8> = (0..2_000_000u32).map(|i| (i % 239) as u8).collect();
    let expected = payload.clone();

    let sender = tokio::spawn(async move {
        let mut client = TcpStream::connect(entry).await.unwrap();
        client.write_all(&payload).await.unwrap();
        client.shutdown().await.unwrap();
        client
    });

    let (mut peer, _) = timeout(STEP, far.accept()).await.unwrap().unwrap();
    let mut received = Vec::new();
    timeout(Duration::from_secs(30), peer.read_to_end(&mut received))
        .await
        .expect("transfer did not finish")
        .unwrap();
    assert_eq!(received.len(), expected.len());
    assert!(received == expected);
    drop(sender.await.unwrap());
}
