//! Integration tests for the session server
//!
//! These tests bind a real server on loopback and talk to it over both the
//! stream and the datagram channel.

use server::{Server, ServerConfig, World};
use shared::{ClientMessage, Quat, ServerMessage, Vec3, MOVEMENT_INPUTS};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_test::assert_ok;

const WAIT: Duration = Duration::from_secs(3);

struct TestServer {
    addr: SocketAddr,
    handle: JoinHandle<Result<(), server::SessionError>>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn start_server(max_slots: usize) -> TestServer {
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        max_slots,
        tick_rate: 60,
        ..ServerConfig::default()
    };
    let server = Server::bind(&config, World::with_layout(Vec::new(), None))
        .await
        .unwrap();
    let addr = server.tcp_addr().unwrap();
    TestServer {
        addr,
        handle: tokio::spawn(server.run()),
    }
}

async fn read_message(stream: &mut TcpStream) -> ServerMessage {
    let read = async {
        let mut length = [0u8; 4];
        stream.read_exact(&mut length).await?;
        let mut frame = length.to_vec();
        frame.resize(4 + i32::from_le_bytes(length) as usize, 0);
        stream.read_exact(&mut frame[4..]).await?;
        Ok::<_, std::io::Error>(frame)
    };
    let frame = assert_ok!(timeout(WAIT, read).await.unwrap());
    assert_ok!(ServerMessage::from_frame(&frame))
}

/// Connects and returns the stream with the slot the server greeted us with.
async fn connect(addr: SocketAddr) -> (TcpStream, i32) {
    let mut stream = assert_ok!(TcpStream::connect(addr).await);
    match read_message(&mut stream).await {
        ServerMessage::Welcome { message, client_id } => {
            assert_eq!(message, "Welcome to the server!");
            (stream, client_id)
        }
        other => panic!("Expected welcome, got {:?}", other),
    }
}

async fn send(stream: &mut TcpStream, message: &ClientMessage) {
    assert_ok!(stream.write_all(&message.to_frame().unwrap()).await);
}

/// Connects and completes the handshake, consuming our own spawn.
async fn join(addr: SocketAddr, username: &str) -> (TcpStream, i32) {
    let (mut stream, slot) = connect(addr).await;
    send(
        &mut stream,
        &ClientMessage::WelcomeReceived {
            client_id: slot,
            username: username.to_string(),
        },
    )
    .await;
    loop {
        if let ServerMessage::SpawnPlayer { id, .. } = read_message(&mut stream).await {
            if id == slot {
                return (stream, slot);
            }
        }
    }
}

fn movement(forward: bool) -> ClientMessage {
    let mut inputs = vec![false; MOVEMENT_INPUTS];
    inputs[0] = forward;
    ClientMessage::PlayerMovement {
        inputs,
        rotation: Quat::IDENTITY,
    }
}

/// HANDSHAKE AND REPLICATION TESTS
mod handshake_tests {
    use super::*;

    /// Tests greeting, spawn replication order and slot numbering
    #[tokio::test]
    async fn two_clients_see_each_other() {
        let server = start_server(4).await;

        let (mut ann, ann_slot) = connect(server.addr).await;
        assert_eq!(ann_slot, 1);
        send(
            &mut ann,
            &ClientMessage::WelcomeReceived {
                client_id: 1,
                username: "Ann".to_string(),
            },
        )
        .await;
        match read_message(&mut ann).await {
            ServerMessage::SpawnPlayer {
                id,
                username,
                position,
                rotation,
            } => {
                assert_eq!(id, 1);
                assert_eq!(username, "Ann");
                assert_eq!(position, Vec3::new(0.0, 0.5, 0.0));
                assert_eq!(rotation, Quat::IDENTITY);
            }
            other => panic!("Expected spawn, got {:?}", other),
        }

        let (mut bo, bo_slot) = connect(server.addr).await;
        assert_eq!(bo_slot, 2);
        send(
            &mut bo,
            &ClientMessage::WelcomeReceived {
                client_id: 2,
                username: "Bo".to_string(),
            },
        )
        .await;

        assert!(matches!(
            read_message(&mut bo).await,
            ServerMessage::SpawnPlayer { id: 1, ref username, .. } if username == "Ann"
        ));
        assert!(matches!(
            read_message(&mut bo).await,
            ServerMessage::SpawnPlayer { id: 2, ref username, .. } if username == "Bo"
        ));
        assert!(matches!(
            read_message(&mut ann).await,
            ServerMessage::SpawnPlayer { id: 2, .. }
        ));
    }

    /// Tests a handshake split into single-byte writes and one coalesced
    /// with the next message
    #[tokio::test]
    async fn split_and_coalesced_frames() {
        let server = start_server(4).await;

        let (mut ann, slot) = connect(server.addr).await;
        let handshake = ClientMessage::WelcomeReceived {
            client_id: slot,
            username: "Ann".to_string(),
        }
        .to_frame()
        .unwrap();
        for byte in &handshake {
            assert_ok!(ann.write_all(std::slice::from_ref(byte)).await);
            assert_ok!(ann.flush().await);
            sleep(Duration::from_millis(2)).await;
        }
        assert!(matches!(
            read_message(&mut ann).await,
            ServerMessage::SpawnPlayer { id: 1, .. }
        ));

        let (mut bo, slot) = connect(server.addr).await;
        let mut batch = ClientMessage::WelcomeReceived {
            client_id: slot,
            username: "Bo".to_string(),
        }
        .to_frame()
        .unwrap();
        batch.extend(
            ClientMessage::PlayerShoot {
                direction: Vec3::UP,
            }
            .to_frame()
            .unwrap(),
        );
        assert_ok!(bo.write_all(&batch).await);

        assert!(matches!(
            read_message(&mut bo).await,
            ServerMessage::SpawnPlayer { id: 1, .. }
        ));
        assert!(matches!(
            read_message(&mut bo).await,
            ServerMessage::SpawnPlayer { id: 2, .. }
        ));
    }
}

/// DISCONNECT AND CAPACITY TESTS
mod lifecycle_tests {
    use super::*;

    /// Tests that a zero length prefix drops only the offending client
    #[tokio::test]
    async fn zero_length_frame_disconnects_sender_only() {
        let server = start_server(4).await;
        let (mut ann, _) = join(server.addr, "Ann").await;
        let (mut bo, _) = join(server.addr, "Bo").await;
        // Bo's spawn also reached Ann
        assert!(matches!(
            read_message(&mut ann).await,
            ServerMessage::SpawnPlayer { id: 2, .. }
        ));

        assert_ok!(ann.write_all(&[0, 0, 0, 0]).await);

        assert_eq!(
            read_message(&mut bo).await,
            ServerMessage::PlayerDisconnected { id: 1 }
        );
        let mut buf = [0u8; 16];
        let closed = timeout(WAIT, ann.read(&mut buf)).await.unwrap();
        assert!(matches!(closed, Ok(0) | Err(_)));
    }

    /// Tests that a closed stream frees its slot for the next arrival
    #[tokio::test]
    async fn slot_is_reused_after_disconnect() {
        let server = start_server(1).await;
        let (ann, slot) = join(server.addr, "Ann").await;
        assert_eq!(slot, 1);
        drop(ann);

        let mut reused = None;
        for _ in 0..50 {
            sleep(Duration::from_millis(20)).await;
            let mut stream = assert_ok!(TcpStream::connect(server.addr).await);
            let mut length = [0u8; 4];
            let greeted = timeout(Duration::from_millis(200), stream.read_exact(&mut length)).await;
            if let Ok(Ok(_)) = greeted {
                let mut frame = length.to_vec();
                frame.resize(4 + i32::from_le_bytes(length) as usize, 0);
                assert_ok!(stream.read_exact(&mut frame[4..]).await);
                reused = Some(assert_ok!(ServerMessage::from_frame(&frame)));
                break;
            }
        }
        assert!(matches!(
            reused,
            Some(ServerMessage::Welcome { client_id: 1, .. })
        ));
    }

    /// Tests that a connection beyond capacity is closed without a slot
    #[tokio::test]
    async fn server_full_rejects_connection() {
        let server = start_server(1).await;
        let (_ann, _) = connect(server.addr).await;

        let mut extra = assert_ok!(TcpStream::connect(server.addr).await);
        let mut buf = [0u8; 16];
        let result = timeout(WAIT, extra.read(&mut buf)).await.unwrap();
        assert!(matches!(result, Ok(0) | Err(_)));
    }
}

/// DATAGRAM CHANNEL TESTS
mod datagram_tests {
    use super::*;

    /// Tests endpoint binding and movement replicated as position datagrams
    #[tokio::test]
    async fn movement_produces_position_datagrams() {
        let server = start_server(4).await;
        let (_ann, slot) = join(server.addr, "Ann").await;

        let socket = assert_ok!(UdpSocket::bind("127.0.0.1:0").await);
        assert_ok!(socket.connect(server.addr).await);
        assert_ok!(socket.send(&movement(false).to_datagram(slot).unwrap()).await);

        let walk = movement(true).to_datagram(slot).unwrap();
        let mut buf = [0u8; 1024];
        let mut furthest = 0.0f32;
        let deadline = tokio::time::Instant::now() + WAIT;

        while furthest < 1.0 && tokio::time::Instant::now() < deadline {
            assert_ok!(socket.send(&walk).await);
            if let Ok(Ok(len)) = timeout(Duration::from_millis(50), socket.recv(&mut buf)).await {
                if let Ok(ServerMessage::PlayerPosition { id, position }) =
                    ServerMessage::from_frame(&buf[..len])
                {
                    assert_eq!(id, slot);
                    furthest = furthest.max(position.z);
                }
            }
        }
        assert!(furthest >= 1.0, "player only reached z = {}", furthest);
    }

    /// Tests that datagrams from a second address never reach the slot
    #[tokio::test]
    async fn mismatched_source_is_ignored() {
        let server = start_server(4).await;
        let (_ann, slot) = join(server.addr, "Ann").await;

        let owner = assert_ok!(UdpSocket::bind("127.0.0.1:0").await);
        assert_ok!(owner.connect(server.addr).await);
        assert_ok!(owner.send(&movement(false).to_datagram(slot).unwrap()).await);

        // wait for the owner's position stream so the binding is in place
        let mut buf = [0u8; 1024];
        assert_ok!(timeout(WAIT, owner.recv(&mut buf)).await);

        let intruder = assert_ok!(UdpSocket::bind("127.0.0.1:0").await);
        assert_ok!(intruder.connect(server.addr).await);
        let walk = movement(true).to_datagram(slot).unwrap();
        for _ in 0..10 {
            assert_ok!(intruder.send(&walk).await);
            sleep(Duration::from_millis(20)).await;
        }

        // the intruder is never bound, so it hears nothing
        assert!(timeout(Duration::from_millis(200), intruder.recv(&mut buf))
            .await
            .is_err());

        // and the player did not move
        let mut latest = None;
        for _ in 0..5 {
            if let Ok(Ok(len)) = timeout(Duration::from_millis(100), owner.recv(&mut buf)).await {
                if let Ok(ServerMessage::PlayerPosition { position, .. }) =
                    ServerMessage::from_frame(&buf[..len])
                {
                    latest = Some(position);
                }
            }
        }
        let position = latest.expect("owner stopped receiving positions");
        assert_eq!(position.x, 0.0);
        assert_eq!(position.z, 0.0);
    }
}
