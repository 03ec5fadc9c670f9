//! Integration tests for the snake server, client and registry
//!
//! These tests run real servers on loopback and talk to them over TCP.

use client::network::{Client, ClientError};
use server::config::{GameMode, ServerConfig};
use server::network::Server;
use shared::{
    recv_message, send_message, Direction, GameEnd, Message, MessageType, Registry, ServerInfo,
    CELL_BODY, CELL_HEAD, MAX_PAYLOAD,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct RunningServer {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<GameEnd, String>>,
}

impl RunningServer {
    async fn start(config: ServerConfig, registry: Option<Registry>) -> Self {
        let server = Server::bind(config, registry).await.unwrap();
        let addr = server.local_addr();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            server
                .run_until(async {
                    let _ = stop_rx.await;
                })
                .await
                .map_err(|e| e.to_string())
        });
        RunningServer {
            addr,
            stop: Some(stop_tx),
            handle,
        }
    }

    async fn shutdown(mut self) -> GameEnd {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.handle.await.unwrap().unwrap()
    }
}

fn temp_registry(tag: &str) -> (Registry, PathBuf) {
    let path = std::env::temp_dir().join(format!(
        "snake-it-{}-{}.txt",
        tag,
        std::process::id()
    ));
    let _ = std::fs::remove_file(&path);
    (Registry::new(path.clone()), path)
}

/// NETWORK PROTOCOL TESTS
mod protocol_tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Frames of every size up to the limit survive a real TCP hop
    #[tokio::test]
    async fn frame_round_trip_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let sizes = [0usize, 1, 7, 8, 511, 4096, MAX_PAYLOAD - 1, MAX_PAYLOAD];
        let echo = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            for _ in 0..sizes.len() {
                let message = recv_message(&mut stream).await.unwrap();
                send_message(&mut stream, &message).await.unwrap();
            }
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        for len in sizes {
            let payload: Vec<u8> = (0..len).map(|i| (i * 31 % 256) as u8).collect();
            let message = Message {
                msg_type: 9,
                payload,
            };
            send_message(&mut stream, &message).await.unwrap();
            let echoed = recv_message(&mut stream).await.unwrap();
            assert_eq!(echoed, message);
        }
        echo.await.unwrap();
    }

    /// An oversized length prefix gets the connection dropped
    #[tokio::test]
    async fn oversized_frame_closes_connection() {
        let server = RunningServer::start(ServerConfig::default(), None).await;

        let mut stream = TcpStream::connect(server.addr).await.unwrap();
        let mut header = MessageType::Join.code().to_be_bytes().to_vec();
        header.extend_from_slice(&((MAX_PAYLOAD as i32) + 1).to_be_bytes());
        tokio::io::AsyncWriteExt::write_all(&mut stream, &header)
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), recv_message(&mut stream))
            .await
            .expect("server did not close the connection");
        assert!(result.unwrap_err().is_disconnect());

        server.shutdown().await;
    }

    /// Anything but JOIN from a fresh connection closes it
    #[tokio::test]
    async fn command_before_join_closes_connection() {
        let server = RunningServer::start(ServerConfig::default(), None).await;

        let mut stream = TcpStream::connect(server.addr).await.unwrap();
        send_message(&mut stream, &Message::input(Direction::Up))
            .await
            .unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), recv_message(&mut stream))
            .await
            .expect("server did not close the connection");
        assert!(result.unwrap_err().is_disconnect());

        server.shutdown().await;
    }
}

/// CLIENT/SERVER GAMEPLAY TESTS
mod client_server_tests {
    use super::*;

    /// First JOIN on an empty open 40x20 board gets slot 0 and a snapshot
    /// showing one head with two body cells in a horizontal line behind it
    #[tokio::test]
    async fn join_spawns_horizontal_snake() {
        let server = RunningServer::start(ServerConfig::default(), None).await;

        let client = Client::connect(server.addr).await.unwrap();
        assert_eq!(client.slot(), 0);

        let state = client
            .wait_for(Duration::from_secs(2), |s| s.snapshot.is_some())
            .await
            .expect("no snapshot received");
        let snapshot = state.snapshot.unwrap();
        assert_eq!((snapshot.width, snapshot.height), (40, 20));
        assert!(snapshot.alive[0]);
        assert!(!snapshot.alive[1]);

        let heads = snapshot.positions_of(CELL_HEAD);
        let bodies = snapshot.positions_of(CELL_BODY);
        assert_eq!(heads.len(), 1);
        assert_eq!(bodies.len(), 2);

        let (hx, hy) = heads[0];
        let mut expected: Vec<(i32, i32)> = vec![
            ((hx - 1).rem_euclid(40), hy),
            ((hx - 2).rem_euclid(40), hy),
        ];
        expected.sort_unstable_by_key(|(x, y)| (*y, *x));
        assert_eq!(bodies, expected);

        let end = server.shutdown().await;
        assert_eq!(end.scores, [0; 8]);
    }

    /// With one seat, the second JOIN is refused with FULL
    #[tokio::test]
    async fn second_join_rejected_when_full() {
        let config = ServerConfig {
            max_players: 1,
            ..ServerConfig::default()
        };
        let server = RunningServer::start(config, None).await;

        let first = Client::connect(server.addr).await.unwrap();
        assert_eq!(first.slot(), 0);

        match Client::connect(server.addr).await {
            Err(ClientError::Rejected(reason)) => assert_eq!(reason, "FULL"),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(client) => panic!("joined slot {} on a full server", client.slot()),
        }

        server.shutdown().await;
    }

    /// Leaving frees the seat for the next player
    #[tokio::test]
    async fn leave_frees_slot() {
        let config = ServerConfig {
            max_players: 2,
            ..ServerConfig::default()
        };
        let server = RunningServer::start(config, None).await;

        let first = Client::connect(server.addr).await.unwrap();
        let second = Client::connect(server.addr).await.unwrap();
        assert_eq!((first.slot(), second.slot()), (0, 1));

        first.leave().await.unwrap();
        let state = second
            .wait_for(Duration::from_secs(2), |s| {
                s.snapshot.as_ref().map_or(false, |snap| !snap.alive[0])
            })
            .await;
        assert!(state.is_some(), "slot 0 still shown alive after LEAVE");

        let third = Client::connect(server.addr).await.unwrap();
        assert_eq!(third.slot(), 0);

        server.shutdown().await;
    }

    /// Dropping the connection without LEAVE frees the seat all the same
    #[tokio::test]
    async fn disconnect_frees_slot_like_leave() {
        let config = ServerConfig {
            max_players: 2,
            ..ServerConfig::default()
        };
        let server = RunningServer::start(config, None).await;

        let mut first = TcpStream::connect(server.addr).await.unwrap();
        send_message(&mut first, &Message::empty(MessageType::Join))
            .await
            .unwrap();
        let reply = recv_message(&mut first).await.unwrap();
        assert_eq!(reply.decode_join_ok().unwrap(), 0);
        let observer = Client::connect(server.addr).await.unwrap();
        assert_eq!(observer.slot(), 1);

        drop(first);
        let state = observer
            .wait_for(Duration::from_secs(2), |s| {
                s.snapshot.as_ref().map_or(false, |snap| !snap.alive[0])
            })
            .await;
        let snapshot = state
            .expect("slot 0 still shown alive after disconnect")
            .snapshot
            .unwrap();
        assert_eq!(snapshot.count_cells(CELL_HEAD), 1);

        let next = Client::connect(server.addr).await.unwrap();
        assert_eq!(next.slot(), 0);

        server.shutdown().await;
    }

    /// Pause shows up in the snapshot flags
    #[tokio::test]
    async fn pause_and_resume_are_reflected() {
        let server = RunningServer::start(ServerConfig::default(), None).await;
        let mut client = Client::connect(server.addr).await.unwrap();

        client.pause().await.unwrap();
        let paused = client
            .wait_for(Duration::from_secs(2), |s| {
                s.snapshot.as_ref().map_or(false, |snap| snap.paused[0])
            })
            .await;
        assert!(paused.is_some());

        client.resume().await.unwrap();
        let resumed = client
            .wait_for(Duration::from_secs(2), |s| {
                s.snapshot.as_ref().map_or(false, |snap| !snap.paused[0])
            })
            .await;
        assert!(resumed.is_some());

        server.shutdown().await;
    }

    /// Snakes stay put during the join freeze even when steered
    #[tokio::test]
    async fn join_freeze_holds_snake() {
        let server = RunningServer::start(ServerConfig::default(), None).await;
        let mut client = Client::connect(server.addr).await.unwrap();

        let first_state = client
            .wait_for(Duration::from_secs(2), |s| s.snapshot.is_some())
            .await
            .unwrap();
        let seen = first_state.snapshots_received;
        let first = first_state.snapshot.unwrap();
        client.steer(Direction::Up).await.unwrap();
        let later = client
            .wait_for(Duration::from_secs(2), |s| s.snapshots_received >= seen + 5)
            .await
            .unwrap()
            .snapshot
            .unwrap();
        assert_eq!(
            later.positions_of(CELL_HEAD),
            first.positions_of(CELL_HEAD)
        );

        server.shutdown().await;
    }

    /// Shutdown sends GAME_END to every joined player
    #[tokio::test]
    async fn shutdown_broadcasts_game_end() {
        let server = RunningServer::start(ServerConfig::default(), None).await;
        let a = Client::connect(server.addr).await.unwrap();
        let b = Client::connect(server.addr).await.unwrap();

        let end = server.shutdown().await;
        for client in [&a, &b] {
            let state = client
                .wait_for(Duration::from_secs(2), |s| s.game_end.is_some())
                .await
                .expect("no GAME_END");
            assert_eq!(state.game_end.unwrap().scores, end.scores);
        }
    }

    /// A timed match ends on its own
    #[tokio::test]
    async fn timed_match_ends_by_itself() {
        let config = ServerConfig {
            mode: GameMode::Timed,
            duration: Duration::from_secs(1),
            ..ServerConfig::default()
        };
        let server = RunningServer::start(config, None).await;
        let client = Client::connect(server.addr).await.unwrap();

        let state = client
            .wait_for(Duration::from_secs(5), |s| s.game_end.is_some())
            .await
            .expect("timed match did not end");
        assert!(state.game_end.unwrap().elapsed_ms >= 1000);

        let result = tokio::time::timeout(Duration::from_secs(2), server.handle)
            .await
            .unwrap();
        assert!(result.unwrap().is_ok());
    }
}

/// REGISTRY TESTS
mod registry_tests {
    use super::*;

    /// The server registers on bind and unregisters on shutdown
    #[tokio::test]
    async fn server_lifecycle_updates_registry() {
        let (registry, path) = temp_registry("lifecycle");
        let server = RunningServer::start(ServerConfig::default(), Some(registry.clone())).await;

        let live = registry.list(8).unwrap();
        assert!(live.contains(&ServerInfo::new(std::process::id(), server.addr.port())));

        server.shutdown().await;
        assert!(registry
            .entries()
            .unwrap()
            .iter()
            .all(|e| e.pid != std::process::id()));
        let _ = std::fs::remove_file(path);
    }

    /// Registry entries lead clients to a live server
    #[tokio::test]
    async fn client_finds_server_through_registry() {
        let (registry, path) = temp_registry("discovery");
        let server = RunningServer::start(ServerConfig::default(), Some(registry.clone())).await;

        let entry = registry.list(1).unwrap()[0];
        let client = Client::connect(("127.0.0.1", entry.port)).await.unwrap();
        assert_eq!(client.slot(), 0);

        server.shutdown().await;
        let _ = std::fs::remove_file(path);
    }

    /// An unwritable registry does not stop the server
    #[tokio::test]
    async fn registry_failure_is_not_fatal() {
        let registry = Registry::new("/proc/snake-arena/registry.txt");
        let server = RunningServer::start(ServerConfig::default(), Some(registry)).await;

        let client = Client::connect(server.addr).await.unwrap();
        assert_eq!(client.slot(), 0);
        server.shutdown().await;
    }
}
