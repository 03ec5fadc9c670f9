//! TCP client session: JOIN handshake, commands and a background receiver.

use log::{debug, info, warn};
use shared::{
    recv_message, send_message, Direction, GameEnd, Message, MessageType, ProtocolError, Snapshot,
};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Join rejected: {0}")]
    Rejected(String),
    #[error("Unexpected reply to JOIN: message type {0}")]
    UnexpectedReply(i32),
    #[error("Connection lost")]
    Disconnected,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Connection failed: {0}")]
    Io(#[from] io::Error),
}

/// Most recent server state seen by the receive task.
#[derive(Debug, Clone, Default)]
pub struct LatestState {
    pub snapshot: Option<Snapshot>,
    pub game_end: Option<GameEnd>,
    pub snapshots_received: u64,
    pub connected: bool,
}

pub struct Client {
    slot: usize,
    writer: OwnedWriteHalf,
    state: Arc<Mutex<LatestState>>,
    receiver: JoinHandle<()>,
}

impl Client {
    /// Connect, JOIN, and wait for the server's answer. On success a
    /// background task starts recording snapshots.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!("Connected to {}, joining", stream.peer_addr()?);

        send_message(&mut stream, &Message::empty(MessageType::Join)).await?;
        let reply = recv_message(&mut stream).await?;
        let slot = match reply.kind() {
            Some(MessageType::JoinOk) => reply.decode_join_ok()?,
            Some(MessageType::JoinReject) => {
                return Err(ClientError::Rejected(reply.decode_join_reject()?))
            }
            _ => return Err(ClientError::UnexpectedReply(reply.msg_type)),
        };
        let slot = usize::try_from(slot).map_err(|_| ClientError::UnexpectedReply(reply.msg_type))?;
        info!("Joined as player {} (slot {})", slot + 1, slot);

        let (reader, writer) = stream.into_split();
        let state = Arc::new(Mutex::new(LatestState {
            connected: true,
            ..LatestState::default()
        }));
        let receiver = tokio::spawn(receive_loop(reader, Arc::clone(&state)));

        Ok(Client {
            slot,
            writer,
            state,
            receiver,
        })
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn latest(&self) -> LatestState {
        lock(&self.state).clone()
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        lock(&self.state).snapshot.clone()
    }

    pub fn game_end(&self) -> Option<GameEnd> {
        lock(&self.state).game_end.clone()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    /// Poll the shared state until `ready` holds or `timeout` passes.
    pub async fn wait_for<F>(&self, timeout: Duration, mut ready: F) -> Option<LatestState>
    where
        F: FnMut(&LatestState) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let latest = self.latest();
            if ready(&latest) {
                return Some(latest);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn steer(&mut self, direction: Direction) -> Result<(), ClientError> {
        self.send(Message::input(direction)).await
    }

    pub async fn pause(&mut self) -> Result<(), ClientError> {
        self.send(Message::empty(MessageType::Pause)).await
    }

    pub async fn resume(&mut self) -> Result<(), ClientError> {
        self.send(Message::empty(MessageType::Resume)).await
    }

    pub async fn respawn(&mut self) -> Result<(), ClientError> {
        self.send(Message::empty(MessageType::Respawn)).await
    }

    /// Send LEAVE and close our side. Waits briefly for the server to close
    /// the connection.
    pub async fn leave(mut self) -> Result<(), ClientError> {
        self.send(Message::empty(MessageType::Leave)).await?;
        let _ = self.writer.shutdown().await;
        if tokio::time::timeout(Duration::from_secs(1), &mut self.receiver)
            .await
            .is_err()
        {
            self.receiver.abort();
        }
        info!("Left the match");
        Ok(())
    }

    /// Send a raw message.
    pub async fn send(&mut self, message: Message) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::Disconnected);
        }
        send_message(&mut self.writer, &message).await?;
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

fn lock(state: &Mutex<LatestState>) -> MutexGuard<'_, LatestState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Decode frames and swap them into the shared state until the stream ends.
async fn receive_loop(mut reader: OwnedReadHalf, state: Arc<Mutex<LatestState>>) {
    loop {
        let message = match recv_message(&mut reader).await {
            Ok(message) => message,
            Err(e) => {
                if e.is_disconnect() {
                    info!("Server closed the connection");
                } else {
                    warn!("Receive error: {}", e);
                }
                break;
            }
        };

        match message.kind() {
            Some(MessageType::Snapshot) => match message.decode_snapshot() {
                Ok(snapshot) => {
                    let mut latest = lock(&state);
                    latest.snapshot = Some(snapshot);
                    latest.snapshots_received += 1;
                }
                Err(e) => warn!("Bad snapshot: {}", e),
            },
            Some(MessageType::GameEnd) => match message.decode_game_end() {
                Ok(end) => {
                    info!("Game over after {} ms", end.elapsed_ms);
                    lock(&state).game_end = Some(end);
                }
                Err(e) => warn!("Bad game end: {}", e),
            },
            _ => debug!("Ignoring message type {}", message.msg_type),
        }
    }
    lock(&state).connected = false;
}
