//! Connection sessions and their I/O tasks.
//!
//! Each accepted connection becomes a [`Session`] with two tasks:
//! - a reader that decodes frames into a bounded inbound queue
//! - a writer that drains a bounded outbound queue onto the socket
//!
//! The game loop never awaits socket I/O. It polls each inbound queue with
//! `try_recv` and enqueues outbound frames with `try_send`, so a slow or
//! stalled peer can only lose its own snapshots.

use log::{debug, info, warn};
use shared::{recv_message, send_message, Message};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::task::JoinHandle;

pub type SessionId = u64;

/// Frames waiting to be written to one peer.
pub const OUTBOUND_QUEUE: usize = 32;
/// Frames read from one peer but not yet handled by the loop.
pub const INBOUND_QUEUE: usize = 64;

/// What the reader task hands to the loop.
#[derive(Debug)]
pub enum Inbound {
    Message(Message),
    /// The peer closed the stream or sent an unreadable frame.
    Closed,
}

/// Result of queueing a frame for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Outbound queue full; the frame was discarded.
    Dropped,
    /// Writer is gone; the session should be torn down.
    Closed,
}

pub struct Session {
    pub id: SessionId,
    pub addr: SocketAddr,
    /// Player slot once the session has joined.
    pub slot: Option<usize>,
    outbound: mpsc::Sender<Message>,
    inbound: mpsc::Receiver<Inbound>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Session {
    pub fn is_joined(&self) -> bool {
        self.slot.is_some()
    }

    fn deliver(&self, message: Message) -> Delivery {
        match self.outbound.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Dropped,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Stop reading and let the writer flush what is queued, then close.
    fn close(self) -> JoinHandle<()> {
        self.reader.abort();
        self.writer
    }
}

/// All live sessions, keyed by an id that is never reused.
pub struct ClientManager {
    sessions: HashMap<SessionId, Session>,
    next_id: SessionId,
}

impl ClientManager {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            next_id: 1,
        }
    }

    /// Start the reader and writer tasks for a new connection. The session
    /// starts unjoined.
    pub fn add<S>(&mut self, stream: S, addr: SocketAddr) -> SessionId
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;

        let (mut read_half, mut write_half) = tokio::io::split(stream);
        let (in_tx, in_rx) = mpsc::channel(INBOUND_QUEUE);
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);

        let reader = tokio::spawn(async move {
            loop {
                match recv_message(&mut read_half).await {
                    Ok(message) => {
                        if in_tx.send(Inbound::Message(message)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        if e.is_disconnect() {
                            debug!("Session {} closed by peer", id);
                        } else {
                            warn!("Session {} read error: {}", id, e);
                        }
                        let _ = in_tx.send(Inbound::Closed).await;
                        break;
                    }
                }
            }
        });

        let writer = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if let Err(e) = send_message(&mut write_half, &message).await {
                    debug!("Session {} write error: {}", id, e);
                    return;
                }
            }
            let _ = write_half.shutdown().await;
        });

        info!("Session {} connected from {}", id, addr);
        self.sessions.insert(
            id,
            Session {
                id,
                addr,
                slot: None,
                outbound: out_tx,
                inbound: in_rx,
                reader,
                writer,
            },
        );
        id
    }

    /// Remove a session, stopping its reader. Frames already queued are
    /// still written before the connection closes.
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        session.reader.abort();
        info!("Session {} from {} closed", id, session.addr);
        Some(session)
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn slot_of(&self, id: SessionId) -> Option<usize> {
        self.sessions.get(&id)?.slot
    }

    pub fn set_slot(&mut self, id: SessionId, slot: usize) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.slot = Some(slot);
        }
    }

    /// Session ids in connection order.
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Take at most one pending inbound item for a session.
    pub fn poll(&mut self, id: SessionId) -> Option<Inbound> {
        let session = self.sessions.get_mut(&id)?;
        match session.inbound.try_recv() {
            Ok(inbound) => Some(inbound),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Inbound::Closed),
        }
    }

    pub fn send(&self, id: SessionId, message: Message) -> Delivery {
        match self.sessions.get(&id) {
            Some(session) => session.deliver(message),
            None => Delivery::Closed,
        }
    }

    /// Queue a frame for every joined session. Returns the sessions whose
    /// writer has gone away.
    pub fn broadcast(&self, message: &Message) -> Vec<SessionId> {
        let mut closed = Vec::new();
        for session in self.sessions.values().filter(|s| s.is_joined()) {
            match session.deliver(message.clone()) {
                Delivery::Queued => {}
                Delivery::Dropped => debug!("Session {} is behind, frame dropped", session.id),
                Delivery::Closed => closed.push(session.id),
            }
        }
        closed
    }

    /// Close every session and give the writers up to `flush` to drain.
    pub async fn close_all(&mut self, flush: Duration) {
        let writers: Vec<JoinHandle<()>> = self
            .sessions
            .drain()
            .map(|(_, session)| session.close())
            .collect();

        let drained = tokio::time::timeout(flush, async {
            for writer in writers {
                let _ = writer.await;
            }
        })
        .await;
        if drained.is_err() {
            warn!("Some sessions did not flush within {:?}", flush);
        }
    }

    pub fn joined_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_joined()).count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for ClientManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::MessageType;
    use tokio::io::DuplexStream;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn connect(manager: &mut ClientManager) -> (SessionId, DuplexStream) {
        let (server_side, client_side) = tokio::io::duplex(64 * 1024);
        let id = manager.add(server_side, test_addr());
        (id, client_side)
    }

    async fn poll_until(manager: &mut ClientManager, id: SessionId) -> Inbound {
        for _ in 0..200 {
            if let Some(inbound) = manager.poll(id) {
                return inbound;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no inbound item for session {}", id);
    }

    #[tokio::test]
    async fn test_sessions_start_unjoined_with_unique_ids() {
        let mut manager = ClientManager::new();
        let (a, _ca) = connect(&mut manager);
        let (b, _cb) = connect(&mut manager);

        assert_ne!(a, b);
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.joined_count(), 0);
        assert_eq!(manager.slot_of(a), None);
        assert_eq!(manager.ids(), vec![a, b]);

        manager.set_slot(b, 3);
        assert_eq!(manager.slot_of(b), Some(3));
        assert_eq!(manager.joined_count(), 1);
    }

    #[tokio::test]
    async fn test_inbound_frames_are_queued() {
        let mut manager = ClientManager::new();
        let (id, mut client) = connect(&mut manager);

        assert!(manager.poll(id).is_none());
        send_message(&mut client, &Message::empty(MessageType::Join))
            .await
            .unwrap();
        send_message(&mut client, &Message::empty(MessageType::Pause))
            .await
            .unwrap();

        match poll_until(&mut manager, id).await {
            Inbound::Message(m) => assert_eq!(m.kind(), Some(MessageType::Join)),
            other => panic!("unexpected {:?}", other),
        }
        match poll_until(&mut manager, id).await {
            Inbound::Message(m) => assert_eq!(m.kind(), Some(MessageType::Pause)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_peer_close_is_reported() {
        let mut manager = ClientManager::new();
        let (id, client) = connect(&mut manager);
        drop(client);

        assert!(matches!(poll_until(&mut manager, id).await, Inbound::Closed));
    }

    #[tokio::test]
    async fn test_outbound_frames_reach_peer() {
        let mut manager = ClientManager::new();
        let (id, mut client) = connect(&mut manager);

        assert_eq!(manager.send(id, Message::join_ok(2)), Delivery::Queued);
        let reply = recv_message(&mut client).await.unwrap();
        assert_eq!(reply.decode_join_ok().unwrap(), 2);

        assert_eq!(manager.send(999, Message::join_ok(0)), Delivery::Closed);
    }

    #[tokio::test]
    async fn test_broadcast_skips_unjoined_sessions() {
        let mut manager = ClientManager::new();
        let (joined, mut joined_client) = connect(&mut manager);
        let (_lobby, mut lobby_client) = connect(&mut manager);
        manager.set_slot(joined, 0);

        let closed = manager.broadcast(&Message::empty(MessageType::Leave));
        assert!(closed.is_empty());

        let frame = recv_message(&mut joined_client).await.unwrap();
        assert_eq!(frame.kind(), Some(MessageType::Leave));

        let nothing = tokio::time::timeout(
            Duration::from_millis(50),
            recv_message(&mut lobby_client),
        )
        .await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn test_full_queue_drops_frames() {
        let mut manager = ClientManager::new();
        // tiny pipe so the writer stalls on the first frame
        let (server_side, _client_side) = tokio::io::duplex(8);
        let id = manager.add(server_side, test_addr());
        manager.set_slot(id, 0);

        let frame = Message::new(MessageType::Snapshot, vec![0u8; 256]);
        let mut dropped = 0;
        for _ in 0..OUTBOUND_QUEUE * 2 + 2 {
            if manager.send(id, frame.clone()) == Delivery::Dropped {
                dropped += 1;
            }
        }
        assert!(dropped > 0);
    }

    #[tokio::test]
    async fn test_removed_session_flushes_then_closes() {
        let mut manager = ClientManager::new();
        let (id, mut client) = connect(&mut manager);

        manager.send(id, Message::join_ok(1));
        let session = manager.remove(id).unwrap();
        assert!(manager.is_empty());
        drop(session);

        let reply = recv_message(&mut client).await.unwrap();
        assert_eq!(reply.decode_join_ok().unwrap(), 1);
        let eof = recv_message(&mut client).await.unwrap_err();
        assert!(eof.is_disconnect());
    }

    #[tokio::test]
    async fn test_close_all_drains_writers() {
        let mut manager = ClientManager::new();
        let (a, mut ca) = connect(&mut manager);
        let (b, mut cb) = connect(&mut manager);
        manager.set_slot(a, 0);
        manager.set_slot(b, 1);
        manager.broadcast(&Message::empty(MessageType::GameEnd));

        manager.close_all(Duration::from_secs(1)).await;
        assert!(manager.is_empty());

        for client in [&mut ca, &mut cb] {
            let frame = recv_message(&mut *client).await.unwrap();
            assert_eq!(frame.kind(), Some(MessageType::GameEnd));
            assert!(recv_message(&mut *client).await.unwrap_err().is_disconnect());
        }
    }
}
