//! Server core: TCP accept, session dispatch and the fixed-rate game loop.

use crate::client_manager::{ClientManager, Delivery, Inbound, SessionId};
use crate::config::ServerConfig;
use crate::game::Game;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use shared::{Direction, GameEnd, Message, MessageType, Registry, ServerInfo};
use std::future::Future;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

pub const TICK_INTERVAL: Duration = Duration::from_millis(30);
pub const SNAPSHOT_INTERVAL: Duration = Duration::from_millis(100);
/// How long shutdown waits for writers to flush GAME_END.
pub const SHUTDOWN_FLUSH: Duration = Duration::from_millis(500);
const ACCEPT_BACKLOG: usize = 16;

/// Main server coordinating networking and game simulation
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    config: ServerConfig,
    game: Game,
    sessions: ClientManager,
    registry: Option<Registry>,
}

impl Server {
    /// Validate the configuration, build the world, bind `127.0.0.1:<port>`
    /// and register this process in `registry` if one is given.
    pub async fn bind(
        config: ServerConfig,
        registry: Option<Registry>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let config = config.validated()?;
        let game = Game::from_config(&config, Instant::now())?;

        let listener = TcpListener::bind(("127.0.0.1", config.port)).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        if let Some(registry) = &registry {
            let entry = ServerInfo::current(local_addr.port());
            match registry.add(entry) {
                Ok(()) => info!("Registered {} in {}", entry, registry.path().display()),
                Err(e) => warn!("Failed to register server: {}", e),
            }
        }

        Ok(Server {
            listener: Some(listener),
            local_addr,
            config,
            game,
            sessions: ClientManager::new(),
            registry,
        })
    }

    /// Replace the simulation's random source.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.game = self.game.with_rng(rng);
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    /// Run the match until it ends on its own or `shutdown` resolves.
    /// Returns the final scores that were sent to the players.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<GameEnd, Box<dyn std::error::Error>>
    where
        F: Future<Output = ()>,
    {
        let listener = self.listener.take().ok_or("server is already running")?;
        let (conn_tx, mut conn_rx) = mpsc::channel(ACCEPT_BACKLOG);
        let acceptor = tokio::spawn(accept_loop(listener, conn_tx));

        let mut ticker = interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_snapshot = Instant::now();
        self.game.start_clock(last_snapshot);
        tokio::pin!(shutdown);

        info!(
            "Match started: {}x{} {} {} max={}",
            self.config.width,
            self.config.height,
            self.config.mode,
            self.config.world,
            self.config.max_players
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let now = Instant::now();
            if let Ok((stream, addr)) = conn_rx.try_recv() {
                self.sessions.add::<TcpStream>(stream, addr);
            }
            self.poll_sessions(now);
            self.game.tick(now);

            if now.saturating_duration_since(last_snapshot) >= SNAPSHOT_INTERVAL {
                self.broadcast_snapshot(now);
                last_snapshot = now;
            }

            if !self.game.is_running() {
                break;
            }
        }

        acceptor.abort();
        Ok(self.finish(Instant::now()).await)
    }

    /// Handle at most one inbound frame per session.
    fn poll_sessions(&mut self, now: Instant) {
        for id in self.sessions.ids() {
            match self.sessions.poll(id) {
                Some(Inbound::Message(message)) => self.handle_message(id, message, now),
                Some(Inbound::Closed) => self.drop_session(id),
                None => {}
            }
        }
    }

    fn handle_message(&mut self, id: SessionId, message: Message, now: Instant) {
        let Some(slot) = self.sessions.slot_of(id) else {
            if message.kind() == Some(MessageType::Join) {
                self.handle_join(id, now);
            } else {
                warn!(
                    "Session {} sent type {} before joining, closing",
                    id, message.msg_type
                );
                self.drop_session(id);
            }
            return;
        };

        match message.kind() {
            Some(MessageType::Join) => debug!("Ignoring repeated JOIN from slot {}", slot),
            Some(MessageType::Input) => match message.decode_input() {
                Ok(raw) => match Direction::from_wire(raw) {
                    Some(direction) => {
                        if !self.game.steer(slot, direction) {
                            debug!("Slot {} heading {:?} refused", slot, direction);
                        }
                    }
                    None => debug!("Slot {} sent invalid heading {}", slot, raw),
                },
                Err(e) => {
                    warn!("Slot {} sent malformed input: {}", slot, e);
                    self.drop_session(id);
                }
            },
            Some(MessageType::Pause) => self.game.pause(slot),
            Some(MessageType::Resume) => self.game.resume(slot, now),
            Some(MessageType::Respawn) => self.game.respawn(slot, now),
            Some(MessageType::Leave) => self.drop_session(id),
            _ => debug!("Ignoring type {} from slot {}", message.msg_type, slot),
        }
    }

    fn handle_join(&mut self, id: SessionId, now: Instant) {
        let reply = match self.game.join(now) {
            Ok(slot) => {
                self.sessions.set_slot(id, slot);
                Message::join_ok(slot)
            }
            Err(reason) => {
                info!("Rejecting session {}: {}", id, reason);
                Message::join_reject(reason)
            }
        };
        if self.sessions.send(id, reply) == Delivery::Closed {
            self.drop_session(id);
        }
    }

    /// LEAVE, disconnects and I/O errors all end up here.
    fn drop_session(&mut self, id: SessionId) {
        if let Some(session) = self.sessions.remove(id) {
            if let Some(slot) = session.slot {
                self.game.leave(slot);
            }
        }
    }

    fn broadcast_snapshot(&mut self, now: Instant) {
        if self.sessions.joined_count() == 0 {
            return;
        }
        let message = match Message::snapshot(&self.game.snapshot(now)) {
            Ok(message) => message,
            Err(e) => {
                error!("Failed to encode snapshot: {}", e);
                return;
            }
        };
        for id in self.sessions.broadcast(&message) {
            self.drop_session(id);
        }
    }

    async fn finish(&mut self, now: Instant) -> GameEnd {
        let end = self.game.game_end(now);
        match Message::game_end(&end) {
            Ok(message) => {
                self.sessions.broadcast(&message);
            }
            Err(e) => error!("Failed to encode game end: {}", e),
        }
        self.sessions.close_all(SHUTDOWN_FLUSH).await;

        if let Some(registry) = &self.registry {
            if let Err(e) = registry.remove(std::process::id()) {
                warn!("Failed to unregister server: {}", e);
            }
        }

        info!(
            "Match over after {:.1}s",
            Duration::from_millis(end.elapsed_ms as u64).as_secs_f32()
        );
        for player in self.game.players() {
            info!(
                "{}: score {}, alive {:.1}s",
                player.name,
                player.score,
                player.alive_time.as_secs_f32()
            );
        }
        end
    }
}

async fn accept_loop(listener: TcpListener, conn_tx: mpsc::Sender<(TcpStream, SocketAddr)>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                }
                if conn_tx.send((stream, addr)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}
