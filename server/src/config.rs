//! Match configuration as accepted by the server binary.

use shared::{MAX_HEIGHT, MAX_PLAYERS, MAX_WIDTH, MIN_HEIGHT, MIN_WIDTH};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum GameMode {
    /// Ends once nobody has been alive for ten seconds.
    #[value(name = "standard")]
    Standard,
    /// Ends after a fixed duration.
    #[value(name = "timed")]
    Timed,
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameMode::Standard => f.write_str("standard"),
            GameMode::Timed => f.write_str("timed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WorldKind {
    /// Empty board whose edges wrap around.
    #[value(name = "no_obs")]
    NoObstacles,
    /// Obstacles loaded from a map file; edges are walls.
    #[value(name = "obs_file")]
    ObstacleFile,
}

impl fmt::Display for WorldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorldKind::NoObstacles => f.write_str("no_obs"),
            WorldKind::ObstacleFile => f.write_str("obs_file"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("world kind obs_file requires a map path")]
    MissingMap,
    #[error("timed mode requires a positive duration")]
    ZeroDuration,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub width: i32,
    pub height: i32,
    pub mode: GameMode,
    /// Match length in timed mode.
    pub duration: Duration,
    pub world: WorldKind,
    pub map_path: Option<PathBuf>,
    pub max_players: usize,
    /// 0 lets the OS pick.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            width: 40,
            height: 20,
            mode: GameMode::Standard,
            duration: Duration::from_secs(60),
            world: WorldKind::NoObstacles,
            map_path: None,
            max_players: 4,
            port: 0,
        }
    }
}

impl ServerConfig {
    /// Clamp dimensions and player count into the supported range and check
    /// that the options are consistent.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        self.width = self.width.clamp(MIN_WIDTH, MAX_WIDTH);
        self.height = self.height.clamp(MIN_HEIGHT, MAX_HEIGHT);
        self.max_players = self.max_players.clamp(1, MAX_PLAYERS);

        if self.world == WorldKind::ObstacleFile && self.map_path.is_none() {
            return Err(ConfigError::MissingMap);
        }
        if self.mode == GameMode::Timed && self.duration.is_zero() {
            return Err(ConfigError::ZeroDuration);
        }
        Ok(self)
    }

    /// Edges wrap only on the open board.
    pub fn wraps(&self) -> bool {
        self.world == WorldKind::NoObstacles
    }
}
