//! Authoritative match simulation.
//!
//! [`Game`] owns the world, the player, snake and fruit slots, and the match
//! clock. Slots are fixed arrays indexed by player id, so a seat keeps its
//! index for the whole session and is reused after the player leaves.
//! Every time-dependent operation takes `now` explicitly; the server loop
//! passes `Instant::now()` and tests pass synthetic instants.

use crate::config::{GameMode, ServerConfig};
use crate::world::{Pos, World, WorldError};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::protocol::RejectReason;
use shared::{
    Direction, GameEnd, Snapshot, CELL_BODY, CELL_EMPTY, CELL_FRUIT, CELL_HEAD, CELL_OBSTACLE,
    MAX_PLAYERS,
};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const SNAKE_START_LEN: usize = 3;
/// Global pause after any join or respawn.
pub const JOIN_FREEZE: Duration = Duration::from_secs(3);
/// Per-player pause after resuming.
pub const RESUME_GRACE: Duration = Duration::from_secs(3);
/// Standard mode ends after the board has been empty this long.
pub const EMPTY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct Player {
    pub id: usize,
    pub name: String,
    pub alive: bool,
    pub paused: bool,
    pub score: u32,
    /// Total time spent alive across all lives, as of the last tick.
    pub alive_time: Duration,
    pub spawned_at: Instant,
    /// Movement is held until this instant after a resume.
    pub resume_at: Option<Instant>,
    banked_alive: Duration,
}

impl Player {
    fn new(id: usize, now: Instant) -> Self {
        Self {
            id,
            name: format!("P{}", id + 1),
            alive: false,
            paused: false,
            score: 0,
            alive_time: Duration::ZERO,
            spawned_at: now,
            resume_at: None,
            banked_alive: Duration::ZERO,
        }
    }

    fn refresh_alive_time(&mut self, now: Instant) {
        if self.alive {
            self.alive_time = self.banked_alive + now.saturating_duration_since(self.spawned_at);
        }
    }

    fn mark_spawned(&mut self, now: Instant) {
        self.mark_dead(now);
        self.alive = true;
        self.spawned_at = now;
        self.resume_at = None;
    }

    fn mark_dead(&mut self, now: Instant) {
        self.refresh_alive_time(now);
        self.banked_alive = self.alive_time;
        self.alive = false;
    }

    fn in_grace(&self, now: Instant) -> bool {
        self.resume_at.map_or(false, |at| now < at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snake {
    /// Tail at the front, head at the back.
    pub body: VecDeque<Pos>,
    pub heading: Direction,
}

impl Snake {
    pub fn head(&self) -> Pos {
        self.body.back().copied().unwrap_or(Pos::new(0, 0))
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn occupies(&self, pos: Pos) -> bool {
        self.body.contains(&pos)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    Running,
    Ended,
}

pub struct Game {
    pub world: World,
    mode: GameMode,
    duration: Duration,
    max_players: usize,
    players: [Option<Player>; MAX_PLAYERS],
    snakes: [Option<Snake>; MAX_PLAYERS],
    fruits: [Option<Pos>; MAX_PLAYERS],
    started_at: Instant,
    end_at: Option<Instant>,
    freeze_until: Option<Instant>,
    empty_since: Option<Instant>,
    phase: MatchPhase,
    rng: StdRng,
}

impl Game {
    /// `duration` only matters in timed mode.
    pub fn new(
        world: World,
        mode: GameMode,
        duration: Duration,
        max_players: usize,
        now: Instant,
    ) -> Self {
        let end_at = match mode {
            GameMode::Timed => Some(now + duration),
            GameMode::Standard => None,
        };

        Self {
            world,
            mode,
            duration,
            max_players: max_players.clamp(1, MAX_PLAYERS),
            players: Default::default(),
            snakes: Default::default(),
            fruits: Default::default(),
            started_at: now,
            end_at,
            freeze_until: None,
            empty_since: None,
            phase: MatchPhase::Running,
            rng: StdRng::from_entropy(),
        }
    }

    /// Build the world described by `config` (loading the obstacle map if
    /// one is configured) and start the match clock.
    pub fn from_config(config: &ServerConfig, now: Instant) -> Result<Self, WorldError> {
        let world = match &config.map_path {
            Some(path) if !config.wraps() => {
                World::load_map(config.width, config.height, false, path)?
            }
            _ => World::empty(config.width, config.height, config.wraps()),
        };
        Ok(Self::new(
            world,
            config.mode,
            config.duration,
            config.max_players,
            now,
        ))
    }

    /// Restart the match clock: elapsed time, the timed-mode deadline and
    /// the empty-board countdown all count from `now`.
    pub fn start_clock(&mut self, now: Instant) {
        self.started_at = now;
        if let Some(end) = self.end_at.as_mut() {
            *end = now + self.duration;
        }
        self.empty_since = None;
    }

    /// Replace the random source, for reproducible matches.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == MatchPhase::Running
    }

    pub fn mode(&self) -> GameMode {
        self.mode
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }

    pub fn player(&self, id: usize) -> Option<&Player> {
        self.players.get(id)?.as_ref()
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().flatten()
    }

    pub fn snake(&self, id: usize) -> Option<&Snake> {
        self.snakes.get(id)?.as_ref()
    }

    pub fn fruits(&self) -> impl Iterator<Item = Pos> + '_ {
        self.fruits.iter().flatten().copied()
    }

    pub fn player_count(&self) -> usize {
        self.players().count()
    }

    pub fn fruit_count(&self) -> usize {
        self.fruits().count()
    }

    pub fn alive_snake_count(&self) -> usize {
        (0..MAX_PLAYERS).filter(|id| self.is_alive(*id)).count()
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    pub fn is_frozen(&self, now: Instant) -> bool {
        self.freeze_until.map_or(false, |until| now < until)
    }

    fn is_alive(&self, id: usize) -> bool {
        self.snakes[id].is_some() && self.players[id].as_ref().map_or(false, |p| p.alive)
    }

    fn any_player_alive(&self) -> bool {
        self.players().any(|p| p.alive)
    }

    /// Seat a new player in the lowest free slot and spawn their snake.
    pub fn join(&mut self, now: Instant) -> Result<usize, RejectReason> {
        if self.player_count() >= self.max_players {
            return Err(RejectReason::Full);
        }
        let id = (0..self.max_players)
            .find(|id| self.players[*id].is_none())
            .ok_or(RejectReason::NoSlot)?;

        self.players[id] = Some(Player::new(id, now));
        if !self.spawn(id, now) {
            warn!("No free cell to spawn player {}", id);
        }
        self.freeze_until = Some(now + JOIN_FREEZE);
        if self.any_player_alive() {
            self.empty_since = None;
        }

        info!("Player {} joined slot {}", id + 1, id);
        Ok(id)
    }

    /// Free a slot. Unknown or empty slots are ignored.
    pub fn leave(&mut self, id: usize) {
        if id >= MAX_PLAYERS {
            return;
        }
        if let Some(player) = self.players[id].take() {
            info!("{} left with score {}", player.name, player.score);
        }
        self.snakes[id] = None;
    }

    /// Change heading. A 180° reversal is refused; returns whether the
    /// heading was applied.
    pub fn steer(&mut self, id: usize, direction: Direction) -> bool {
        match self.snakes.get_mut(id).and_then(Option::as_mut) {
            Some(snake) if direction != snake.heading.opposite() => {
                snake.heading = direction;
                true
            }
            _ => false,
        }
    }

    pub fn pause(&mut self, id: usize) {
        if let Some(player) = self.players.get_mut(id).and_then(Option::as_mut) {
            player.paused = true;
        }
    }

    /// Unpause and hold the snake for the grace window.
    pub fn resume(&mut self, id: usize, now: Instant) {
        if let Some(player) = self.players.get_mut(id).and_then(Option::as_mut) {
            player.paused = false;
            player.resume_at = Some(now + RESUME_GRACE);
        }
    }

    /// Put a fresh snake on the board for a seated player and freeze the
    /// match like a join does.
    pub fn respawn(&mut self, id: usize, now: Instant) {
        if self.player(id).is_none() {
            return;
        }
        if !self.spawn(id, now) {
            warn!("No free cell to respawn player {}", id);
        }
        self.freeze_until = Some(now + JOIN_FREEZE);
    }

    /// Place a length-3 snake heading right on a random run of free cells
    /// ending at its head. Returns false (and changes nothing) if the board is full or the
    /// slot has no player.
    pub fn spawn(&mut self, id: usize, now: Instant) -> bool {
        if self.player(id).is_none() {
            return false;
        }
        let Some(head) = self.find_cell(Self::fits_snake) else {
            return false;
        };

        self.snakes[id] = Some(Snake {
            body: self.spawn_body(head).into(),
            heading: Direction::Right,
        });

        if let Some(player) = self.players[id].as_mut() {
            player.mark_spawned(now);
            debug!("Spawned {} at ({}, {})", player.name, head.x, head.y);
        }
        true
    }

    /// Advance one snake by one cell.
    pub fn step(&mut self, id: usize, now: Instant) {
        if id >= MAX_PLAYERS || !self.is_alive(id) || self.is_frozen(now) {
            return;
        }
        match self.players[id].as_ref() {
            Some(player) if !player.paused && !player.in_grace(now) => {}
            _ => return,
        }
        let Some(snake) = self.snakes[id].as_ref() else {
            return;
        };

        let head = snake.head();
        let (dx, dy) = snake.heading.delta();
        let next = self.world.wrap_pos(Pos::new(head.x + dx, head.y + dy));

        if !self.world.in_bounds(next) || self.world.is_blocked(next) || self.has_snake(next) {
            self.kill(id, now);
            return;
        }

        let eaten = self.fruit_slot_at(next);
        let area = self.world.area();
        let Some(snake) = self.snakes[id].as_mut() else {
            return;
        };

        match eaten {
            Some(slot) => {
                if snake.len() >= area {
                    snake.body.pop_front();
                }
                snake.body.push_back(next);
                self.fruits[slot] = None;
                if let Some(player) = self.players[id].as_mut() {
                    player.score += 1;
                    debug!("{} ate fruit, score {}", player.name, player.score);
                }
            }
            None => {
                snake.body.pop_front();
                snake.body.push_back(next);
            }
        }
    }

    fn kill(&mut self, id: usize, now: Instant) {
        self.snakes[id] = None;
        if let Some(player) = self.players[id].as_mut() {
            player.mark_dead(now);
            info!("{} died with score {}", player.name, player.score);
        }
    }

    /// Keep exactly one fruit per alive snake, as far as free cells allow.
    pub fn ensure_fruit(&mut self) {
        let wanted = self.alive_snake_count();
        let mut have = self.fruit_count();

        for slot in 0..MAX_PLAYERS {
            if have >= wanted {
                break;
            }
            if self.fruits[slot].is_some() {
                continue;
            }
            match self.find_empty_cell() {
                Some(pos) => {
                    self.fruits[slot] = Some(pos);
                    have += 1;
                }
                None => {
                    debug!("No free cell for fruit ({} of {})", have, wanted);
                    return;
                }
            }
        }

        for slot in 0..MAX_PLAYERS {
            if have <= wanted {
                break;
            }
            if self.fruits[slot].take().is_some() {
                have -= 1;
            }
        }
    }

    /// One simulation tick: move, rebalance fruit, update timers, and
    /// check whether the match is over.
    pub fn tick(&mut self, now: Instant) {
        if !self.is_running() {
            return;
        }

        for id in 0..MAX_PLAYERS {
            if self.is_alive(id) {
                self.step(id, now);
            }
        }
        self.ensure_fruit();

        for player in self.players.iter_mut().flatten() {
            player.refresh_alive_time(now);
        }

        match self.mode {
            GameMode::Timed => {
                if self.end_at.map_or(false, |end| now >= end) {
                    self.end(now);
                }
            }
            GameMode::Standard => {
                if self.any_player_alive() {
                    self.empty_since = None;
                } else {
                    let since = *self.empty_since.get_or_insert(now);
                    if now.saturating_duration_since(since) >= EMPTY_TIMEOUT {
                        self.end(now);
                    }
                }
            }
        }
    }

    fn end(&mut self, now: Instant) {
        self.phase = MatchPhase::Ended;
        info!(
            "Match ended after {:.1}s",
            self.elapsed(now).as_secs_f32()
        );
    }

    /// Render the board: obstacles, then fruit, then bodies, then heads.
    pub fn board(&self) -> Vec<u8> {
        let mut board = vec![CELL_EMPTY; self.world.area()];
        for y in 0..self.world.height {
            for x in 0..self.world.width {
                let pos = Pos::new(x, y);
                if self.world.is_blocked(pos) {
                    board[self.world.index(pos)] = CELL_OBSTACLE;
                }
            }
        }
        for pos in self.fruits() {
            board[self.world.index(pos)] = CELL_FRUIT;
        }
        for snake in self.snakes.iter().flatten() {
            let last = snake.len().saturating_sub(1);
            for (i, pos) in snake.body.iter().enumerate() {
                board[self.world.index(*pos)] = if i == last { CELL_HEAD } else { CELL_BODY };
            }
        }
        board
    }

    pub fn scores(&self) -> [i32; MAX_PLAYERS] {
        std::array::from_fn(|id| self.player(id).map_or(0, |p| p.score as i32))
    }

    pub fn snapshot(&self, now: Instant) -> Snapshot {
        Snapshot {
            width: self.world.width,
            height: self.world.height,
            elapsed_ms: self.elapsed(now).as_millis() as i64,
            scores: self.scores(),
            alive: std::array::from_fn(|id| self.player(id).map_or(false, |p| p.alive)),
            paused: std::array::from_fn(|id| self.player(id).map_or(false, |p| p.paused)),
            board: self.board(),
        }
    }

    pub fn game_end(&self, now: Instant) -> GameEnd {
        GameEnd {
            elapsed_ms: self.elapsed(now).as_millis() as i64,
            scores: self.scores(),
        }
    }

    fn has_snake(&self, pos: Pos) -> bool {
        self.snakes.iter().flatten().any(|s| s.occupies(pos))
    }

    fn fruit_slot_at(&self, pos: Pos) -> Option<usize> {
        self.fruits.iter().position(|f| *f == Some(pos))
    }

    fn is_free(&self, pos: Pos) -> bool {
        !self.world.is_blocked(pos) && !self.has_snake(pos) && self.fruit_slot_at(pos).is_none()
    }

    /// Spawn cells for a head at `head`, tail first. Clamped at a wall, the
    /// tail cells collapse onto the head.
    fn spawn_body(&self, head: Pos) -> Vec<Pos> {
        (0..SNAKE_START_LEN)
            .map(|i| {
                let back = (SNAKE_START_LEN - 1 - i) as i32;
                self.world.fit(Pos::new(head.x - back, head.y))
            })
            .collect()
    }

    fn fits_snake(&self, head: Pos) -> bool {
        self.spawn_body(head).into_iter().all(|pos| self.is_free(pos))
    }

    fn find_empty_cell(&mut self) -> Option<Pos> {
        self.find_cell(Self::is_free)
    }

    /// Random probing first, then a row-major scan so a nearly full board
    /// still finds its last usable cell.
    fn find_cell(&mut self, usable: fn(&Self, Pos) -> bool) -> Option<Pos> {
        let (width, height) = (self.world.width, self.world.height);
        for _ in 0..self.world.area() * 4 {
            let pos = Pos::new(self.rng.gen_range(0..width), self.rng.gen_range(0..height));
            if usable(self, pos) {
                return Some(pos);
            }
        }
        (0..height)
            .flat_map(|y| (0..width).map(move |x| Pos::new(x, y)))
            .find(|pos| usable(self, *pos))
    }

    #[cfg(test)]
    fn place_snake(&mut self, id: usize, body: &[Pos], heading: Direction) {
        self.snakes[id] = Some(Snake {
            body: body.iter().copied().collect(),
            heading,
        });
        if let Some(player) = self.players[id].as_mut() {
            player.alive = true;
        }
    }

    #[cfg(test)]
    fn place_fruit(&mut self, slot: usize, pos: Pos) {
        self.fruits[slot] = Some(pos);
    }
}
