//! Static playfield: dimensions, edge behaviour and blocked cells.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A grid coordinate. Signed so that off-grid steps can be represented
/// before they are wrapped or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pos {
    pub x: i32,
    pub y: i32,
}

impl Pos {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("Failed to read obstacle map {path}: {source}")]
    MapUnreadable { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone)]
pub struct World {
    pub width: i32,
    pub height: i32,
    pub wrap: bool,
    blocked: Vec<bool>,
}

impl World {
    pub fn empty(width: i32, height: i32, wrap: bool) -> Self {
        Self {
            width,
            height,
            wrap,
            blocked: vec![false; (width * height) as usize],
        }
    }

    /// Parse a text map: one row per line, `#` marks an obstacle, anything
    /// else (including missing characters on short lines) is open. Rows and
    /// columns past the grid are ignored.
    pub fn from_map_text(width: i32, height: i32, wrap: bool, text: &str) -> Self {
        let mut world = Self::empty(width, height, wrap);
        for (y, line) in text.lines().take(height as usize).enumerate() {
            let line = line.trim_end_matches('\r');
            for (x, byte) in line.bytes().take(width as usize).enumerate() {
                if byte == b'#' {
                    world.blocked[y * width as usize + x] = true;
                }
            }
        }
        world
    }

    pub fn load_map(width: i32, height: i32, wrap: bool, path: &Path) -> Result<Self, WorldError> {
        let raw = fs::read(path).map_err(|source| WorldError::MapUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_map_text(
            width,
            height,
            wrap,
            &String::from_utf8_lossy(&raw),
        ))
    }

    pub fn area(&self) -> usize {
        (self.width * self.height) as usize
    }

    pub fn in_bounds(&self, pos: Pos) -> bool {
        pos.x >= 0 && pos.x < self.width && pos.y >= 0 && pos.y < self.height
    }

    /// Off-grid cells count as blocked.
    pub fn is_blocked(&self, pos: Pos) -> bool {
        !self.in_bounds(pos) || self.blocked[self.index(pos)]
    }

    /// Row-major index of an in-bounds cell.
    pub fn index(&self, pos: Pos) -> usize {
        (pos.y * self.width + pos.x) as usize
    }

    /// Fold a coordinate back onto the grid when edges wrap; otherwise
    /// return it unchanged.
    pub fn wrap_pos(&self, pos: Pos) -> Pos {
        if !self.wrap {
            return pos;
        }
        Pos::new(pos.x.rem_euclid(self.width), pos.y.rem_euclid(self.height))
    }

    /// Pull a coordinate onto the grid: wrapped on a wrapping world,
    /// clamped to the edge otherwise.
    pub fn fit(&self, pos: Pos) -> Pos {
        if self.wrap {
            self.wrap_pos(pos)
        } else {
            Pos::new(
                pos.x.clamp(0, self.width - 1),
                pos.y.clamp(0, self.height - 1),
            )
        }
    }

    pub fn obstacle_count(&self) -> usize {
        self.blocked.iter().filter(|b| **b).count()
    }
}
