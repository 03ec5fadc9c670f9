//! Types and plumbing shared by the snake arena server and its clients:
//! the framed wire protocol, payload codecs, and the on-disk server registry.

pub mod protocol;
pub mod registry;
pub mod transport;

pub use protocol::{GameEnd, Message, MessageType, Snapshot};
pub use registry::{Registry, RegistryError, ServerInfo};
pub use transport::{recv_message, send_message, ProtocolError};

/// Seats per match. Snapshot and game-end payloads always carry this many entries.
pub const MAX_PLAYERS: usize = 8;

/// Upper bound on a single frame's payload.
pub const MAX_PAYLOAD: usize = 8192;

pub const MIN_WIDTH: i32 = 10;
pub const MAX_WIDTH: i32 = 120;
pub const MIN_HEIGHT: i32 = 10;
pub const MAX_HEIGHT: i32 = 60;

/// Board cell glyphs used in snapshots.
pub const CELL_EMPTY: u8 = b' ';
pub const CELL_OBSTACLE: u8 = b'#';
pub const CELL_FRUIT: u8 = b'*';
pub const CELL_BODY: u8 = b'o';
pub const CELL_HEAD: u8 = b'A';

/// Snake heading. Wire values are fixed: 0 up, 1 down, 2 left, 3 right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    pub fn to_wire(self) -> i32 {
        match self {
            Direction::Up => 0,
            Direction::Down => 1,
            Direction::Left => 2,
            Direction::Right => 3,
        }
    }

    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(Direction::Up),
            1 => Some(Direction::Down),
            2 => Some(Direction::Left),
            3 => Some(Direction::Right),
            _ => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    /// Grid offset of one step in this heading (y grows downwards).
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_wire_values() {
        assert_eq!(Direction::Up.to_wire(), 0);
        assert_eq!(Direction::Down.to_wire(), 1);
        assert_eq!(Direction::Left.to_wire(), 2);
        assert_eq!(Direction::Right.to_wire(), 3);

        for dir in Direction::ALL {
            assert_eq!(Direction::from_wire(dir.to_wire()), Some(dir));
        }
        assert_eq!(Direction::from_wire(4), None);
        assert_eq!(Direction::from_wire(-1), None);
    }

    #[test]
    fn test_direction_opposite_is_involution() {
        for dir in Direction::ALL {
            assert_ne!(dir.opposite(), dir);
            assert_eq!(dir.opposite().opposite(), dir);

            let (dx, dy) = dir.delta();
            let (ox, oy) = dir.opposite().delta();
            assert_eq!((dx + ox, dy + oy), (0, 0));
        }
    }

    #[test]
    fn test_largest_snapshot_fits_in_one_frame() {
        let header = 4 + 4 + 8 + 3 * 4 * MAX_PLAYERS;
        let board = (MAX_WIDTH * MAX_HEIGHT) as usize;
        assert!(header + board <= MAX_PAYLOAD);
    }
}
