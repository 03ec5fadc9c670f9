//! Message types and payload codecs.
//!
//! A [`Message`] is a type tag plus raw payload bytes; framing lives in
//! [`crate::transport`]. Payload integers are host-native and packed in field
//! order with no padding, which is exactly what `bincode` produces with
//! fixed-width integers and native endianness. The snapshot board is appended
//! after its header as raw bytes.

use crate::transport::ProtocolError;
use crate::{Direction, MAX_PAYLOAD, MAX_PLAYERS};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message type codes as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Join,
    JoinOk,
    JoinReject,
    Input,
    Pause,
    Resume,
    Respawn,
    Leave,
    Snapshot,
    GameEnd,
}

impl MessageType {
    pub fn code(self) -> i32 {
        match self {
            MessageType::Join => 1,
            MessageType::JoinOk => 2,
            MessageType::JoinReject => 3,
            MessageType::Input => 4,
            MessageType::Pause => 5,
            MessageType::Resume => 6,
            MessageType::Respawn => 7,
            MessageType::Leave => 8,
            MessageType::Snapshot => 9,
            // 10 was a scoreboard message that never shipped
            MessageType::GameEnd => 11,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(MessageType::Join),
            2 => Some(MessageType::JoinOk),
            3 => Some(MessageType::JoinReject),
            4 => Some(MessageType::Input),
            5 => Some(MessageType::Pause),
            6 => Some(MessageType::Resume),
            7 => Some(MessageType::Respawn),
            8 => Some(MessageType::Leave),
            9 => Some(MessageType::Snapshot),
            11 => Some(MessageType::GameEnd),
            _ => None,
        }
    }
}

/// Why a JOIN was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The match already seats its maximum number of players.
    Full,
    /// No slot index below the player limit is free.
    NoSlot,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::Full => "FULL",
            RejectReason::NoSlot => "NO_SLOT",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One framed message: a type code and its payload.
///
/// The type is kept as the raw code so that frames with codes this build
/// does not know still decode and can be skipped by the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: i32,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(kind: MessageType, payload: Vec<u8>) -> Self {
        Self {
            msg_type: kind.code(),
            payload,
        }
    }

    /// A message with no payload (JOIN, PAUSE, RESUME, RESPAWN, LEAVE).
    pub fn empty(kind: MessageType) -> Self {
        Self::new(kind, Vec::new())
    }

    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_code(self.msg_type)
    }

    pub fn join_ok(slot: usize) -> Self {
        Self::new(MessageType::JoinOk, (slot as i32).to_ne_bytes().to_vec())
    }

    /// Reason text is NUL-terminated for compatibility with C clients.
    pub fn join_reject(reason: RejectReason) -> Self {
        let mut payload = reason.as_str().as_bytes().to_vec();
        payload.push(0);
        Self::new(MessageType::JoinReject, payload)
    }

    pub fn input(direction: Direction) -> Self {
        Self::new(MessageType::Input, direction.to_wire().to_ne_bytes().to_vec())
    }

    pub fn snapshot(snapshot: &Snapshot) -> Result<Self, ProtocolError> {
        Ok(Self::new(MessageType::Snapshot, snapshot.encode()?))
    }

    pub fn game_end(game_end: &GameEnd) -> Result<Self, ProtocolError> {
        Ok(Self::new(MessageType::GameEnd, game_end.encode()?))
    }

    pub fn decode_join_ok(&self) -> Result<i32, ProtocolError> {
        self.expect(MessageType::JoinOk)?;
        read_i32(&self.payload)
    }

    /// Reason text with trailing NULs removed.
    pub fn decode_join_reject(&self) -> Result<String, ProtocolError> {
        self.expect(MessageType::JoinReject)?;
        let end = self
            .payload
            .iter()
            .rposition(|b| *b != 0)
            .map_or(0, |i| i + 1);
        Ok(String::from_utf8_lossy(&self.payload[..end]).into_owned())
    }

    /// Raw heading value; callers decide what to do with out-of-range values.
    pub fn decode_input(&self) -> Result<i32, ProtocolError> {
        self.expect(MessageType::Input)?;
        read_i32(&self.payload)
    }

    pub fn decode_snapshot(&self) -> Result<Snapshot, ProtocolError> {
        self.expect(MessageType::Snapshot)?;
        Snapshot::decode(&self.payload)
    }

    pub fn decode_game_end(&self) -> Result<GameEnd, ProtocolError> {
        self.expect(MessageType::GameEnd)?;
        GameEnd::decode(&self.payload)
    }

    fn expect(&self, kind: MessageType) -> Result<(), ProtocolError> {
        if self.msg_type == kind.code() {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedType {
                expected: kind.code(),
                actual: self.msg_type,
            })
        }
    }
}

fn read_i32(payload: &[u8]) -> Result<i32, ProtocolError> {
    let bytes: [u8; 4] = payload
        .try_into()
        .map_err(|_| ProtocolError::Payload(format!("expected 4 bytes, got {}", payload.len())))?;
    Ok(i32::from_ne_bytes(bytes))
}

fn payload_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_native_endian()
        .allow_trailing_bytes()
}

#[derive(Serialize, Deserialize)]
struct SnapshotHeader {
    width: i32,
    height: i32,
    elapsed_ms: i64,
    scores: [i32; MAX_PLAYERS],
    alive: [i32; MAX_PLAYERS],
    paused: [i32; MAX_PLAYERS],
}

const SNAPSHOT_HEADER_LEN: usize = 4 + 4 + 8 + 3 * 4 * MAX_PLAYERS;

/// Full world state as broadcast to every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub width: i32,
    pub height: i32,
    pub elapsed_ms: i64,
    pub scores: [i32; MAX_PLAYERS],
    pub alive: [bool; MAX_PLAYERS],
    pub paused: [bool; MAX_PLAYERS],
    /// Row-major, `width * height` glyphs.
    pub board: Vec<u8>,
}

impl Snapshot {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let cells = (self.width.max(0) as usize) * (self.height.max(0) as usize);
        if self.board.len() != cells {
            return Err(ProtocolError::Payload(format!(
                "board has {} cells, expected {}",
                self.board.len(),
                cells
            )));
        }
        if SNAPSHOT_HEADER_LEN + cells > MAX_PAYLOAD {
            return Err(ProtocolError::MessageTooLarge(
                SNAPSHOT_HEADER_LEN + cells,
                MAX_PAYLOAD,
            ));
        }

        let header = SnapshotHeader {
            width: self.width,
            height: self.height,
            elapsed_ms: self.elapsed_ms,
            scores: self.scores,
            alive: self.alive.map(i32::from),
            paused: self.paused.map(i32::from),
        };
        let mut bytes = payload_options().serialize(&header)?;
        bytes.extend_from_slice(&self.board);
        Ok(bytes)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < SNAPSHOT_HEADER_LEN {
            return Err(ProtocolError::Payload(format!(
                "snapshot header needs {} bytes, got {}",
                SNAPSHOT_HEADER_LEN,
                payload.len()
            )));
        }
        let header: SnapshotHeader = payload_options().deserialize(payload)?;
        if header.width <= 0 || header.height <= 0 {
            return Err(ProtocolError::Payload(format!(
                "invalid board size {}x{}",
                header.width, header.height
            )));
        }

        let cells = header.width as usize * header.height as usize;
        let board = &payload[SNAPSHOT_HEADER_LEN..];
        if board.len() < cells {
            return Err(ProtocolError::Payload(format!(
                "board has {} cells, expected {}",
                board.len(),
                cells
            )));
        }

        Ok(Self {
            width: header.width,
            height: header.height,
            elapsed_ms: header.elapsed_ms,
            scores: header.scores,
            alive: header.alive.map(|v| v != 0),
            paused: header.paused.map(|v| v != 0),
            board: board[..cells].to_vec(),
        })
    }

    pub fn cell(&self, x: i32, y: i32) -> Option<u8> {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return None;
        }
        self.board.get((y * self.width + x) as usize).copied()
    }

    /// Board rows, top to bottom.
    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        self.board.chunks(self.width.max(1) as usize)
    }

    pub fn count_cells(&self, glyph: u8) -> usize {
        self.board.iter().filter(|c| **c == glyph).count()
    }

    /// Coordinates of every cell holding `glyph`, row-major.
    pub fn positions_of(&self, glyph: u8) -> Vec<(i32, i32)> {
        self.board
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == glyph)
            .map(|(i, _)| ((i as i32) % self.width, (i as i32) / self.width))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEnd {
    pub elapsed_ms: i64,
    pub scores: [i32; MAX_PLAYERS],
}

impl GameEnd {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(payload_options().serialize(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        Ok(payload_options().deserialize(payload)?)
    }
}
