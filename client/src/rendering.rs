//! Plain-text views of server state for the headless client.

use shared::{GameEnd, Snapshot, MAX_PLAYERS};
use std::fmt::Write;

/// Board framed with `+`, `-` and `|`, one line per row.
pub fn render_board(snapshot: &Snapshot) -> String {
    let border = format!("+{}+", "-".repeat(snapshot.width.max(0) as usize));
    let mut out = String::with_capacity(snapshot.board.len() + 4 * snapshot.height as usize);

    out.push_str(&border);
    out.push('\n');
    for row in snapshot.rows() {
        out.push('|');
        out.push_str(&String::from_utf8_lossy(row));
        out.push_str("|\n");
    }
    out.push_str(&border);
    out
}

/// One line per occupied slot, e.g. `P1 score 3 alive` (the local player is
/// marked with `*`).
pub fn scoreboard(snapshot: &Snapshot, local_slot: Option<usize>) -> String {
    let mut out = format!("t={:.1}s", snapshot.elapsed_ms as f64 / 1000.0);
    for slot in 0..MAX_PLAYERS {
        let (alive, paused, score) = (snapshot.alive[slot], snapshot.paused[slot], snapshot.scores[slot]);
        if !alive && score == 0 && Some(slot) != local_slot {
            continue;
        }
        let marker = if Some(slot) == local_slot { "*" } else { "" };
        let status = match (alive, paused) {
            (true, true) => "paused",
            (true, false) => "alive",
            (false, _) => "dead",
        };
        let _ = write!(out, "\n{}P{} score {} {}", marker, slot + 1, score, status);
    }
    out
}

pub fn final_scores(end: &GameEnd) -> String {
    let mut out = format!("Game over after {:.1}s", end.elapsed_ms as f64 / 1000.0);
    for (slot, score) in end.scores.iter().enumerate().filter(|(_, s)| **s > 0) {
        let _ = write!(out, "\nP{}: {}", slot + 1, score);
    }
    out
}
