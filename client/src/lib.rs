//! # Snake Arena Client Library
//!
//! Headless client for the snake server. It joins a match over TCP, sends
//! player commands, and keeps the most recent snapshot and final scores in a
//! shared cell that the caller can read at any time.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! - JOIN handshake and rejection reporting
//! - Steering, pause, resume, respawn and leave commands
//! - Background receive task feeding [`network::LatestState`]
//!
//! ### Rendering Module (`rendering`)
//! Text views of a snapshot: framed board, scoreboard and final scores.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//! use shared::Direction;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::connect("127.0.0.1:4000").await?;
//!     client.steer(Direction::Up).await?;
//!
//!     if let Some(state) = client
//!         .wait_for(Duration::from_secs(1), |s| s.snapshot.is_some())
//!         .await
//!     {
//!         println!("{:?}", state.snapshot.map(|s| s.scores));
//!     }
//!     client.leave().await?;
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod rendering;

pub use network::{Client, ClientError, LatestState};
