//! # Snake Arena Server
//!
//! Authoritative server for the multiplayer snake game. It owns the only
//! copy of the match state, applies player commands, and streams full board
//! snapshots to every joined client.
//!
//! ## Architecture
//!
//! A single control loop owns the [`game::Game`] and runs every 30 ms. Socket
//! I/O happens in small per-connection tasks that only move frames between
//! the socket and bounded queues:
//! - **Acceptor**: hands new TCP connections to the loop
//! - **Reader**: decodes inbound frames into the session's inbound queue
//! - **Writer**: drains the session's outbound queue onto the socket
//!
//! Each iteration the loop admits at most one new connection, handles at most
//! one inbound frame per session, ticks the simulation and, every 100 ms,
//! broadcasts a snapshot. A client that stops reading only loses its own
//! snapshots.
//!
//! ## Modules
//!
//! - `config`: validated match options
//! - `world`: grid dimensions, wrapping and obstacle maps
//! - `game`: players, snakes, fruit and the match clock
//! - `client_manager`: connection sessions and their I/O tasks
//! - `network`: the accept/dispatch/tick loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use shared::Registry;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default(), Some(Registry::from_env())).await?;
//!     println!("listening on {}", server.local_addr());
//!
//!     let end = server
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     println!("final scores: {:?}", end.scores);
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod game;
pub mod network;
pub mod world;
