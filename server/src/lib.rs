//! # Match Server Library
//!
//! This library implements the server side of a turn-based board game
//! service: players connect, log in, look each other up, exchange match
//! invitations, relay moves, and accumulate Elo ratings. All state lives in
//! memory; every connection is served by its own async task.
//!
//! ## Core Responsibilities
//!
//! ### Connection Lifecycle
//! The server accepts TCP connections up to a fixed capacity. Each accepted
//! connection is registered in a bounded registry and handed to a session
//! task that runs until the peer disconnects or the server shuts down. A
//! disconnecting session settles everything it still holds, so a crashed or
//! vanished client can never strand a match.
//!
//! ### Invitation Brokering
//! Matches start with an invitation from a source connection to a target,
//! naming the role the target would play. Invitations move through a small
//! state machine (open, accepted, closed); the transition that closes an
//! in-progress match is also the one that decides the result, so ratings
//! are posted exactly once no matter which side wins the race.
//!
//! ### Graceful Shutdown
//! On SIGHUP or interrupt the server stops accepting, half-closes the read
//! side of every registered connection, and blocks until the registry
//! drains. Worker tasks see the half-close as end of stream and run their
//! normal disconnect path.
//!
//! ## Module Organization
//!
//! - [`connection`]: per-client handle carrying the writer, the bound
//!   player, and the local invitation table
//! - [`registry`]: bounded connection table with name lookup and the drain
//!   barrier used at shutdown
//! - [`invitation`]: the invitation state machine
//! - [`game`]: minimal match result tracking (the rules of the game itself
//!   live in the clients)
//! - [`player`]: persistent-for-the-process player records and Elo updates
//! - [`session`]: the dispatch loop run by each connection's task
//! - [`network`]: listener, accept loop, and shutdown sequencing
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Bind with room for 64 simultaneous connections.
//!     let server = Server::new("127.0.0.1:3999", 64).await?;
//!
//!     let (shutdown_tx, shutdown_rx) = watch::channel(false);
//!
//!     // run() accepts and serves connections until the shutdown flag
//!     // flips, then waits for every worker to finish.
//!     let handle = tokio::spawn(async move { server.run(shutdown_rx).await });
//!
//!     tokio::signal::ctrl_c().await?;
//!     let _ = shutdown_tx.send(true);
//!     handle.await?;
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod errors;
pub mod game;
pub mod invitation;
pub mod network;
pub mod player;
pub mod registry;
pub mod session;
