//! # Clock Sync Server Library
//!
//! This library provides the server side of a clock-synchronized command relay.
//! It estimates how far each connected client's clock is from the server's,
//! then uses those estimates to forward commands between clients with every
//! timestamp translated into the receiving client's own clock.
//!
//! ## Core Responsibilities
//!
//! ### Offset Estimation
//! The server periodically sends a probe to every session. Each client answers
//! with its local time, and the server derives the clock offset from the three
//! timestamps assuming the probe spent equal time on the way out and back. The
//! error of such an estimate is bounded by half its roundtrip, so only the
//! lowest-roundtrip estimate per session is kept.
//!
//! ### Command Relay
//! A client submits a command stamped with its own clock. The server converts
//! that stamp to server time, rejects the command if it is already older than
//! the staleness threshold, and otherwise hands it to every other session with
//! the send time expressed in that session's clock.
//!
//! ### Session Management
//! Tracks connects, reconnects, disconnects and silent timeouts, and pushes the
//! current member list to everyone after each change.
//!
//! ## Module Organization
//!
//! ### Ledger Module (`ledger`)
//! Outstanding probes keyed by probe id. Written once per probe and capped so
//! a long-running server does not grow without bound.
//!
//! ### Offsets Module (`offsets`)
//! Best estimate per session with the keep-lower-roundtrip update rule.
//!
//! ### Sessions Module (`sessions`)
//! Connected sessions, their UDP addresses and liveness.
//!
//! ### Scheduler Module (`scheduler`)
//! Timer-driven and on-demand probe rounds.
//!
//! ### Relay Module (`relay`)
//! Staleness check and per-receiver timestamp translation.
//!
//! ### Broadcaster Module (`broadcaster`)
//! The push capability the core uses to reach one or all sessions.
//!
//! ### Network Module (`network`)
//! UDP transport, packet dispatch and the task wiring.
//!
//! ## Simulated Latency
//!
//! Uplink and downlink delays can be injected at the probe, pong and command
//! legs to make offset estimation and staleness rejection observable on a
//! single machine. All of them are async sleeps on their own tasks, so a slow
//! simulated leg never holds up the scheduler or other receivers.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = ServerConfig {
//!         bind_addr: "127.0.0.1:8080".to_string(),
//!         ..ServerConfig::default()
//!     };
//!
//!     let mut server = Server::new(config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod broadcaster;
pub mod config;
pub mod error;
pub mod ledger;
pub mod network;
pub mod offsets;
pub mod relay;
pub mod scheduler;
pub mod sessions;
