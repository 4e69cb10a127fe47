//! # Clock Sync Client Library
//!
//! A headless client for the clock-sync relay server. It answers the server's
//! probes so the server can estimate this client's clock offset, submits
//! commands stamped with its local clock, and records the commands other
//! clients relay to it.
//!
//! ## Module Organization
//!
//! ### Clock Module (`clock`)
//! The local wall clock, with an optional artificial skew so several clients
//! on one machine can disagree about the time.
//!
//! ### State Module (`state`)
//! Protocol state without I/O: session identity, the latest member list and
//! estimate snapshot, outstanding commands, and the reply to each server push.
//!
//! ### Stats Module (`stats`)
//! Bounded history of relayed-command lateness and submission counters.
//!
//! ### Network Module (`network`)
//! The UDP socket loop tying the pieces together, with optional simulated
//! link latency.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = ClientConfig {
//!         clock_skew_ms: 2_500,
//!         start_ping: true,
//!         ..ClientConfig::default()
//!     };
//!
//!     let mut client = Client::new(config).await?;
//!     client.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod network;
pub mod state;
pub mod stats;
