//! # sixlease
//!
//! A DHCPv6 server library implementing the stateful subset of RFC 8415.
//!
//! ## Features
//!
//! - SOLICIT/ADVERTISE/REQUEST/REPLY plus CONFIRM, RENEW, REBIND,
//!   RELEASE, DECLINE and INFORMATION-REQUEST
//! - Rapid commit (two-message exchange)
//! - IA_NA address assignment and IA_PD prefix delegation
//! - Deterministic, stateless-friendly allocation: the same client
//!   identity always probes the same candidate sequence
//! - Decline quarantine for addresses a client reports as in conflict
//! - Unix control socket for runtime introspection
//! - Async/await with Tokio
//!
//! ## Quick Start
//!
//! ```no_run
//! use sixlease::{Config, ControlInterface, Server};
//! use tracing_subscriber::{EnvFilter, reload};
//!
//! #[tokio::main]
//! async fn main() -> sixlease::Result<()> {
//!     let config = Config::load_or_create("config.json")?;
//!     let (filter, handle) = reload::Layer::new(EnvFilter::new("info"));
//!     # drop(filter);
//!     let control = ControlInterface::new(&config, handle)?;
//!     Server::new(&config, control)?.run().await
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`Config`] - Server configuration (pools, lifetimes, DNS, etc.)
//! - [`Server`] - UDP transport listening on port 547
//! - [`Engine`] - Synchronous protocol core, one packet in, one reply out
//! - [`MemoryStore`] - Bounded in-memory lease store behind [`LeaseStore`]
//! - [`Writer`] / [`Header`] - Wire encoding and zero-copy decoding

pub mod alloc;
pub mod cli;
pub mod config;
pub mod duid;
pub mod engine;
pub mod error;
pub mod hash;
pub mod lease;
pub mod options;
pub mod packet;
pub mod pool;
pub mod server;

pub use cli::{ControlInterface, FilterHandle};
pub use config::Config;
pub use duid::{Duid, IaKind, LeaseKey};
pub use engine::{Engine, Outbound};
pub use error::{Error, Result};
pub use lease::{LeaseStore, MemoryStore, NaLease, PdLease, StoreStats};
pub use options::{MessageType, OptionCode, StatusCode};
pub use packet::{Header, Reader, Writer};
pub use server::Server;
