//! Management network bootstrap client.
//!
//! Resolves this host's address, builds the `ovirtmgmt` network record and
//! submits it to the virtualization management daemon in a single
//! "setup networks" call. The daemon does the actual bridge and route work.

pub mod bootstrap;
pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod logging;

/// Bootstrap client version (semver).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
