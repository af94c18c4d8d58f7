//! # twinfold-core
//!
//! Domain model and consumed ports of the twinfold synchronization engine.
//!
//! The crate is organized following a ports-and-adapters layout:
//!
//! - [`domain`]: the comparison tree (arena-backed entity pairs), the closed
//!   set of sync operations, typed paths, and error types.
//! - [`ports`]: the interfaces the engine consumes — the abstract filesystem,
//!   the progress reporter, versioning/trash handles, and the sync-state
//!   store. Concrete backends (local disk, network shares, cloud) live in
//!   adapter crates and are injected by the caller.
//! - [`config`]: per-pair and engine-wide configuration.

pub mod config;
pub mod domain;
pub mod ports;
