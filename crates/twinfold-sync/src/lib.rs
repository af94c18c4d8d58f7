//! # twinfold-sync
//!
//! The synchronization execution engine. Input: a comparison tree
//! ([`twinfold_core::domain::BaseFolderPair`]) whose items carry a desired
//! [`twinfold_core::domain::SyncOperation`]. Output: the real filesystems
//! mutated to match, the tree updated in place to reflect completed work.
//!
//! ## Architecture
//!
//! ```text
//!            ProgressReporter  <── main task ──  AsyncCoordinator
//!                  (GUI)                          ▲  requests / counters
//!                                                 │
//!                              worker tasks 1..N ─┘
//!                                   │  core mutex around the tree,
//!                                   │  released across filesystem awaits
//!                              Workload (buckets + folder queue,
//!                                        work stealing)
//! ```
//!
//! Each base pair runs three ordered passes: move preparation, then
//! deletions and shrinking overwrites, then creations and everything that
//! grows. See [`orchestrator::synchronize`] for the entry point.

pub mod coordinator;
pub mod deletion;
pub mod orchestrator;
pub mod pair_sync;
pub mod space;
pub mod stats;
pub mod workload;

pub use orchestrator::{synchronize, SyncError};
pub use stats::SyncStatistics;
