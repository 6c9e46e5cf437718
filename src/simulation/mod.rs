//! In-memory implementations of every merge collaborator.
//!
//! Used by the test suite and by `shardmerge-tool simulate` to exercise the
//! full merge procedure without real database hosts.

mod cluster;
mod node;
mod services;
mod world;

pub use cluster::{SimulatedCluster, default_tables};
pub use node::{SimRow, SimulatedNode};
pub use services::{InMemoryShardRegistry, SimulatedFileTransfer, SimulatedShell};
pub use world::{SimEvent, SimulatedFilesystem, SimulationLog};
