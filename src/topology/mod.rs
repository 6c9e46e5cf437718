//! Contracts for the systems a merge drives: database nodes, file copies,
//! remote shells, the shard registry and table metadata.

pub mod entity;
pub mod node;
pub mod services;
pub mod tables;

pub use entity::TopologyEntity;
pub use node::{AggregateNode, DatabaseNode, QueryRow};
pub use services::{FileTransfer, RemoteShell, ShardRegistry};
pub use tables::{MergeTableSet, StaticTables, Table, TableMetadata};
