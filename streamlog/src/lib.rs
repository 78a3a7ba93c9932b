//! Partitioned append-only logs with consumer-group semantics.
//!
//! This crate is the read/write coordination layer over a pluggable log
//! storage. Applications talk to a [`LogManager`], which hands out shared
//! [`Appender`]s and exclusive [`Tailer`]s, guarantees that at most one live
//! tailer serves a (group, partition), and computes lag and latency from
//! committed offsets. The storage itself is injected as a [`LogBackend`].
//!
//! # Key Types
//!
//! - [`LogManager`] - Entry point, owns appenders, tailers and assignments
//! - [`LogBackend`] - Contract a storage engine implements
//! - [`Appender`] / [`Tailer`] - Write and read handles
//! - [`MemoryBackend`] - In-memory backend for tests and embedding
//! - [`LogLag`] / [`Latency`] - How far a group trails the writer

pub mod appender;
pub mod config;
pub mod error;
mod latency;
pub mod manager;
pub mod memory;
pub mod tailer;
pub mod traits;
pub mod types;

// Re-exports
pub use appender::Appender;
pub use config::LogManagerConfig;
pub use error::{AssignmentConflict, Error, Result};
pub use manager::{LogManager, ResourceCounts};
pub use memory::MemoryBackend;
pub use tailer::{Tailer, TailerKind};
pub use traits::{LogAppender, LogBackend, LogTailer, NoopRebalanceListener, RebalanceListener};
pub use types::{
    Latency, LogLag, LogOffset, LogPartition, LogRecord, Partitionable, partition_for_key,
};
