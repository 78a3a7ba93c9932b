//! Error types for log management.

use std::fmt;

use crate::types::{LogLag, LogOffset, LogPartition};

/// Why a partition could not be assigned to a new tailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentConflict {
    /// A live tailer of the same group already owns the partition.
    AlreadyAssigned,
    /// The partition references a log that does not exist.
    UnknownLog,
    /// The partition index is beyond the log's partition count.
    PartitionOutOfRange,
}

impl fmt::Display for AssignmentConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyAssigned => write!(f, "already assigned to a live tailer"),
            Self::UnknownLog => write!(f, "unknown log"),
            Self::PartitionOutOfRange => write!(f, "partition out of range"),
        }
    }
}

/// Error type for log operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The operation referenced a log that does not exist.
    #[error("unknown log: {0}")]
    UnknownLog(String),

    /// A requested (group, partition) cannot be handed to a new tailer.
    #[error("invalid assignment of {partition} for group {group}: {reason}")]
    InvalidAssignment {
        group: String,
        partition: LogPartition,
        reason: AssignmentConflict,
    },

    /// A tailer was requested without any partition.
    #[error("tailer requested without any partition")]
    EmptyAssignment,

    /// The partition is not part of the tailer's current assignment.
    #[error("partition {0} is not assigned to this tailer")]
    NotAssigned(LogPartition),

    /// The partition index does not exist in the log.
    #[error("partition {partition} out of range for log {name} with {size} partitions")]
    PartitionOutOfRange {
        name: String,
        partition: u32,
        size: u32,
    },

    /// A log cannot be created with this partition count.
    #[error("invalid partition count {size} for log {name}")]
    InvalidPartitionCount { name: String, size: u32 },

    /// The backend failed to append a record.
    #[error("append to {log} failed: {reason}")]
    AppendFailure { log: String, reason: String },

    /// Lag bounds implied a committed record that could not be read back.
    #[error("unable to read {offset} with {lag}")]
    LatencyReadFailure { offset: LogOffset, lag: LogLag },

    /// A blocking call was interrupted.
    #[error("operation cancelled")]
    Cancelled,

    /// The backend does not implement this capability.
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),

    /// The handle has been closed.
    #[error("{0} is closed")]
    Closed(String),

    /// Backend specific failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// Record payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed.
    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// One or more resources failed to close during teardown.
    #[error("{} resource(s) failed to close", .0.len())]
    CloseFailures(Vec<Error>),
}

/// Result type alias for log operations.
pub type Result<T> = std::result::Result<T, Error>;
