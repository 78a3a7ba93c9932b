//! Contract a storage engine implements to back a [`LogManager`].
//!
//! The manager sequences calls into these traits and layers its invariant
//! checks on top; it never persists anything itself.
//!
//! [`LogManager`]: crate::LogManager

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::types::{LogLag, LogOffset, LogPartition, LogRecord};

/// Storage engine hosting partitioned logs.
///
/// Optional capabilities are reported through `supports_*` queries; their
/// default implementations report the capability as missing.
#[async_trait]
pub trait LogBackend<M>: Send + Sync {
    /// Create a log with a fixed number of partitions.
    async fn create(&self, name: &str, size: u32) -> Result<()>;

    /// Whether a log exists.
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Whether [`LogBackend::delete`] is implemented.
    fn supports_delete(&self) -> bool {
        false
    }

    /// Delete a log, returns `false` when nothing was deleted.
    async fn delete(&self, _name: &str) -> Result<bool> {
        Ok(false)
    }

    /// Number of partitions of a log.
    async fn size(&self, name: &str) -> Result<u32>;

    /// Names of all the logs.
    async fn list_all(&self) -> Result<Vec<String>>;

    /// Groups that committed at least once on a log.
    async fn consumer_groups(&self, name: &str) -> Result<Vec<String>>;

    /// Lag of a group on each partition of a log, indexed by partition.
    async fn lag_per_partition(&self, name: &str, group: &str) -> Result<Vec<LogLag>>;

    /// Open a write path to a log.
    async fn create_appender(&self, name: &str) -> Result<Box<dyn LogAppender<M>>>;

    /// Open a read path on explicit partitions for a group.
    async fn create_tailer(
        &self,
        partitions: &[LogPartition],
        group: &str,
    ) -> Result<Box<dyn LogTailer<M>>>;

    /// Whether [`LogBackend::subscribe`] is implemented.
    fn supports_subscribe(&self) -> bool {
        false
    }

    /// Open a read path whose partitions are assigned dynamically.
    ///
    /// The backend calls `listener` each time the set of partitions owned by
    /// the returned tailer changes.
    async fn subscribe(
        &self,
        _group: &str,
        _names: &[String],
        _listener: Arc<dyn RebalanceListener>,
    ) -> Result<Box<dyn LogTailer<M>>> {
        Err(Error::Unsupported("subscribe"))
    }
}

/// Write path to one log.
#[async_trait]
pub trait LogAppender<M>: Send + Sync {
    fn name(&self) -> &str;

    /// Number of partitions of the log.
    fn size(&self) -> u32;

    /// Append a message to a partition and return the offset it was stored at.
    async fn append(&self, partition: u32, message: &M) -> Result<LogOffset>;

    /// Wait until `group` has committed past `offset`.
    ///
    /// Returns `false` when the timeout elapses first.
    async fn wait_for(&self, offset: &LogOffset, group: &str, timeout: Duration) -> Result<bool>;

    /// Release write resources. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// Read path on a set of partitions for one group.
#[async_trait]
pub trait LogTailer<M>: Send + Sync {
    fn group(&self) -> &str;

    /// Partitions currently served by this tailer.
    fn assignments(&self) -> Vec<LogPartition>;

    /// Next record in partition order, `None` if nothing arrives within `timeout`.
    async fn read(&mut self, timeout: Duration) -> Result<Option<LogRecord<M>>>;

    /// Commit the read position of every assigned partition.
    async fn commit(&mut self) -> Result<()>;

    /// Commit the read position of one partition.
    async fn commit_partition(&mut self, partition: &LogPartition) -> Result<LogOffset>;

    /// Move the read position of the offset's partition.
    async fn seek(&mut self, offset: &LogOffset) -> Result<()>;

    async fn to_start(&mut self) -> Result<()>;

    async fn to_end(&mut self) -> Result<()>;

    async fn to_last_committed(&mut self) -> Result<()>;

    /// Reset the committed offsets of the assigned partitions to the start.
    async fn reset(&mut self) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Notified when a subscription gains or loses partitions.
pub trait RebalanceListener: Send + Sync {
    fn on_partitions_revoked(&self, partitions: &[LogPartition]);

    fn on_partitions_assigned(&self, partitions: &[LogPartition]);
}

/// Listener ignoring rebalances.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRebalanceListener;

impl RebalanceListener for NoopRebalanceListener {
    fn on_partitions_revoked(&self, _partitions: &[LogPartition]) {}

    fn on_partitions_assigned(&self, _partitions: &[LogPartition]) {}
}
