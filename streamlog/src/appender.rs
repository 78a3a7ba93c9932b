//! Shared write handle handed out by the manager.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::traits::LogAppender;
use crate::types::{LogOffset, Partitionable, partition_for_key};

/// Write handle to one log.
///
/// The manager caches one `Appender` per log and shares it behind an `Arc`,
/// so it can be used from many tasks at once.
pub struct Appender<M> {
    name: String,
    size: u32,
    inner: Box<dyn LogAppender<M>>,
    closed: AtomicBool,
}

impl<M> Appender<M>
where
    M: Send + Sync + 'static,
{
    pub(crate) fn new(inner: Box<dyn LogAppender<M>>) -> Self {
        Self {
            name: inner.name().to_string(),
            size: inner.size(),
            inner,
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of partitions of the log.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Append a message to a partition.
    ///
    /// Backend failures are returned as is, retrying is up to the caller.
    pub async fn append(&self, partition: u32, message: &M) -> Result<LogOffset> {
        if self.is_closed() {
            return Err(Error::Closed(format!("appender {}", self.name)));
        }
        if partition >= self.size {
            return Err(Error::PartitionOutOfRange {
                name: self.name.clone(),
                partition,
                size: self.size,
            });
        }
        match self.inner.append(partition, message).await {
            Ok(offset) => Ok(offset),
            Err(e) => {
                warn!(log = %self.name, partition, error = %e, "Append failed");
                Err(e)
            }
        }
    }

    /// Append a message to the partition its key hashes to.
    pub async fn append_key(&self, key: &str, message: &M) -> Result<LogOffset> {
        self.append(partition_for_key(key, self.size), message).await
    }

    /// Wait until `group` has committed past `offset`, `false` on timeout.
    pub async fn wait_for(&self, offset: &LogOffset, group: &str, timeout: Duration) -> Result<bool> {
        if self.is_closed() {
            return Err(Error::Closed(format!("appender {}", self.name)));
        }
        self.inner.wait_for(offset, group, timeout).await
    }

    /// Release the write path. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(log = %self.name, "Closing appender");
        self.inner.close().await
    }
}

impl<M> Appender<M>
where
    M: Partitionable + Send + Sync + 'static,
{
    /// Append a message routed by its own partition key.
    pub async fn append_partitioned(&self, message: &M) -> Result<LogOffset> {
        match message.partition_key() {
            Some(key) => self.append_key(key, message).await,
            None => self.append(0, message).await,
        }
    }
}

impl<M> std::fmt::Debug for Appender<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Appender")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}
