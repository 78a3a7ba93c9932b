//! Read handles and the state the manager shares with them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::traits::LogTailer;
use crate::types::{LogOffset, LogPartition, LogRecord};

/// How a tailer got its partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailerKind {
    /// Explicit partitions, registered in the assignment table.
    Assigned,
    /// Partitions handed out by the backend through a subscription.
    Subscribed,
}

/// State shared between a [`Tailer`] and the manager's bookkeeping.
///
/// The manager checks `closed` to decide whether an assignment is still held
/// and closes the backend tailer on teardown.
pub(crate) struct TailerState<M> {
    id: u64,
    group: String,
    kind: TailerKind,
    closed: AtomicBool,
    cancel: CancellationToken,
    inner: Mutex<Box<dyn LogTailer<M>>>,
}

impl<M> TailerState<M>
where
    M: Send + 'static,
{
    pub(crate) fn new(id: u64, group: &str, kind: TailerKind, inner: Box<dyn LogTailer<M>>) -> Self {
        Self {
            id,
            group: group.to_string(),
            kind,
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            inner: Mutex::new(inner),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Mark closed, interrupt any pending read, then close the backend tailer.
    pub(crate) async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel.cancel();
        debug!(tailer = self.id, group = %self.group, "Closing tailer");
        self.inner.lock().await.close().await
    }
}

/// Read handle on one or more partitions for a consumer group.
///
/// Records come back in partition order; there is no ordering across
/// partitions. Dropping a tailer without closing it releases its partitions
/// as well.
pub struct Tailer<M>
where
    M: Send + 'static,
{
    state: Arc<TailerState<M>>,
}

impl<M> Tailer<M>
where
    M: Send + 'static,
{
    pub(crate) fn new(state: Arc<TailerState<M>>) -> Self {
        Self { state }
    }

    /// Identifier unique within the manager that created this tailer.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.state.id
    }

    #[must_use]
    pub fn group(&self) -> &str {
        &self.state.group
    }

    #[must_use]
    pub fn kind(&self) -> TailerKind {
        self.state.kind
    }

    /// Whether this tailer was closed, directly or by its manager.
    #[must_use]
    pub fn closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Partitions currently served.
    pub async fn assignments(&self) -> Result<Vec<LogPartition>> {
        Ok(self.lock_open().await?.assignments())
    }

    /// Read the next record, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when nothing arrived in time. A read interrupted by
    /// closing the tailer fails with [`Error::Cancelled`].
    pub async fn read(&mut self, timeout: Duration) -> Result<Option<LogRecord<M>>> {
        self.read_inner(timeout, None).await
    }

    /// Like [`Tailer::read`], also interrupted when `cancel` fires.
    pub async fn read_until(
        &mut self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<LogRecord<M>>> {
        self.read_inner(timeout, Some(cancel)).await
    }

    async fn read_inner(
        &mut self,
        timeout: Duration,
        external: Option<&CancellationToken>,
    ) -> Result<Option<LogRecord<M>>> {
        if self.state.is_closed() {
            return Err(Error::Closed(format!("tailer {}", self.state.id)));
        }
        let external = async {
            match external {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(external);

        let mut inner = tokio::select! {
            biased;
            _ = self.state.cancel.cancelled() => return Err(Error::Cancelled),
            _ = &mut external => return Err(Error::Cancelled),
            guard = self.lock_open() => guard?,
        };
        let record = tokio::select! {
            biased;
            _ = self.state.cancel.cancelled() => return Err(Error::Cancelled),
            _ = &mut external => return Err(Error::Cancelled),
            record = inner.read(timeout) => record?,
        };
        if let Some(record) = &record {
            trace!(tailer = self.state.id, offset = %record.offset, "Read record");
        }
        Ok(record)
    }

    /// Commit the read position of every assigned partition.
    pub async fn commit(&mut self) -> Result<()> {
        self.lock_open().await?.commit().await?;
        debug!(tailer = self.state.id, group = %self.state.group, "Committed");
        Ok(())
    }

    /// Commit the read position of one partition.
    pub async fn commit_partition(&mut self, partition: &LogPartition) -> Result<LogOffset> {
        let offset = self.lock_open().await?.commit_partition(partition).await?;
        debug!(tailer = self.state.id, group = %self.state.group, %offset, "Committed partition");
        Ok(offset)
    }

    /// Move the read position of one partition.
    ///
    /// Only assigned tailers can seek; a subscription may lose the partition
    /// at any rebalance.
    pub async fn seek(&mut self, offset: &LogOffset) -> Result<()> {
        if self.state.kind == TailerKind::Subscribed {
            return Err(Error::Unsupported("seek on a subscription"));
        }
        self.lock_open().await?.seek(offset).await
    }

    pub async fn to_start(&mut self) -> Result<()> {
        self.lock_open().await?.to_start().await
    }

    pub async fn to_end(&mut self) -> Result<()> {
        self.lock_open().await?.to_end().await
    }

    pub async fn to_last_committed(&mut self) -> Result<()> {
        self.lock_open().await?.to_last_committed().await
    }

    /// Reset the group's committed offsets of the assigned partitions.
    pub async fn reset(&mut self) -> Result<()> {
        self.lock_open().await?.reset().await
    }

    /// Close the tailer, its partitions can be assigned again right away.
    pub async fn close(&mut self) -> Result<()> {
        self.state.close().await
    }

    async fn lock_open(&self) -> Result<tokio::sync::MutexGuard<'_, Box<dyn LogTailer<M>>>> {
        if self.state.is_closed() {
            return Err(Error::Closed(format!("tailer {}", self.state.id)));
        }
        Ok(self.state.inner.lock().await)
    }
}

impl<M> Drop for Tailer<M>
where
    M: Send + 'static,
{
    fn drop(&mut self) {
        if self.state.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state.cancel.cancel();
        // The manager may still hold the state, release backend resources now
        // so a subscription member leaves its group.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let state = Arc::clone(&self.state);
        handle.spawn(async move {
            if let Err(e) = state.inner.lock().await.close().await {
                warn!(tailer = state.id, group = %state.group, error = %e, "Failed to close dropped tailer");
            }
        });
    }
}

impl<M> std::fmt::Debug for Tailer<M>
where
    M: Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tailer")
            .field("id", &self.state.id)
            .field("group", &self.state.group)
            .field("kind", &self.state.kind)
            .field("closed", &self.state.is_closed())
            .finish()
    }
}
