//! In-memory backend.
//!
//! Stores JSON-encoded records per partition without persistence. Useful for
//! testing and for embedding without an external log service. Supports
//! deletion and subscriptions.

mod group;
mod tailer;

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Notify, RwLock};
use tracing::debug;

use crate::error::{Error, Result};
use crate::traits::{LogAppender, LogBackend, LogTailer, RebalanceListener};
use crate::types::{LogLag, LogOffset, LogPartition};

use self::group::Coordinator;
use self::tailer::MemoryTailer;

/// State shared between the backend, its appenders and its tailers.
pub(crate) struct Shared {
    logs: RwLock<HashMap<String, Arc<MemoryLog>>>,
    coordinator: Coordinator,
    /// Woken on appends and on subscription changes.
    changed: Notify,
    /// Woken on commits.
    committed: Notify,
}

impl Shared {
    async fn log(&self, name: &str) -> Result<Arc<MemoryLog>> {
        self.logs
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownLog(name.to_string()))
    }
}

/// A stored record: JSON payload and the time it was appended.
pub(crate) struct StoredRecord {
    appended_at: DateTime<Utc>,
    payload: Vec<u8>,
}

/// One log: records and committed offsets per partition.
pub(crate) struct MemoryLog {
    name: String,
    partitions: Vec<RwLock<Vec<StoredRecord>>>,
    /// (group, partition) to the offset of the next record to process.
    committed: RwLock<HashMap<(String, u32), u64>>,
    deleted: AtomicBool,
}

impl MemoryLog {
    fn new(name: &str, size: u32) -> Self {
        Self {
            name: name.to_string(),
            partitions: (0..size).map(|_| RwLock::new(Vec::new())).collect(),
            committed: RwLock::new(HashMap::new()),
            deleted: AtomicBool::new(false),
        }
    }

    fn size(&self) -> u32 {
        self.partitions.len() as u32
    }

    fn partition(&self, partition: u32) -> Result<&RwLock<Vec<StoredRecord>>> {
        self.partitions
            .get(partition as usize)
            .ok_or_else(|| Error::PartitionOutOfRange {
                name: self.name.clone(),
                partition,
                size: self.size(),
            })
    }

    async fn end_offset(&self, partition: u32) -> Result<u64> {
        Ok(self.partition(partition)?.read().await.len() as u64)
    }

    async fn committed(&self, group: &str, partition: u32) -> Option<u64> {
        self.committed
            .read()
            .await
            .get(&(group.to_string(), partition))
            .copied()
    }

    async fn store_committed(&self, group: &str, partition: u32, offset: u64) {
        self.committed
            .write()
            .await
            .insert((group.to_string(), partition), offset);
    }
}

/// In-memory implementation of [`LogBackend`].
pub struct MemoryBackend<M> {
    shared: Arc<Shared>,
    _phantom: PhantomData<fn() -> M>,
}

impl<M> MemoryBackend<M>
where
    M: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                logs: RwLock::new(HashMap::new()),
                coordinator: Coordinator::default(),
                changed: Notify::new(),
                committed: Notify::new(),
            }),
            _phantom: PhantomData,
        }
    }

    /// Total number of records across the partitions of a log.
    pub async fn total_count(&self, name: &str) -> Result<u64> {
        let log = self.shared.log(name).await?;
        let mut total = 0;
        for partition in 0..log.size() {
            total += log.end_offset(partition).await?;
        }
        Ok(total)
    }

    /// When the record at `offset` was appended, `None` past the end.
    pub async fn appended_at(&self, offset: &LogOffset) -> Result<Option<DateTime<Utc>>> {
        let log = self.shared.log(offset.partition().name()).await?;
        let records = log.partition(offset.partition().partition())?.read().await;
        Ok(records
            .get(offset.offset() as usize)
            .map(|record| record.appended_at))
    }
}

impl<M> Default for MemoryBackend<M>
where
    M: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<M> LogBackend<M> for MemoryBackend<M>
where
    M: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn create(&self, name: &str, size: u32) -> Result<()> {
        if size == 0 {
            return Err(Error::InvalidPartitionCount {
                name: name.to_string(),
                size,
            });
        }
        let mut logs = self.shared.logs.write().await;
        if logs.contains_key(name) {
            return Err(Error::Backend(format!("log {name} already exists")));
        }
        logs.insert(name.to_string(), Arc::new(MemoryLog::new(name, size)));
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.shared.logs.read().await.contains_key(name))
    }

    fn supports_delete(&self) -> bool {
        true
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        match self.shared.logs.write().await.remove(name) {
            Some(log) => {
                log.deleted.store(true, Ordering::SeqCst);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn size(&self, name: &str) -> Result<u32> {
        Ok(self.shared.log(name).await?.size())
    }

    async fn list_all(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.shared.logs.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn consumer_groups(&self, name: &str) -> Result<Vec<String>> {
        let log = self.shared.log(name).await?;
        let mut groups: Vec<String> = log
            .committed
            .read()
            .await
            .keys()
            .map(|(group, _)| group.clone())
            .collect();
        groups.sort();
        groups.dedup();
        Ok(groups)
    }

    async fn lag_per_partition(&self, name: &str, group: &str) -> Result<Vec<LogLag>> {
        let log = self.shared.log(name).await?;
        let mut lags = Vec::with_capacity(log.size() as usize);
        for partition in 0..log.size() {
            let upper = log.end_offset(partition).await?;
            let lower = log.committed(group, partition).await.unwrap_or(0);
            lags.push(LogLag::new(lower, upper));
        }
        Ok(lags)
    }

    async fn create_appender(&self, name: &str) -> Result<Box<dyn LogAppender<M>>> {
        let log = self.shared.log(name).await?;
        Ok(Box::new(MemoryAppender::<M> {
            log,
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
            _phantom: PhantomData,
        }))
    }

    async fn create_tailer(
        &self,
        partitions: &[LogPartition],
        group: &str,
    ) -> Result<Box<dyn LogTailer<M>>> {
        let mut tailer: MemoryTailer<M> = MemoryTailer::new(group, Arc::clone(&self.shared));
        tailer.assign(partitions.to_vec()).await?;
        Ok(Box::new(tailer))
    }

    fn supports_subscribe(&self) -> bool {
        true
    }

    async fn subscribe(
        &self,
        group: &str,
        names: &[String],
        listener: Arc<dyn RebalanceListener>,
    ) -> Result<Box<dyn LogTailer<M>>> {
        let mut logs = Vec::with_capacity(names.len());
        for name in names {
            logs.push((name.clone(), self.shared.log(name).await?.size()));
        }
        let member = self.shared.coordinator.join(group, logs);
        self.shared.changed.notify_waiters();
        debug!(group, member, "Member joined subscription group");
        Ok(Box::new(MemoryTailer::<M>::subscribed(
            group,
            Arc::clone(&self.shared),
            member,
            listener,
        )))
    }
}

/// Write path to a [`MemoryLog`].
struct MemoryAppender<M> {
    log: Arc<MemoryLog>,
    shared: Arc<Shared>,
    closed: AtomicBool,
    _phantom: PhantomData<fn(&M)>,
}

#[async_trait]
impl<M> LogAppender<M> for MemoryAppender<M>
where
    M: Serialize + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.log.name
    }

    fn size(&self) -> u32 {
        self.log.size()
    }

    async fn append(&self, partition: u32, message: &M) -> Result<LogOffset> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed(format!("appender {}", self.log.name)));
        }
        if self.log.deleted.load(Ordering::SeqCst) {
            return Err(Error::AppendFailure {
                log: self.log.name.clone(),
                reason: "log deleted".to_string(),
            });
        }
        let payload = serde_json::to_vec(message)?;
        let offset = {
            let mut records = self.log.partition(partition)?.write().await;
            records.push(StoredRecord {
                appended_at: Utc::now(),
                payload,
            });
            records.len() as u64 - 1
        };
        self.shared.changed.notify_waiters();
        Ok(LogOffset::new(
            LogPartition::new(self.log.name.clone(), partition),
            offset,
        ))
    }

    async fn wait_for(&self, offset: &LogOffset, group: &str, timeout: Duration) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        let partition = offset.partition().partition();
        loop {
            let notified = self.shared.committed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self
                .log
                .committed(group, partition)
                .await
                .is_some_and(|committed| committed > offset.offset())
            {
                return Ok(true);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(false);
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend_with(name: &str, size: u32) -> MemoryBackend<String> {
        let backend = MemoryBackend::new();
        backend.create(name, size).await.unwrap();
        backend
    }

    #[tokio::test]
    async fn append_returns_incrementing_offsets_per_partition() {
        let backend = backend_with("events", 2).await;
        let appender = backend.create_appender("events").await.unwrap();

        let o1 = appender.append(0, &"first".to_string()).await.unwrap();
        let o2 = appender.append(0, &"second".to_string()).await.unwrap();
        let o3 = appender.append(1, &"third".to_string()).await.unwrap();

        assert_eq!(o1.offset(), 0);
        assert_eq!(o2.offset(), 1);
        assert_eq!(o3.offset(), 0);
        assert_eq!(o3.partition(), &LogPartition::new("events", 1));
        assert_eq!(backend.total_count("events").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn records_keep_their_append_time() {
        let backend = backend_with("events", 1).await;
        let appender = backend.create_appender("events").await.unwrap();

        let before = Utc::now();
        let first = appender.append(0, &"first".to_string()).await.unwrap();
        let second = appender.append(0, &"second".to_string()).await.unwrap();
        let after = Utc::now();

        let first_at = backend.appended_at(&first).await.unwrap().unwrap();
        let second_at = backend.appended_at(&second).await.unwrap().unwrap();
        assert!(before <= first_at && first_at <= second_at && second_at <= after);
        assert!(backend.appended_at(&second.next()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_twice_fails() {
        let backend = backend_with("events", 1).await;
        let result = backend.create("events", 1).await;
        assert!(matches!(result, Err(Error::Backend(_))));
    }

    #[tokio::test]
    async fn create_rejects_zero_partitions() {
        let backend: MemoryBackend<String> = MemoryBackend::new();
        let result = backend.create("events", 0).await;
        assert!(matches!(result, Err(Error::InvalidPartitionCount { .. })));
    }

    #[tokio::test]
    async fn append_to_missing_partition_fails() {
        let backend = backend_with("events", 1).await;
        let appender = backend.create_appender("events").await.unwrap();

        let result = appender.append(3, &"lost".to_string()).await;
        assert!(matches!(
            result,
            Err(Error::PartitionOutOfRange { partition: 3, size: 1, .. })
        ));
    }

    #[tokio::test]
    async fn append_after_delete_fails() {
        let backend = backend_with("events", 1).await;
        let appender = backend.create_appender("events").await.unwrap();

        assert!(backend.delete("events").await.unwrap());
        assert!(!backend.delete("events").await.unwrap());

        let result = appender.append(0, &"late".to_string()).await;
        assert!(matches!(result, Err(Error::AppendFailure { .. })));
    }

    #[tokio::test]
    async fn lag_tracks_commits_per_group() {
        let backend = backend_with("events", 2).await;
        let appender = backend.create_appender("events").await.unwrap();
        for i in 0..4 {
            appender.append(0, &format!("event-{i}")).await.unwrap();
        }

        let mut tailer = backend
            .create_tailer(&[LogPartition::new("events", 0)], "g")
            .await
            .unwrap();
        tailer.read(Duration::from_millis(10)).await.unwrap();
        tailer.read(Duration::from_millis(10)).await.unwrap();
        tailer.commit().await.unwrap();

        let lags = backend.lag_per_partition("events", "g").await.unwrap();
        assert_eq!(lags, vec![LogLag::new(2, 4), LogLag::new(0, 0)]);

        let other = backend.lag_per_partition("events", "other").await.unwrap();
        assert_eq!(other[0], LogLag::new(0, 4));

        assert_eq!(backend.consumer_groups("events").await.unwrap(), vec!["g"]);
    }

    #[tokio::test]
    async fn list_all_is_sorted() {
        let backend: MemoryBackend<String> = MemoryBackend::new();
        backend.create("b", 1).await.unwrap();
        backend.create("a", 1).await.unwrap();

        assert_eq!(backend.list_all().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn wait_for_returns_once_group_committed() {
        let backend = Arc::new(backend_with("events", 1).await);
        let appender = backend.create_appender("events").await.unwrap();
        let offset = appender.append(0, &"event".to_string()).await.unwrap();

        assert!(
            !appender
                .wait_for(&offset, "g", Duration::from_millis(10))
                .await
                .unwrap()
        );

        let consumer = Arc::clone(&backend);
        let handle = tokio::spawn(async move {
            let mut tailer = consumer
                .create_tailer(&[LogPartition::new("events", 0)], "g")
                .await
                .unwrap();
            tailer.read(Duration::from_secs(1)).await.unwrap();
            tailer.commit().await.unwrap();
        });

        assert!(
            appender
                .wait_for(&offset, "g", Duration::from_secs(5))
                .await
                .unwrap()
        );
        handle.await.unwrap();
    }
}
