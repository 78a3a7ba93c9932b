//! Tailer of the in-memory backend.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{MemoryLog, Shared};
use crate::error::{Error, Result};
use crate::traits::{LogTailer, RebalanceListener};
use crate::types::{LogOffset, LogPartition, LogRecord};

/// Membership of a subscribed tailer in its group.
struct Membership {
    member: u64,
    /// Last group epoch applied to `assignments`.
    epoch: u64,
    listener: Arc<dyn RebalanceListener>,
}

pub(crate) struct MemoryTailer<M> {
    group: String,
    shared: Arc<Shared>,
    logs: HashMap<String, Arc<MemoryLog>>,
    assignments: Vec<LogPartition>,
    positions: HashMap<LogPartition, u64>,
    /// Partition to look at first on the next read.
    cursor: usize,
    membership: Option<Membership>,
    closed: bool,
    _phantom: PhantomData<fn() -> M>,
}

impl<M> MemoryTailer<M> {
    pub(crate) fn new(group: &str, shared: Arc<Shared>) -> Self {
        Self {
            group: group.to_string(),
            shared,
            logs: HashMap::new(),
            assignments: Vec::new(),
            positions: HashMap::new(),
            cursor: 0,
            membership: None,
            closed: false,
            _phantom: PhantomData,
        }
    }

    /// A tailer with no partition until its first reconciliation.
    pub(crate) fn subscribed(
        group: &str,
        shared: Arc<Shared>,
        member: u64,
        listener: Arc<dyn RebalanceListener>,
    ) -> Self {
        let mut tailer = Self::new(group, shared);
        tailer.membership = Some(Membership {
            member,
            epoch: 0,
            listener,
        });
        tailer
    }

    /// Take `partitions`, starting each from the group's committed offset.
    pub(crate) async fn assign(&mut self, partitions: Vec<LogPartition>) -> Result<()> {
        for partition in &partitions {
            let log = match self.logs.get(partition.name()) {
                Some(log) => Arc::clone(log),
                None => {
                    let log = self.shared.log(partition.name()).await?;
                    self.logs.insert(partition.name().to_string(), Arc::clone(&log));
                    log
                }
            };
            log.partition(partition.partition())?;
            let position = log
                .committed(&self.group, partition.partition())
                .await
                .unwrap_or(0);
            self.positions.insert(partition.clone(), position);
        }
        self.assignments.extend(partitions);
        Ok(())
    }

    /// Apply the group's latest assignment if it changed since the last call.
    async fn reconcile(&mut self) -> Result<()> {
        let (member, applied, listener) = match &self.membership {
            Some(m) => (m.member, m.epoch, Arc::clone(&m.listener)),
            None => return Ok(()),
        };
        let Some((epoch, target)) = self.shared.coordinator.assignment(&self.group, member) else {
            return Ok(());
        };
        if epoch == applied {
            return Ok(());
        }

        let revoked: Vec<LogPartition> = self
            .assignments
            .iter()
            .filter(|p| !target.contains(p))
            .cloned()
            .collect();
        let added: Vec<LogPartition> = target
            .iter()
            .filter(|p| !self.assignments.contains(p))
            .cloned()
            .collect();

        if !revoked.is_empty() {
            self.assignments.retain(|p| target.contains(p));
            for partition in &revoked {
                self.positions.remove(partition);
            }
            listener.on_partitions_revoked(&revoked);
        }
        if !added.is_empty() {
            self.assign(added.clone()).await?;
            listener.on_partitions_assigned(&added);
        }
        self.cursor = 0;
        if let Some(m) = self.membership.as_mut() {
            m.epoch = epoch;
        }
        debug!(
            group = %self.group,
            member,
            epoch,
            revoked = revoked.len(),
            assigned = added.len(),
            "Rebalanced subscription"
        );
        Ok(())
    }

    fn log_of(&self, partition: &LogPartition) -> Result<&Arc<MemoryLog>> {
        self.logs
            .get(partition.name())
            .ok_or_else(|| Error::NotAssigned(partition.clone()))
    }

    fn ensure_assigned(&self, partition: &LogPartition) -> Result<()> {
        if self.assignments.contains(partition) {
            Ok(())
        } else {
            Err(Error::NotAssigned(partition.clone()))
        }
    }

    async fn store_commit(&self, partition: &LogPartition) -> Result<LogOffset> {
        let position = self.positions.get(partition).copied().unwrap_or(0);
        self.log_of(partition)?
            .store_committed(&self.group, partition.partition(), position)
            .await;
        Ok(LogOffset::new(partition.clone(), position))
    }

    fn leave(&mut self) {
        if let Some(membership) = self.membership.take() {
            self.shared.coordinator.leave(&self.group, membership.member);
            self.shared.changed.notify_waiters();
            debug!(group = %self.group, member = membership.member, "Member left subscription group");
        }
    }
}

impl<M> MemoryTailer<M>
where
    M: DeserializeOwned,
{
    /// Next available record, scanning partitions round-robin from the cursor.
    async fn poll(&mut self) -> Result<Option<LogRecord<M>>> {
        let count = self.assignments.len();
        for step in 0..count {
            let index = (self.cursor + step) % count;
            let partition = self.assignments[index].clone();
            let position = self.positions.get(&partition).copied().unwrap_or(0);
            let payload = {
                let records = self.log_of(&partition)?.partition(partition.partition())?.read().await;
                records.get(position as usize).map(|record| record.payload.clone())
            };
            if let Some(payload) = payload {
                let message: M = serde_json::from_slice(&payload)?;
                self.positions.insert(partition.clone(), position + 1);
                self.cursor = (index + 1) % count;
                return Ok(Some(LogRecord {
                    message,
                    offset: LogOffset::new(partition, position),
                }));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl<M> LogTailer<M> for MemoryTailer<M>
where
    M: DeserializeOwned + Send + Sync + 'static,
{
    fn group(&self) -> &str {
        &self.group
    }

    fn assignments(&self) -> Vec<LogPartition> {
        self.assignments.clone()
    }

    async fn read(&mut self, timeout: Duration) -> Result<Option<LogRecord<M>>> {
        if self.closed {
            return Err(Error::Closed(format!("tailer of group {}", self.group)));
        }
        let deadline = tokio::time::Instant::now() + timeout;
        let shared = Arc::clone(&self.shared);
        loop {
            let notified = shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.reconcile().await?;
            if let Some(record) = self.poll().await? {
                return Ok(Some(record));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn commit(&mut self) -> Result<()> {
        for partition in &self.assignments {
            self.store_commit(partition).await?;
        }
        self.shared.committed.notify_waiters();
        Ok(())
    }

    async fn commit_partition(&mut self, partition: &LogPartition) -> Result<LogOffset> {
        self.ensure_assigned(partition)?;
        let offset = self.store_commit(partition).await?;
        self.shared.committed.notify_waiters();
        Ok(offset)
    }

    async fn seek(&mut self, offset: &LogOffset) -> Result<()> {
        self.ensure_assigned(offset.partition())?;
        self.positions
            .insert(offset.partition().clone(), offset.offset());
        Ok(())
    }

    async fn to_start(&mut self) -> Result<()> {
        for partition in &self.assignments {
            self.positions.insert(partition.clone(), 0);
        }
        Ok(())
    }

    async fn to_end(&mut self) -> Result<()> {
        for partition in self.assignments.clone() {
            let end = self
                .log_of(&partition)?
                .end_offset(partition.partition())
                .await?;
            self.positions.insert(partition, end);
        }
        Ok(())
    }

    async fn to_last_committed(&mut self) -> Result<()> {
        for partition in self.assignments.clone() {
            let committed = self
                .log_of(&partition)?
                .committed(&self.group, partition.partition())
                .await
                .unwrap_or(0);
            self.positions.insert(partition, committed);
        }
        Ok(())
    }

    async fn reset(&mut self) -> Result<()> {
        for partition in self.assignments.clone() {
            self.log_of(&partition)?
                .store_committed(&self.group, partition.partition(), 0)
                .await;
            self.positions.insert(partition, 0);
        }
        self.shared.committed.notify_waiters();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.leave();
        Ok(())
    }
}

impl<M> Drop for MemoryTailer<M> {
    fn drop(&mut self) {
        self.leave();
    }
}
