//! Log manager: the entry point application code talks to.
//!
//! Owns the appender cache, the live-tailer set and the assignment table,
//! and enforces that at most one live tailer serves a given
//! (group, partition) before delegating to the backend.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::appender::Appender;
use crate::config::LogManagerConfig;
use crate::error::{AssignmentConflict, Error, Result};
use crate::tailer::{Tailer, TailerKind, TailerState};
use crate::traits::{LogBackend, RebalanceListener};
use crate::types::{LogLag, LogPartition, PartitionGroup};

/// Live entries of the manager's bookkeeping collections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourceCounts {
    pub appenders: usize,
    pub tailers: usize,
    pub assignments: usize,
}

/// Coordinates appenders and tailers over an injected [`LogBackend`].
pub struct LogManager<M>
where
    M: Send + Sync + 'static,
{
    backend: Arc<dyn LogBackend<M>>,
    config: LogManagerConfig,
    /// Serializes check-then-create of logs.
    create_lock: Mutex<()>,
    appenders: Mutex<HashMap<String, Arc<Appender<M>>>>,
    /// (group, partition) to the tailer serving it. Entries of closed tailers
    /// are left in place and treated as free.
    assignments: Mutex<HashMap<PartitionGroup, Arc<TailerState<M>>>>,
    tailers: RwLock<HashMap<u64, Arc<TailerState<M>>>>,
    next_tailer_id: AtomicU64,
}

impl<M> LogManager<M>
where
    M: Send + Sync + 'static,
{
    /// Create a manager with the default configuration.
    pub fn new(backend: Arc<dyn LogBackend<M>>) -> Self {
        Self::with_config(backend, LogManagerConfig::default())
    }

    pub fn with_config(backend: Arc<dyn LogBackend<M>>, config: LogManagerConfig) -> Self {
        Self {
            backend,
            config,
            create_lock: Mutex::new(()),
            appenders: Mutex::new(HashMap::new()),
            assignments: Mutex::new(HashMap::new()),
            tailers: RwLock::new(HashMap::new()),
            next_tailer_id: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn config(&self) -> &LogManagerConfig {
        &self.config
    }

    // ===== Logs =====

    /// Create a log unless it exists, returns whether it was created.
    ///
    /// Concurrent callers racing on the same name see exactly one creation,
    /// including callers going through other managers of the same backend.
    pub async fn create_if_not_exists(&self, name: &str, size: u32) -> Result<bool> {
        if size == 0 {
            return Err(Error::InvalidPartitionCount {
                name: name.to_string(),
                size,
            });
        }
        let _guard = self.create_lock.lock().await;
        if self.backend.exists(name).await? {
            return Ok(false);
        }
        if let Err(e) = self.backend.create(name, size).await {
            // Another writer on the same backend may have won the race.
            if self.backend.exists(name).await? {
                debug!(log = name, error = %e, "Log created concurrently");
                return Ok(false);
            }
            return Err(e);
        }
        info!(log = name, partitions = size, "Created log");
        Ok(true)
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        self.backend.exists(name).await
    }

    /// Delete a log, `false` when the backend does not support deletion.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        if !self.backend.supports_delete() {
            return Ok(false);
        }
        let _guard = self.create_lock.lock().await;
        let deleted = self.backend.delete(name).await?;
        if deleted {
            info!(log = name, "Deleted log");
            let cached = self.appenders.lock().await.remove(name);
            if let Some(appender) = cached
                && let Err(e) = appender.close().await
            {
                warn!(log = name, error = %e, "Failed to close appender of deleted log");
            }
        }
        Ok(deleted)
    }

    /// Number of partitions of a log.
    pub async fn size(&self, name: &str) -> Result<u32> {
        self.ensure_exists(name).await?;
        self.backend.size(name).await
    }

    pub async fn list_all(&self) -> Result<Vec<String>> {
        self.backend.list_all().await
    }

    /// Groups that committed on a log.
    pub async fn list_consumer_groups(&self, name: &str) -> Result<Vec<String>> {
        self.ensure_exists(name).await?;
        self.backend.consumer_groups(name).await
    }

    async fn ensure_exists(&self, name: &str) -> Result<()> {
        if self.backend.exists(name).await? {
            Ok(())
        } else {
            Err(Error::UnknownLog(name.to_string()))
        }
    }

    // ===== Appenders =====

    /// Shared appender of a log.
    ///
    /// Repeated calls return the same instance while it is open.
    pub async fn get_appender(&self, name: &str) -> Result<Arc<Appender<M>>> {
        let mut appenders = self.appenders.lock().await;
        if let Some(appender) = appenders.get(name)
            && !appender.is_closed()
        {
            return Ok(Arc::clone(appender));
        }
        self.ensure_exists(name).await?;
        let appender = Arc::new(Appender::new(self.backend.create_appender(name).await?));
        appenders.insert(name.to_string(), Arc::clone(&appender));
        debug!(log = name, "Created appender");
        Ok(appender)
    }

    // ===== Tailers =====

    /// Create a tailer serving explicit partitions for `group`.
    ///
    /// Every partition is validated before anything is created: if one of
    /// them is held by a live tailer of the group, or does not exist, the call
    /// fails and none of them is assigned.
    pub async fn create_tailer(&self, group: &str, partitions: &[LogPartition]) -> Result<Tailer<M>> {
        let mut seen = HashSet::new();
        let partitions: Vec<LogPartition> = partitions
            .iter()
            .filter(|p| seen.insert(*p))
            .cloned()
            .collect();
        if partitions.is_empty() {
            return Err(Error::EmptyAssignment);
        }

        let mut assignments = self.assignments.lock().await;
        let mut sizes: HashMap<&str, Option<u32>> = HashMap::new();
        for partition in &partitions {
            let key = PartitionGroup::new(group, partition.clone());
            if assignments.get(&key).is_some_and(|owner| !owner.is_closed()) {
                return Err(invalid_assignment(group, partition, AssignmentConflict::AlreadyAssigned));
            }
            let size = match sizes.get(partition.name()) {
                Some(size) => *size,
                None => {
                    let size = if self.backend.exists(partition.name()).await? {
                        Some(self.backend.size(partition.name()).await?)
                    } else {
                        None
                    };
                    sizes.insert(partition.name(), size);
                    size
                }
            };
            match size {
                None => {
                    return Err(invalid_assignment(group, partition, AssignmentConflict::UnknownLog));
                }
                Some(size) if partition.partition() >= size => {
                    return Err(invalid_assignment(
                        group,
                        partition,
                        AssignmentConflict::PartitionOutOfRange,
                    ));
                }
                Some(_) => {}
            }
        }

        let inner = self.backend.create_tailer(&partitions, group).await?;
        let state = Arc::new(TailerState::new(
            self.next_tailer_id.fetch_add(1, Ordering::SeqCst),
            group,
            TailerKind::Assigned,
            inner,
        ));
        for partition in &partitions {
            assignments.insert(PartitionGroup::new(group, partition.clone()), Arc::clone(&state));
        }
        // Registered under the assignment guard so `close` sees both or neither.
        self.register(Arc::clone(&state)).await;
        drop(assignments);

        debug!(tailer = state.id(), group, partitions = partitions.len(), "Created tailer");
        Ok(Tailer::new(state))
    }

    /// Create a tailer serving every partition of a log.
    pub async fn create_tailer_for_log(&self, group: &str, name: &str) -> Result<Tailer<M>> {
        let size = self.size(name).await?;
        let partitions: Vec<LogPartition> = (0..size).map(|p| LogPartition::new(name, p)).collect();
        self.create_tailer(group, &partitions).await
    }

    /// Whether [`LogManager::subscribe`] is available on this backend.
    #[must_use]
    pub fn supports_subscribe(&self) -> bool {
        self.backend.supports_subscribe()
    }

    /// Create a tailer whose partitions are assigned by the backend.
    ///
    /// `listener` is called on every change of the subscription's partitions.
    /// Subscriptions do not go through the assignment table.
    pub async fn subscribe(
        &self,
        group: &str,
        names: &[String],
        listener: Arc<dyn RebalanceListener>,
    ) -> Result<Tailer<M>> {
        if !self.backend.supports_subscribe() {
            return Err(Error::Unsupported("subscribe"));
        }
        for name in names {
            self.ensure_exists(name).await?;
        }
        let inner = self.backend.subscribe(group, names, listener).await?;
        let state = Arc::new(TailerState::new(
            self.next_tailer_id.fetch_add(1, Ordering::SeqCst),
            group,
            TailerKind::Subscribed,
            inner,
        ));
        self.register(Arc::clone(&state)).await;
        debug!(tailer = state.id(), group, logs = ?names, "Subscribed");
        Ok(Tailer::new(state))
    }

    async fn register(&self, state: Arc<TailerState<M>>) {
        let mut tailers = self.tailers.write().await;
        tailers.retain(|_, t| !t.is_closed());
        tailers.insert(state.id(), state);
    }

    // ===== Lag =====

    /// Lag of a group on each partition of a log.
    pub async fn get_lag_per_partition(&self, name: &str, group: &str) -> Result<Vec<LogLag>> {
        self.ensure_exists(name).await?;
        self.backend.lag_per_partition(name, group).await
    }

    /// Lag of a group summed over every partition of a log.
    pub async fn get_lag(&self, name: &str, group: &str) -> Result<LogLag> {
        Ok(LogLag::of(self.get_lag_per_partition(name, group).await?))
    }

    // ===== Lifecycle =====

    /// Open appenders, live tailers and the assignments they hold.
    pub async fn resource_counts(&self) -> ResourceCounts {
        let appenders = self.appenders.lock().await.len();
        let tailers = self
            .tailers
            .read()
            .await
            .values()
            .filter(|t| !t.is_closed())
            .count();
        let assignments = self
            .assignments
            .lock()
            .await
            .values()
            .filter(|t| !t.is_closed())
            .count();
        ResourceCounts {
            appenders,
            tailers,
            assignments,
        }
    }

    /// Close every appender, then every tailer, and forget them.
    ///
    /// Writers stop before readers. A resource failing to close does not keep
    /// the others open; failures are reported together. Logs are kept.
    pub async fn close(&self) -> Result<()> {
        // Held until the table is cleared, no tailer can be assigned meanwhile.
        let mut assignments = self.assignments.lock().await;
        let appenders: Vec<_> = self.appenders.lock().await.drain().map(|(_, a)| a).collect();
        let tailers: Vec<_> = self.tailers.write().await.drain().map(|(_, t)| t).collect();
        if appenders.is_empty() && tailers.is_empty() {
            assignments.clear();
            return Ok(());
        }
        info!(
            appenders = appenders.len(),
            tailers = tailers.len(),
            "Closing log manager"
        );

        let mut failures = Vec::new();
        for appender in appenders {
            if let Err(e) = appender.close().await {
                warn!(log = appender.name(), error = %e, "Failed to close appender");
                failures.push(e);
            }
        }
        for tailer in tailers {
            if let Err(e) = tailer.close().await {
                warn!(tailer = tailer.id(), error = %e, "Failed to close tailer");
                failures.push(e);
            }
        }
        assignments.clear();
        drop(assignments);

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::CloseFailures(failures))
        }
    }
}

fn invalid_assignment(group: &str, partition: &LogPartition, reason: AssignmentConflict) -> Error {
    Error::InvalidAssignment {
        group: group.to_string(),
        partition: partition.clone(),
        reason,
    }
}
