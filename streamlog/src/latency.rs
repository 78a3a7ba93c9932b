//! Latency sampling.
//!
//! The latency of a group on a partition is the age of the last record it
//! committed, read back through a transient tailer of the reserved
//! [`LogManagerConfig::latency_group`](crate::LogManagerConfig::latency_group).
//!
//! Sampling assumes the backend neither reorders nor drops a record between
//! the lag computation and the read that follows: a missing record is
//! reported as [`Error::LatencyReadFailure`] and never retried.

use chrono::Utc;
use tracing::warn;

use crate::error::{Error, Result};
use crate::manager::LogManager;
use crate::types::{Latency, LogLag, LogOffset, LogPartition, LogRecord};

impl<M> LogManager<M>
where
    M: Send + Sync + 'static,
{
    /// Latency of a group on each partition of a log.
    ///
    /// Partitions without records, or never committed by the group, give a
    /// zero sample. `timestamp_of` returns epoch milliseconds.
    pub async fn get_latency_per_partition<T, K>(
        &self,
        name: &str,
        group: &str,
        timestamp_of: T,
        key_of: K,
    ) -> Result<Vec<Latency>>
    where
        T: Fn(&M) -> i64 + Send + Sync,
        K: Fn(&M) -> Option<String> + Send + Sync,
    {
        let now = Utc::now().timestamp_millis();
        let lags = self.get_lag_per_partition(name, group).await?;
        let mut latencies = Vec::with_capacity(lags.len());
        for (partition, lag) in (0u32..).zip(lags) {
            if lag.upper == 0 || lag.lower == 0 {
                latencies.push(Latency::zero(now, lag));
                continue;
            }
            // The committed offset is the next record to process.
            let offset = LogOffset::new(LogPartition::new(name, partition), lag.lower - 1);
            let record = self.read_committed(offset, lag).await?;
            latencies.push(Latency::new(
                timestamp_of(&record.message),
                now,
                lag,
                key_of(&record.message),
            ));
        }
        Ok(latencies)
    }

    /// Latency of a group over a whole log.
    pub async fn get_latency<T, K>(
        &self,
        name: &str,
        group: &str,
        timestamp_of: T,
        key_of: K,
    ) -> Result<Latency>
    where
        T: Fn(&M) -> i64 + Send + Sync,
        K: Fn(&M) -> Option<String> + Send + Sync,
    {
        Ok(Latency::of(
            self.get_latency_per_partition(name, group, timestamp_of, key_of)
                .await?,
        ))
    }

    /// Read the record at `offset` with a transient tailer, always closed.
    async fn read_committed(&self, offset: LogOffset, lag: LogLag) -> Result<LogRecord<M>> {
        let mut tailer = self
            .create_tailer(&self.config().latency_group, &[offset.partition().clone()])
            .await?;
        let read = match tailer.seek(&offset).await {
            Ok(()) => tailer.read(self.config().latency_read_timeout).await,
            Err(e) => Err(e),
        };
        let closed = tailer.close().await;

        match read? {
            Some(record) => {
                if let Err(e) = closed {
                    warn!(%offset, error = %e, "Failed to close latency tailer");
                }
                Ok(record)
            }
            None => {
                warn!(%offset, %lag, "Committed record missing while sampling latency");
                Err(Error::LatencyReadFailure { offset, lag })
            }
        }
    }
}
