//! Value types identifying logs, partitions and positions.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A partition of a named log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogPartition {
    name: String,
    partition: u32,
}

impl LogPartition {
    /// Create a partition reference.
    pub fn new(name: impl Into<String>, partition: u32) -> Self {
        Self {
            name: name.into(),
            partition,
        }
    }

    /// Name of the log owning this partition.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index of the partition within its log.
    #[must_use]
    pub fn partition(&self) -> u32 {
        self.partition
    }
}

impl fmt::Display for LogPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.partition)
    }
}

/// A position within a partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogOffset {
    partition: LogPartition,
    offset: u64,
}

impl LogOffset {
    /// Create an offset within `partition`.
    pub fn new(partition: LogPartition, offset: u64) -> Self {
        Self { partition, offset }
    }

    #[must_use]
    pub fn partition(&self) -> &LogPartition {
        &self.partition
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The offset of the record following this one.
    #[must_use]
    pub fn next(&self) -> Self {
        Self {
            partition: self.partition.clone(),
            offset: self.offset + 1,
        }
    }
}

impl fmt::Display for LogOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.partition, self.offset)
    }
}

/// A record read from a partition, with the offset it was stored at.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord<M> {
    pub message: M,
    pub offset: LogOffset,
}

/// Gap between the writer and a consumer group on one or more partitions.
///
/// `upper` is the end offset of the partition (number of records written),
/// `lower` the committed offset of the group, that is the offset of the next
/// record the group has to process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLag {
    pub lower: u64,
    pub upper: u64,
}

impl LogLag {
    #[must_use]
    pub fn new(lower: u64, upper: u64) -> Self {
        Self { lower, upper }
    }

    /// Number of records not yet committed by the group.
    #[must_use]
    pub fn lag(&self) -> u64 {
        self.upper.saturating_sub(self.lower)
    }

    /// Sum the bounds of per-partition lags.
    pub fn of(lags: impl IntoIterator<Item = LogLag>) -> Self {
        lags.into_iter().fold(Self::default(), |acc, lag| Self {
            lower: acc.lower + lag.lower,
            upper: acc.upper + lag.upper,
        })
    }
}

impl fmt::Display for LogLag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lag {} (lower: {}, upper: {})",
            self.lag(),
            self.lower,
            self.upper
        )
    }
}

/// Age of the oldest record a group has not yet processed.
///
/// Timestamps are epoch milliseconds. `timestamp` comes from the last committed
/// record, `now` is the wall clock at sampling time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Latency {
    pub timestamp: i64,
    pub now: i64,
    pub lag: LogLag,
    pub key: Option<String>,
}

impl Latency {
    pub fn new(timestamp: i64, now: i64, lag: LogLag, key: Option<String>) -> Self {
        Self {
            timestamp,
            now,
            lag,
            key,
        }
    }

    /// A sample for a partition with nothing written or nothing consumed.
    #[must_use]
    pub fn zero(now: i64, lag: LogLag) -> Self {
        Self::new(0, now, lag, None)
    }

    /// Latency in milliseconds, `0` when the group is caught up.
    #[must_use]
    pub fn latency(&self) -> i64 {
        if self.timestamp <= 0 || self.lag.lag() == 0 {
            return 0;
        }
        (self.now - self.timestamp).max(0)
    }

    /// Aggregate per-partition samples: lags are summed, the worst latency wins.
    pub fn of(latencies: impl IntoIterator<Item = Latency>) -> Self {
        let mut lags = Vec::new();
        let mut worst: Option<Latency> = None;
        let mut now = 0;
        for latency in latencies {
            lags.push(latency.lag);
            now = now.max(latency.now);
            let replace = match &worst {
                Some(current) => latency.latency() > current.latency(),
                None => true,
            };
            if replace {
                worst = Some(latency);
            }
        }
        let lag = LogLag::of(lags);
        match worst {
            Some(w) if w.latency() > 0 => Self::new(w.timestamp, now, lag, w.key),
            _ => Self::zero(now, lag),
        }
    }
}

impl fmt::Display for Latency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "latency {}ms, {}", self.latency(), self.lag)?;
        if let Some(key) = &self.key {
            write!(f, ", key: {key}")?;
        }
        Ok(())
    }
}

/// Messages that know which partition they belong to.
pub trait Partitionable {
    /// Key used to route the message, `None` routes to partition 0.
    fn partition_key(&self) -> Option<&str>;
}

/// Route a key to one of `size` partitions.
///
/// Stable within one build only: `DefaultHasher` output may change between
/// Rust releases, so routing is not a persisted contract.
pub fn partition_for_key(key: &str, size: u32) -> u32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % u64::from(size.max(1))) as u32
}

/// Key of the assignment table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PartitionGroup {
    pub group: String,
    pub partition: LogPartition,
}

impl PartitionGroup {
    pub(crate) fn new(group: &str, partition: LogPartition) -> Self {
        Self {
            group: group.to_string(),
            partition,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_display() {
        assert_eq!(LogPartition::new("events", 3).to_string(), "events:3");
        let offset = LogOffset::new(LogPartition::new("events", 3), 42);
        assert_eq!(offset.to_string(), "events:3+42");
        assert_eq!(offset.next().offset(), 43);
    }

    #[test]
    fn lag_of_fresh_partition_is_zero() {
        let lag = LogLag::default();
        assert_eq!(lag, LogLag::new(0, 0));
        assert_eq!(lag.lag(), 0);
    }

    #[test]
    fn lag_never_underflows() {
        assert_eq!(LogLag::new(5, 3).lag(), 0);
        assert_eq!(LogLag::new(3, 5).lag(), 2);
    }

    #[test]
    fn lag_of_sums_bounds() {
        let lag = LogLag::of([LogLag::new(3, 5), LogLag::new(0, 2), LogLag::new(1, 1)]);
        assert_eq!(lag, LogLag::new(4, 8));
        assert_eq!(lag.lag(), 4);
    }

    #[test]
    fn latency_is_zero_when_caught_up() {
        let latency = Latency::new(1_000, 5_000, LogLag::new(5, 5), None);
        assert_eq!(latency.latency(), 0);
        let latency = Latency::zero(5_000, LogLag::new(0, 5));
        assert_eq!(latency.latency(), 0);
    }

    #[test]
    fn latency_measures_age_of_sampled_record() {
        let latency = Latency::new(1_000, 5_000, LogLag::new(3, 5), Some("k".to_string()));
        assert_eq!(latency.latency(), 4_000);
    }

    #[test]
    fn latency_of_keeps_worst_partition() {
        let latency = Latency::of([
            Latency::new(4_000, 5_000, LogLag::new(1, 2), Some("recent".to_string())),
            Latency::new(1_000, 5_000, LogLag::new(3, 5), Some("old".to_string())),
            Latency::zero(5_100, LogLag::default()),
        ]);

        assert_eq!(latency.latency(), 4_100);
        assert_eq!(latency.key.as_deref(), Some("old"));
        assert_eq!(latency.lag, LogLag::new(4, 7));
    }

    #[test]
    fn latency_of_empty_is_zero() {
        let latency = Latency::of(Vec::new());
        assert_eq!(latency, Latency::zero(0, LogLag::default()));
    }

    #[test]
    fn key_routing_is_deterministic_and_in_range() {
        for size in 1..16 {
            let p = partition_for_key("session-1", size);
            assert!(p < size);
            assert_eq!(p, partition_for_key("session-1", size));
        }
    }
}
