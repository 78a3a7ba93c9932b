//! Subscription groups of the in-memory backend.
//!
//! Every join or leave bumps the group epoch and recomputes a uniform
//! assignment: partitions of each log are dealt round-robin to the members
//! subscribed to it, ordered by member id. Members compare the epoch they
//! last applied with the group's to know when to reconcile.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::LogPartition;

#[derive(Default)]
pub(crate) struct Coordinator {
    groups: Mutex<HashMap<String, GroupState>>,
    next_member: AtomicU64,
}

#[derive(Default)]
struct GroupState {
    epoch: u64,
    members: BTreeMap<u64, Member>,
}

struct Member {
    /// Subscribed logs with their partition count.
    logs: Vec<(String, u32)>,
    assignment: Vec<LogPartition>,
}

impl Coordinator {
    /// Add a member to a group, returns its id.
    pub(crate) fn join(&self, group: &str, logs: Vec<(String, u32)>) -> u64 {
        let member = self.next_member.fetch_add(1, Ordering::SeqCst);
        let mut groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
        let state = groups.entry(group.to_string()).or_default();
        state.members.insert(
            member,
            Member {
                logs,
                assignment: Vec::new(),
            },
        );
        state.rebalance();
        member
    }

    /// Remove a member, its partitions go to the remaining members.
    pub(crate) fn leave(&self, group: &str, member: u64) {
        let mut groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
        let Some(state) = groups.get_mut(group) else {
            return;
        };
        if state.members.remove(&member).is_none() {
            return;
        }
        if state.members.is_empty() {
            groups.remove(group);
        } else {
            state.rebalance();
        }
    }

    /// Current epoch of the group and the member's partitions.
    pub(crate) fn assignment(&self, group: &str, member: u64) -> Option<(u64, Vec<LogPartition>)> {
        let groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
        let state = groups.get(group)?;
        let assigned = state.members.get(&member)?;
        Some((state.epoch, assigned.assignment.clone()))
    }
}

impl GroupState {
    fn rebalance(&mut self) {
        self.epoch += 1;

        let mut subscribers: BTreeMap<String, (u32, Vec<u64>)> = BTreeMap::new();
        for (id, member) in &self.members {
            for (name, size) in &member.logs {
                subscribers
                    .entry(name.clone())
                    .or_insert_with(|| (*size, Vec::new()))
                    .1
                    .push(*id);
            }
        }

        for member in self.members.values_mut() {
            member.assignment.clear();
        }
        for (name, (size, ids)) in subscribers {
            for partition in 0..size {
                let owner = ids[partition as usize % ids.len()];
                if let Some(member) = self.members.get_mut(&owner) {
                    member.assignment.push(LogPartition::new(name.clone(), partition));
                }
            }
        }
    }
}
