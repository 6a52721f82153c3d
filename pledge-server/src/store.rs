//! In-memory write-behind store
//!
//! Holds the latest group rows, round records and results. Status and
//! dashboard routes read from here instead of locking live groups.

use pledge_core::{GroupId, GroupSnapshot, RoundRecord, RoundResult, Status};
use pledge_engine::Store;
use rustc_hash::FxHashMap;
use std::sync::{PoisonError, RwLock};

#[derive(Default)]
pub struct MemoryStore {
    groups: RwLock<FxHashMap<GroupId, GroupSnapshot>>,
    rounds: RwLock<FxHashMap<(GroupId, u32), RoundRecord>>,
    results: RwLock<FxHashMap<GroupId, Vec<RoundResult>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(&self, id: GroupId) -> Option<GroupSnapshot> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Every group row for a run, ordered by id
    pub fn groups_in_run(&self, run: &str) -> Vec<GroupSnapshot> {
        let mut groups: Vec<_> = self
            .groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|g| g.queue.run == run)
            .cloned()
            .collect();
        groups.sort_by_key(|g| g.group_id);
        groups
    }

    pub fn count_by_status(&self, run: &str, status: Status) -> usize {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|g| g.queue.run == run && g.status == status)
            .count()
    }

    pub fn round(&self, id: GroupId, round: u32) -> Option<RoundRecord> {
        self.rounds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(id, round))
            .cloned()
    }

    pub fn results(&self, id: GroupId) -> Vec<RoundResult> {
        self.results
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }
}

impl Store for MemoryStore {
    fn upsert_group(&self, group: &GroupSnapshot) {
        self.groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(group.group_id, group.clone());
    }

    fn upsert_round(&self, record: &RoundRecord) {
        self.rounds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((record.group_id, record.round), record.clone());
    }

    fn append_result(&self, result: &RoundResult) {
        self.results
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(result.group_id)
            .or_default()
            .push(result.clone());
    }
}
