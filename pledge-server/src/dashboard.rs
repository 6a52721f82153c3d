//! Instructor dashboard metrics
//!
//! Aggregates resolved rounds and finished groups per run. Every figure only
//! ever counts symbols, never who chose them.

use pledge_core::{GroupId, GroupSnapshot, QueueKey, RoundResult, VariantRegistry};
use pledge_engine::MetricsSink;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Final score of a completed group against its benchmark
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupTotal {
    pub group_id: GroupId,
    pub total: i64,
    pub benchmark: i64,
}

/// Everything the dashboard shows for one run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetrics {
    pub groups_completed: usize,
    pub groups_abandoned: usize,
    pub rounds_resolved: usize,
    pub auto_moves: usize,
    /// Round -> symbol -> how many times it was chosen
    pub choice_counts: BTreeMap<u32, BTreeMap<String, usize>>,
    pub pattern_labels: BTreeMap<String, usize>,
    pub final_totals: Vec<GroupTotal>,
}

impl RunMetrics {
    /// Mean final group total, if any group completed
    pub fn average_total(&self) -> Option<f64> {
        if self.final_totals.is_empty() {
            return None;
        }
        let sum: i64 = self.final_totals.iter().map(|t| t.total).sum();
        Some(sum as f64 / self.final_totals.len() as f64)
    }
}

/// Metrics sink keyed by run
pub struct Dashboard {
    registry: Arc<VariantRegistry>,
    runs: Mutex<FxHashMap<String, RunMetrics>>,
}

impl Dashboard {
    pub fn new(registry: Arc<VariantRegistry>) -> Self {
        Self {
            registry,
            runs: Mutex::new(FxHashMap::default()),
        }
    }

    fn with_run<R>(&self, run: &str, f: impl FnOnce(&mut RunMetrics) -> R) -> R {
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        f(runs.entry(run.to_string()).or_default())
    }

    /// Copy of a run's metrics (empty if nothing happened yet)
    pub fn metrics(&self, run: &str) -> RunMetrics {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(run)
            .cloned()
            .unwrap_or_default()
    }
}

impl MetricsSink for Dashboard {
    fn round_resolved(&self, queue: &QueueKey, result: &RoundResult) {
        self.with_run(&queue.run, |m| {
            m.rounds_resolved += 1;
            m.auto_moves += result.auto_moves();
            let counts = m.choice_counts.entry(result.round).or_default();
            for c in &result.choice_counts {
                *counts.entry(c.symbol.clone()).or_default() += c.count;
            }
            *m.pattern_labels
                .entry(result.pattern_label.clone())
                .or_default() += 1;
        });
    }

    fn group_complete(&self, group: &GroupSnapshot) {
        let benchmark = self
            .registry
            .get(&group.variant)
            .map(|v| v.group_benchmark())
            .unwrap_or(0);
        let total = group.scores.iter().map(|s| s.total).sum();
        self.with_run(&group.queue.run, |m| {
            m.groups_completed += 1;
            m.final_totals.push(GroupTotal {
                group_id: group.group_id,
                total,
                benchmark,
            });
        });
    }

    fn group_abandoned(&self, group: &GroupSnapshot) {
        self.with_run(&group.queue.run, |m| m.groups_abandoned += 1);
    }
}
