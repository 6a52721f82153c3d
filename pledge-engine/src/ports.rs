//! External collaborators: transport, store and metrics sink
//!
//! The engine only ever talks to the outside world through these traits. All
//! calls are made synchronously while the group's lock is held, so
//! implementations must not block; hand the work to a channel or an in-memory
//! buffer instead.

use crate::locks::lock;
use chrono::{DateTime, Utc};
use pledge_core::{
    GroupId, GroupSnapshot, MemberScore, ParticipantId, QueueKey, RoundRecord, RoundResult,
    VariantId,
};
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Who an outbound event is addressed to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Audience {
    Participant(ParticipantId),
    Members(Vec<ParticipantId>),
    /// Everyone waiting in a queue
    Queue(QueueKey),
    /// The instructor dashboard
    Dashboard,
}

/// Events the engine emits
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Outbound {
    QueueUpdate {
        queue: QueueKey,
        size: usize,
    },
    GroupFormed {
        group_id: GroupId,
        members: Vec<ParticipantId>,
        variant_id: VariantId,
    },
    RoundStarted {
        group_id: GroupId,
        round: u32,
        deadline_at: DateTime<Utc>,
        multiplier: i64,
    },
    MoveAcknowledged {
        group_id: GroupId,
        round: u32,
    },
    RoundResolved {
        group_id: GroupId,
        result: RoundResult,
    },
    GroupComplete {
        group_id: GroupId,
        final_scores: Vec<MemberScore>,
    },
    GroupAbandoned {
        group_id: GroupId,
        reason: String,
    },
}

impl Outbound {
    /// Event name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Outbound::QueueUpdate { .. } => "queueUpdate",
            Outbound::GroupFormed { .. } => "groupFormed",
            Outbound::RoundStarted { .. } => "roundStarted",
            Outbound::MoveAcknowledged { .. } => "moveAcknowledged",
            Outbound::RoundResolved { .. } => "roundResolved",
            Outbound::GroupComplete { .. } => "groupComplete",
            Outbound::GroupAbandoned { .. } => "groupAbandoned",
        }
    }
}

/// Delivers events to participants and the dashboard
pub trait Transport: Send + Sync {
    fn publish(&self, audience: Audience, event: Outbound);
}

/// Write-behind record of groups, rounds and results
///
/// Never read on the resolution path; the engine's in-memory state is
/// authoritative.
pub trait Store: Send + Sync {
    fn upsert_group(&self, group: &GroupSnapshot);
    fn upsert_round(&self, record: &RoundRecord);
    fn append_result(&self, result: &RoundResult);
}

/// Consumes resolved rounds and finished groups, each exactly once
pub trait MetricsSink: Send + Sync {
    fn round_resolved(&self, queue: &QueueKey, result: &RoundResult);
    fn group_complete(&self, group: &GroupSnapshot);
    fn group_abandoned(&self, _group: &GroupSnapshot) {}
}

/// The three collaborators, bundled
#[derive(Clone)]
pub struct Ports {
    pub transport: Arc<dyn Transport>,
    pub store: Arc<dyn Store>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl Ports {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn Store>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            transport,
            store,
            metrics,
        }
    }

    /// Every port backed by the same recorder
    pub fn recording(recorder: Arc<Recorder>) -> Self {
        Self {
            transport: recorder.clone(),
            store: recorder.clone(),
            metrics: recorder,
        }
    }

    /// Ports that drop everything
    pub fn discard() -> Self {
        let sink = Arc::new(Discard);
        Self {
            transport: sink.clone(),
            store: sink.clone(),
            metrics: sink,
        }
    }
}

/// No-op collaborator
pub struct Discard;

impl Transport for Discard {
    fn publish(&self, _audience: Audience, _event: Outbound) {}
}

impl Store for Discard {
    fn upsert_group(&self, _group: &GroupSnapshot) {}
    fn upsert_round(&self, _record: &RoundRecord) {}
    fn append_result(&self, _result: &RoundResult) {}
}

impl MetricsSink for Discard {
    fn round_resolved(&self, _queue: &QueueKey, _result: &RoundResult) {}
    fn group_complete(&self, _group: &GroupSnapshot) {}
}

/// Keeps everything it is sent, in order
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<(Audience, Outbound)>>,
    stored_results: Mutex<Vec<RoundResult>>,
    metric_results: Mutex<Vec<RoundResult>>,
    completed: Mutex<Vec<GroupSnapshot>>,
    abandoned: Mutex<Vec<GroupSnapshot>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<(Audience, Outbound)> {
        lock(&self.events).clone()
    }

    /// Events of one kind sent to one audience
    pub fn events_for(&self, audience: &Audience, name: &str) -> Vec<Outbound> {
        lock(&self.events)
            .iter()
            .filter(|(a, e)| a == audience && e.name() == name)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Results the metrics sink was given
    pub fn results(&self) -> Vec<RoundResult> {
        lock(&self.metric_results).clone()
    }

    /// Results the store was given
    pub fn stored_results(&self) -> Vec<RoundResult> {
        lock(&self.stored_results).clone()
    }

    pub fn completed(&self) -> Vec<GroupSnapshot> {
        lock(&self.completed).clone()
    }

    pub fn abandoned(&self) -> Vec<GroupSnapshot> {
        lock(&self.abandoned).clone()
    }
}

impl Transport for Recorder {
    fn publish(&self, audience: Audience, event: Outbound) {
        lock(&self.events).push((audience, event));
    }
}

impl Store for Recorder {
    fn upsert_group(&self, _group: &GroupSnapshot) {}
    fn upsert_round(&self, _record: &RoundRecord) {}
    fn append_result(&self, result: &RoundResult) {
        lock(&self.stored_results).push(result.clone());
    }
}

impl MetricsSink for Recorder {
    fn round_resolved(&self, _queue: &QueueKey, result: &RoundResult) {
        lock(&self.metric_results).push(result.clone());
    }

    fn group_complete(&self, group: &GroupSnapshot) {
        lock(&self.completed).push(group.clone());
    }

    fn group_abandoned(&self, group: &GroupSnapshot) {
        lock(&self.abandoned).push(group.clone());
    }
}
