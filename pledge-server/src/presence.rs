//! Participant presence and the background sweeper
//!
//! Every inbound request refreshes the participant's last-seen time. The
//! sweeper abandons groups with a member gone longer than the reconnection
//! grace, evicts stale queue entries, and forgets departed participants who
//! are neither queued nor playing.

use crate::state::ServerState;
use pledge_core::ParticipantId;
use pledge_engine::Engine;
use rustc_hash::FxHashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Clone, Debug)]
struct Seen {
    at: Instant,
    run: Option<String>,
}

/// Last-seen times per participant
#[derive(Default)]
pub struct Presence {
    seen: RwLock<FxHashMap<ParticipantId, Seen>>,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a participant as seen now, remembering their run if given
    pub fn touch(&self, participant: &ParticipantId, run: Option<&str>) {
        let mut seen = self.seen.write().unwrap_or_else(PoisonError::into_inner);
        let entry = seen.entry(participant.clone()).or_insert_with(|| Seen {
            at: Instant::now(),
            run: None,
        });
        entry.at = Instant::now();
        if let Some(run) = run {
            entry.run = Some(run.to_string());
        }
    }

    pub fn last_seen(&self, participant: &ParticipantId) -> Option<Instant> {
        self.seen
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(participant)
            .map(|s| s.at)
    }

    /// Participants of a run seen within `window`
    pub fn connected(&self, run: &str, window: Duration) -> usize {
        let now = Instant::now();
        self.seen
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| s.run.as_deref() == Some(run))
            .filter(|s| now.saturating_duration_since(s.at) <= window)
            .count()
    }

    pub fn len(&self) -> usize {
        self.seen.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop participants away longer than `grace` unless `keep` holds for them
    ///
    /// `keep` runs without the presence lock held.
    pub fn forget_departed(
        &self,
        grace: Duration,
        now: Instant,
        keep: impl Fn(&ParticipantId) -> bool,
    ) -> usize {
        let departed: Vec<ParticipantId> = self
            .seen
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, s)| now.saturating_duration_since(s.at) > grace)
            .map(|(p, _)| p.clone())
            .collect();
        let departed: Vec<_> = departed.into_iter().filter(|p| !keep(p)).collect();

        let mut seen = self.seen.write().unwrap_or_else(PoisonError::into_inner);
        let before = seen.len();
        for participant in &departed {
            // touched again since the scan
            if seen
                .get(participant)
                .is_some_and(|s| now.saturating_duration_since(s.at) > grace)
            {
                seen.remove(participant);
            }
        }
        before - seen.len()
    }

    /// True if the participant was seen and has been away longer than `grace`
    pub fn is_gone(&self, participant: &ParticipantId, grace: Duration, now: Instant) -> bool {
        self.last_seen(participant)
            .map(|at| now.saturating_duration_since(at) > grace)
            .unwrap_or(false)
    }
}

/// What one sweep did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub abandoned: usize,
    pub expired: usize,
    pub forgotten: usize,
}

/// Abandon groups with a departed member, then evict stale queue entries
pub fn sweep(engine: &Engine, presence: &Presence) -> SweepReport {
    let grace = engine.timing().reconnect_grace();
    let now = Instant::now();
    let mut report = SweepReport::default();

    for (group, members) in engine.active_members() {
        let Some(gone) = members.iter().find(|m| presence.is_gone(m, grace, now)) else {
            continue;
        };
        let reason = format!("{} disconnected", gone);
        match engine.abandon(group, &reason) {
            Ok(()) => {
                tracing::warn!("Sweeper abandoned group {}: {}", group, reason);
                report.abandoned += 1;
            }
            // finished between listing and abandoning
            Err(err) => tracing::debug!("Group {} not abandoned: {}", group, err),
        }
    }

    report.expired = engine.expire_queues();
    report.forgotten = presence.forget_departed(grace, now, |p| {
        engine.group_of(p).is_some() || engine.queue_of(p).is_some()
    });
    report
}

/// Run [`sweep`] every `interval` until the task is aborted
pub fn spawn_sweeper(state: Arc<ServerState>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = sweep(&state.engine, &state.presence);
            if report != SweepReport::default() {
                tracing::debug!(
                    "Sweep: {} groups abandoned, {} queue entries expired, {} participants forgotten",
                    report.abandoned,
                    report.expired,
                    report.forgotten
                );
            }
        }
    })
}
