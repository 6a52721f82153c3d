//! Engine - matchmaking, round resolution and group lifecycle
//!
//! Level 1 - Orchestration
//!
//! Every group lives behind its own mutex. A round is settled by whichever
//! path takes that mutex and finds the round complete first: the last member's
//! move, or the deadline firing and filling in the default choice. The session
//! makes the second attempt fail with `AlreadyResolved`, which is dropped
//! here.
//!
//! Lock order: session, then scheduler slots or the participant index. The
//! group table is never held while a session lock is taken.

use crate::config::{EngineConfig, Timing};
use crate::locks::{lock, read, write};
use crate::matchmaker::{Formation, Matchmaker};
use crate::ports::{Audience, Outbound, Ports};
use crate::scheduler::{RoundScheduler, TimeoutHandler};
use chrono::Utc;
use pledge_core::{
    EngineError, GroupId, GroupSnapshot, Next, ParticipantId, QueueKey, Resolution, RoundResult,
    Session, Status, VariantRegistry,
};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

// ============================================================================
// RESULT TYPES
// ============================================================================

/// What a join did
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinOutcome {
    /// Participants still waiting after any groups were formed
    pub queue_size: usize,
    /// Groups formed as a result of this join
    pub formed: Vec<GroupId>,
}

/// What a move submission did
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub round: u32,
    /// Set when this move completed the round
    pub resolved: Option<RoundResult>,
}

/// Number of groups in each lifecycle state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GroupCounts {
    pub active: usize,
    pub complete: usize,
    pub abandoned: usize,
}

// ============================================================================
// ENGINE
// ============================================================================

type GroupHandle = Arc<Mutex<Session>>;

/// Routes deadline fires back into the engine without keeping it alive
struct Timeouts(Weak<Engine>);

impl TimeoutHandler for Timeouts {
    fn on_timeout(&self, group: GroupId, round: u32) {
        if let Some(engine) = self.0.upgrade() {
            engine.handle_timeout(group, round);
        }
    }
}

/// Owns every queue and group of a process
pub struct Engine {
    registry: Arc<VariantRegistry>,
    timing: Timing,
    matchmaker: Matchmaker,
    scheduler: RoundScheduler,
    groups: RwLock<FxHashMap<GroupId, GroupHandle>>,
    /// Members of active groups
    playing: RwLock<FxHashMap<ParticipantId, GroupId>>,
    next_group: AtomicU64,
    ports: Ports,
}

impl Engine {
    pub fn new(
        registry: Arc<VariantRegistry>,
        timing: Timing,
        seed: Option<u64>,
        ports: Ports,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            matchmaker: Matchmaker::new(registry.clone(), seed),
            scheduler: RoundScheduler::new(Arc::new(Timeouts(weak.clone()))),
            registry,
            timing,
            groups: RwLock::new(FxHashMap::default()),
            playing: RwLock::new(FxHashMap::default()),
            next_group: AtomicU64::new(1),
            ports,
        })
    }

    /// Build from configuration, loading the variant file if one is set
    pub fn from_config(config: &EngineConfig, ports: Ports) -> anyhow::Result<Arc<Self>> {
        let registry = Arc::new(config.registry()?);
        tracing::info!("Engine ready with {} variants", registry.len());
        Ok(Self::new(registry, config.timing.clone(), config.seed, ports))
    }

    // ========================================================================
    // QUEUES
    // ========================================================================

    /// Register a queue for a known variant
    pub fn open_queue(&self, key: &QueueKey) -> Result<(), EngineError> {
        self.matchmaker.open(key)?;
        tracing::debug!("Queue {} open", key);
        Ok(())
    }

    /// Enqueue a participant and form as many groups as the queue allows
    pub fn join(&self, key: &QueueKey, participant: ParticipantId) -> Result<JoinOutcome, EngineError> {
        let size = self.matchmaker.join(key, participant.clone())?;
        tracing::debug!("{} joined {} ({} waiting)", participant, key, size);
        self.publish_queue(key, size);

        let mut formed = Vec::new();
        while let Some(formation) = self.matchmaker.try_form(key)? {
            formed.push(self.start_group(formation)?);
        }

        let queue_size = self.matchmaker.size(key);
        if !formed.is_empty() {
            self.publish_queue(key, queue_size);
        }
        Ok(JoinOutcome { queue_size, formed })
    }

    /// Remove a participant from their queue, if any
    pub fn leave_queue(&self, participant: &ParticipantId) -> Option<QueueKey> {
        let key = self.matchmaker.leave(participant)?;
        tracing::debug!("{} left {}", participant, key);
        self.publish_queue(&key, self.matchmaker.size(&key));
        Some(key)
    }

    /// Evict participants that waited longer than the staleness limit
    pub fn expire_queues(&self) -> usize {
        let removed = self.matchmaker.expire(self.timing.queue_staleness());
        if removed.is_empty() {
            return 0;
        }

        tracing::info!("Evicted {} stale queue entries", removed.len());
        let touched: FxHashSet<&QueueKey> = removed.iter().map(|e| &e.queue).collect();
        for key in touched {
            self.publish_queue(key, self.matchmaker.size(key));
        }
        removed.len()
    }

    fn publish_queue(&self, key: &QueueKey, size: usize) {
        let event = Outbound::QueueUpdate {
            queue: key.clone(),
            size,
        };
        self.ports
            .transport
            .publish(Audience::Queue(key.clone()), event.clone());
        self.ports.transport.publish(Audience::Dashboard, event);
    }

    // ========================================================================
    // GROUP LIFECYCLE
    // ========================================================================

    fn start_group(&self, formation: Formation) -> Result<GroupId, EngineError> {
        let id = GroupId(self.next_group.fetch_add(1, Ordering::Relaxed));
        let session = match Session::new(
            id,
            formation.queue.clone(),
            formation.variant.clone(),
            formation.members.clone(),
        ) {
            Ok(session) => session,
            Err(err) => {
                self.matchmaker.release(&formation.members);
                return Err(err);
            }
        };

        let handle = Arc::new(Mutex::new(session));
        let session = lock(&handle);
        {
            let mut playing = write(&self.playing);
            for member in session.members() {
                playing.insert(member.clone(), id);
            }
        }
        write(&self.groups).insert(id, handle.clone());

        tracing::info!(
            "Group {} formed in {} ({} members)",
            id,
            formation.queue,
            session.members().len()
        );

        self.ports.store.upsert_group(&session.snapshot());
        let event = Outbound::GroupFormed {
            group_id: id,
            members: session.members().to_vec(),
            variant_id: formation.variant.id().clone(),
        };
        self.ports
            .transport
            .publish(Audience::Members(session.members().to_vec()), event.clone());
        self.ports.transport.publish(Audience::Dashboard, event);

        self.open_round(&session, Duration::ZERO);
        Ok(id)
    }

    /// Arm the current round's deadline and announce it
    fn open_round(&self, session: &Session, delay: Duration) {
        let round = session.current_round();
        let window = delay + self.timing.round_deadline();
        self.scheduler.arm(session.id(), round, window);

        let deadline_at = Utc::now()
            + chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
        let event = Outbound::RoundStarted {
            group_id: session.id(),
            round,
            deadline_at,
            multiplier: session.variant().multiplier(round),
        };
        self.ports
            .transport
            .publish(Audience::Members(session.members().to_vec()), event.clone());
        self.ports.transport.publish(Audience::Dashboard, event);
    }

    /// Record a member's move, settling the round if it was the last one
    pub fn submit_move(
        &self,
        group: GroupId,
        participant: &ParticipantId,
        round: u32,
        symbol: &str,
    ) -> Result<SubmitOutcome, EngineError> {
        let handle = self.group(group)?;
        let mut session = lock(&handle);

        let choice = session.submit_symbol(participant, round, symbol, false)?;
        tracing::debug!(
            "Group {} round {}: {} chose {}",
            group,
            round,
            participant,
            session.variant().symbol(choice)
        );

        self.ports.transport.publish(
            Audience::Participant(participant.clone()),
            Outbound::MoveAcknowledged {
                group_id: group,
                round,
            },
        );
        if let Some(record) = session.round_record(round) {
            self.ports.store.upsert_round(record);
        }

        let resolved = if session.is_round_complete() {
            self.settle(&mut session, round)
        } else {
            None
        };
        Ok(SubmitOutcome { round, resolved })
    }

    /// Settle a complete round directly
    ///
    /// Fails with `RoundIncomplete` while moves are missing and with
    /// `AlreadyResolved` for a settled round.
    pub fn resolve_round(&self, group: GroupId, round: u32) -> Result<RoundResult, EngineError> {
        let handle = self.group(group)?;
        let mut session = lock(&handle);
        self.resolve_locked(&mut session, round)
    }

    /// Deadline path: fill in defaults for silent members, then settle
    pub fn handle_timeout(&self, group: GroupId, round: u32) {
        let Some(handle) = self.lookup(group) else {
            return;
        };
        let mut session = lock(&handle);
        if !session.is_active() || session.current_round() != round {
            tracing::debug!("Group {} deadline for round {} is stale", group, round);
            return;
        }

        match session.auto_fill(round) {
            Ok(filled) if !filled.is_empty() => {
                tracing::debug!(
                    "Group {} round {}: {} auto moves",
                    group,
                    round,
                    filled.len()
                );
                if let Some(record) = session.round_record(round) {
                    self.ports.store.upsert_round(record);
                }
            }
            Ok(_) => {}
            Err(err) => {
                tracing::debug!("Group {} auto fill skipped: {}", group, err);
                return;
            }
        }

        self.settle(&mut session, round);
    }

    /// Resolve, treating a lost race as a no-op
    fn settle(&self, session: &mut Session, round: u32) -> Option<RoundResult> {
        match self.resolve_locked(session, round) {
            Ok(result) => Some(result),
            Err(err) if err.is_protocol() => {
                tracing::debug!("Group {} round {} already settled: {}", session.id(), round, err);
                None
            }
            Err(err) => {
                tracing::warn!("Group {} round {} not settled: {}", session.id(), round, err);
                None
            }
        }
    }

    fn resolve_locked(&self, session: &mut Session, round: u32) -> Result<RoundResult, EngineError> {
        let resolution = session.resolve_round(round)?;
        // Before `after_resolution`, which may arm the next round
        self.scheduler.disarm(session.id());
        self.after_resolution(session, &resolution);
        Ok(resolution.result)
    }

    fn after_resolution(&self, session: &Session, resolution: &Resolution) {
        let result = &resolution.result;
        let group = session.id();

        if let Some(record) = session.round_record(result.round) {
            self.ports.store.upsert_round(record);
        }
        self.ports.store.append_result(result);
        self.ports.metrics.round_resolved(session.queue(), result);

        for member in session.members() {
            self.ports.transport.publish(
                Audience::Participant(member.clone()),
                Outbound::RoundResolved {
                    group_id: group,
                    result: result.redacted_for(member),
                },
            );
        }
        self.ports.transport.publish(
            Audience::Dashboard,
            Outbound::RoundResolved {
                group_id: group,
                result: result.anonymized(),
            },
        );

        tracing::debug!(
            "Group {} round {} resolved: {} (x{})",
            group,
            result.round,
            result.pattern_label,
            result.multiplier
        );

        match resolution.next {
            Next::Round(_) => self.open_round(session, self.timing.result_display()),
            Next::Complete => self.finish(session),
        }
        self.ports.store.upsert_group(&session.snapshot());
    }

    fn finish(&self, session: &Session) {
        let group = session.id();
        self.release(session.members(), group);

        let event = Outbound::GroupComplete {
            group_id: group,
            final_scores: session.scores(),
        };
        self.ports
            .transport
            .publish(Audience::Members(session.members().to_vec()), event.clone());
        self.ports.transport.publish(Audience::Dashboard, event);
        self.ports.metrics.group_complete(&session.snapshot());

        tracing::info!(
            "Group {} complete: total {} (benchmark {})",
            group,
            session.group_total(),
            session.variant().group_benchmark()
        );
    }

    /// End an active group early
    pub fn abandon(&self, group: GroupId, reason: &str) -> Result<(), EngineError> {
        let handle = self.group(group)?;
        let mut session = lock(&handle);
        session.abandon(reason)?;
        self.scheduler.disarm(group);
        self.release(session.members(), group);

        let snapshot = session.snapshot();
        let event = Outbound::GroupAbandoned {
            group_id: group,
            reason: reason.to_string(),
        };
        self.ports
            .transport
            .publish(Audience::Members(session.members().to_vec()), event.clone());
        self.ports.transport.publish(Audience::Dashboard, event);
        self.ports.store.upsert_group(&snapshot);
        self.ports.metrics.group_abandoned(&snapshot);

        tracing::info!("Group {} abandoned: {}", group, reason);
        Ok(())
    }

    fn release(&self, members: &[ParticipantId], group: GroupId) {
        {
            let mut playing = write(&self.playing);
            for member in members {
                if playing.get(member) == Some(&group) {
                    playing.remove(member);
                }
            }
        }
        self.matchmaker.release(members);
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    fn lookup(&self, group: GroupId) -> Option<GroupHandle> {
        read(&self.groups).get(&group).cloned()
    }

    fn group(&self, group: GroupId) -> Result<GroupHandle, EngineError> {
        self.lookup(group).ok_or(EngineError::UnknownGroup(group))
    }

    fn handles(&self) -> Vec<GroupHandle> {
        read(&self.groups).values().cloned().collect()
    }

    pub fn snapshot(&self, group: GroupId) -> Result<GroupSnapshot, EngineError> {
        let handle = self.group(group)?;
        let session = lock(&handle);
        Ok(session.snapshot())
    }

    /// Every result the group has produced, in round order
    pub fn results(&self, group: GroupId) -> Result<Vec<RoundResult>, EngineError> {
        let handle = self.group(group)?;
        let session = lock(&handle);
        Ok(session.results().to_vec())
    }

    /// True iff the group's current round holds every member's move
    pub fn is_round_complete(&self, group: GroupId) -> Result<bool, EngineError> {
        let handle = self.group(group)?;
        let session = lock(&handle);
        Ok(session.is_active() && session.is_round_complete())
    }

    /// Active group a participant is playing in
    pub fn group_of(&self, participant: &ParticipantId) -> Option<GroupId> {
        read(&self.playing).get(participant).copied()
    }

    pub fn counts(&self) -> GroupCounts {
        let mut counts = GroupCounts::default();
        for handle in self.handles() {
            match lock(&handle).status() {
                Status::Active => counts.active += 1,
                Status::Complete => counts.complete += 1,
                Status::Abandoned => counts.abandoned += 1,
            }
        }
        counts
    }

    /// Members of every active group
    pub fn active_members(&self) -> Vec<(GroupId, Vec<ParticipantId>)> {
        let mut active: Vec<_> = self
            .handles()
            .into_iter()
            .filter_map(|handle| {
                let session = lock(&handle);
                session
                    .is_active()
                    .then(|| (session.id(), session.members().to_vec()))
            })
            .collect();
        active.sort_by_key(|(id, _)| *id);
        active
    }

    pub fn queue_size(&self, key: &QueueKey) -> usize {
        self.matchmaker.size(key)
    }

    pub fn queue_sizes(&self) -> Vec<(QueueKey, usize)> {
        self.matchmaker.sizes()
    }

    pub fn queue_of(&self, participant: &ParticipantId) -> Option<QueueKey> {
        self.matchmaker.queue_of(participant)
    }

    pub fn registry(&self) -> &Arc<VariantRegistry> {
        &self.registry
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn scheduler(&self) -> &RoundScheduler {
        &self.scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::Recorder;

    fn engine() -> (Arc<Engine>, Arc<Recorder>) {
        let recorder = Recorder::new();
        let engine = Engine::new(
            Arc::new(VariantRegistry::builtin()),
            Timing::default(),
            Some(3),
            Ports::recording(recorder.clone()),
        );
        (engine, recorder)
    }

    fn key() -> QueueKey {
        QueueKey::new("stag-hunt", "UNIT")
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_forms_group_when_full() {
        let (engine, recorder) = engine();
        engine.open_queue(&key()).unwrap();

        let first = engine.join(&key(), "a".into()).unwrap();
        assert_eq!(first.queue_size, 1);
        assert!(first.formed.is_empty());
        engine.join(&key(), "b".into()).unwrap();
        let third = engine.join(&key(), "c".into()).unwrap();

        assert_eq!(third.formed.len(), 1);
        assert_eq!(third.queue_size, 0);
        let group = third.formed[0];
        assert_eq!(engine.group_of(&"a".into()), Some(group));
        assert!(engine.scheduler().is_armed(group));
        assert_eq!(
            recorder
                .events_for(&Audience::Dashboard, "roundStarted")
                .len(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_member_cannot_requeue_while_playing() {
        let (engine, _) = engine();
        engine.open_queue(&key()).unwrap();
        for p in ["a", "b", "c"] {
            engine.join(&key(), p.into()).unwrap();
        }
        assert!(matches!(
            engine.join(&key(), "a".into()),
            Err(EngineError::AlreadyInGroup(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_group() {
        let (engine, _) = engine();
        assert!(matches!(
            engine.submit_move(GroupId(99), &"a".into(), 1, "Stag"),
            Err(EngineError::UnknownGroup(GroupId(99)))
        ));
        assert!(engine.snapshot(GroupId(99)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_counts_track_status() {
        let (engine, _) = engine();
        engine.open_queue(&key()).unwrap();
        let mut groups = Vec::new();
        for p in ["a", "b", "c", "d", "e", "f"] {
            groups.extend(engine.join(&key(), p.into()).unwrap().formed);
        }
        assert_eq!(groups.len(), 2);
        engine.abandon(groups[0], "test").unwrap();

        let counts = engine.counts();
        assert_eq!(counts.active, 1);
        assert_eq!(counts.abandoned, 1);
        assert_eq!(engine.active_members().len(), 1);
    }
}
