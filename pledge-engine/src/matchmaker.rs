//! Matchmaker - waiting queues and random group formation
//!
//! Level 2 - Phase-level implementation
//!
//! One lock covers every queue and the participant index, so `join`,
//! `leave`, `try_form` and `expire` are serialized for each queue key and a
//! participant can never sit in two queues (or two groups) at once. Members
//! drawn into a group stay engaged until the engine releases them.

use crate::locks::lock;
use pledge_core::{EngineError, ParticipantId, QueueKey, Variant, VariantRegistry};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// A participant waiting in a queue
#[derive(Clone, Debug)]
pub struct QueueEntry {
    pub participant: ParticipantId,
    pub queue: QueueKey,
    pub joined_at: Instant,
}

/// Members drawn from a queue for a new group
#[derive(Clone, Debug)]
pub struct Formation {
    pub queue: QueueKey,
    pub variant: Arc<Variant>,
    pub members: Vec<ParticipantId>,
}

struct WaitQueue {
    variant: Arc<Variant>,
    entries: VecDeque<QueueEntry>,
}

struct Lobby {
    queues: FxHashMap<QueueKey, WaitQueue>,
    /// Which queue each waiting participant is in
    waiting: FxHashMap<ParticipantId, QueueKey>,
    /// Participants drawn into a group that has not ended yet
    engaged: FxHashSet<ParticipantId>,
    rng: ChaCha8Rng,
}

/// Holds one ordered queue per (variant, run)
pub struct Matchmaker {
    registry: Arc<VariantRegistry>,
    lobby: Mutex<Lobby>,
}

impl Matchmaker {
    /// Create a matchmaker; `seed` fixes the shuffle for reproducible runs
    pub fn new(registry: Arc<VariantRegistry>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            registry,
            lobby: Mutex::new(Lobby {
                queues: FxHashMap::default(),
                waiting: FxHashMap::default(),
                engaged: FxHashSet::default(),
                rng,
            }),
        }
    }

    /// Register a queue. Opening an open queue does nothing.
    pub fn open(&self, key: &QueueKey) -> Result<(), EngineError> {
        let variant = self
            .registry
            .get(&key.variant)
            .ok_or_else(|| EngineError::UnknownVariant(key.variant.to_string()))?;

        lock(&self.lobby)
            .queues
            .entry(key.clone())
            .or_insert_with(|| WaitQueue {
                variant,
                entries: VecDeque::new(),
            });
        Ok(())
    }

    pub fn is_open(&self, key: &QueueKey) -> bool {
        lock(&self.lobby).queues.contains_key(key)
    }

    /// Enqueue a participant, returning the new queue size
    ///
    /// Joining the same queue twice keeps the original entry.
    pub fn join(&self, key: &QueueKey, participant: ParticipantId) -> Result<usize, EngineError> {
        let mut lobby = lock(&self.lobby);
        let lobby = &mut *lobby;

        let Some(queue) = lobby.queues.get_mut(key) else {
            return Err(EngineError::UnknownQueue(key.clone()));
        };
        if lobby.engaged.contains(&participant) {
            return Err(EngineError::AlreadyInGroup(participant));
        }

        match lobby.waiting.get(&participant) {
            Some(current) if current == key => return Ok(queue.entries.len()),
            Some(current) => {
                return Err(EngineError::AlreadyQueued {
                    participant,
                    queue: current.clone(),
                })
            }
            None => {}
        }

        queue.entries.push_back(QueueEntry {
            participant: participant.clone(),
            queue: key.clone(),
            joined_at: Instant::now(),
        });
        lobby.waiting.insert(participant, key.clone());
        Ok(queue.entries.len())
    }

    /// Remove a participant from whichever queue holds them
    pub fn leave(&self, participant: &ParticipantId) -> Option<QueueKey> {
        let mut lobby = lock(&self.lobby);
        let key = lobby.waiting.remove(participant)?;
        if let Some(queue) = lobby.queues.get_mut(&key) {
            queue.entries.retain(|e| &e.participant != participant);
        }
        Some(key)
    }

    /// Current waiting count (0 for unknown queues)
    pub fn size(&self, key: &QueueKey) -> usize {
        lock(&self.lobby)
            .queues
            .get(key)
            .map(|q| q.entries.len())
            .unwrap_or(0)
    }

    /// Queue a participant is waiting in
    pub fn queue_of(&self, participant: &ParticipantId) -> Option<QueueKey> {
        lock(&self.lobby).waiting.get(participant).cloned()
    }

    /// Sizes of every open queue
    pub fn sizes(&self) -> Vec<(QueueKey, usize)> {
        let lobby = lock(&self.lobby);
        let mut sizes: Vec<_> = lobby
            .queues
            .iter()
            .map(|(k, q)| (k.clone(), q.entries.len()))
            .collect();
        sizes.sort();
        sizes
    }

    /// Draw a group from the queue if enough participants are waiting
    ///
    /// Takes the `min(2 * members, waiting)` longest-waiting entries, shuffles
    /// them, and keeps the first `members`. The rest go back to the front of
    /// the queue. With too few waiting the queue is left untouched.
    pub fn try_form(&self, key: &QueueKey) -> Result<Option<Formation>, EngineError> {
        let mut lobby = lock(&self.lobby);
        let lobby = &mut *lobby;

        let Some(queue) = lobby.queues.get_mut(key) else {
            return Err(EngineError::UnknownQueue(key.clone()));
        };

        let needed = queue.variant.member_count();
        if needed == 0 || queue.entries.len() < needed {
            return Ok(None);
        }

        let take = (2 * needed).min(queue.entries.len());
        let mut pool: Vec<QueueEntry> = queue.entries.drain(..take).collect();
        pool.shuffle(&mut lobby.rng);

        let rest = pool.split_off(needed);
        for entry in rest.into_iter().rev() {
            queue.entries.push_front(entry);
        }

        let members: Vec<ParticipantId> = pool.into_iter().map(|e| e.participant).collect();
        for member in &members {
            lobby.waiting.remove(member);
            lobby.engaged.insert(member.clone());
        }

        Ok(Some(Formation {
            queue: key.clone(),
            variant: queue.variant.clone(),
            members,
        }))
    }

    /// Let members of an ended group queue again
    pub fn release(&self, members: &[ParticipantId]) {
        let mut lobby = lock(&self.lobby);
        for member in members {
            lobby.engaged.remove(member);
        }
    }

    pub fn is_engaged(&self, participant: &ParticipantId) -> bool {
        lock(&self.lobby).engaged.contains(participant)
    }

    /// Evict entries that have waited longer than `max_wait`
    pub fn expire(&self, max_wait: Duration) -> Vec<QueueEntry> {
        self.expire_at(Instant::now(), max_wait)
    }

    /// [`Matchmaker::expire`] against an explicit clock reading
    pub fn expire_at(&self, now: Instant, max_wait: Duration) -> Vec<QueueEntry> {
        let mut lobby = lock(&self.lobby);
        let lobby = &mut *lobby;

        let mut removed = Vec::new();
        for queue in lobby.queues.values_mut() {
            let (stale, fresh): (VecDeque<_>, VecDeque<_>) = queue
                .entries
                .drain(..)
                .partition(|e| now.saturating_duration_since(e.joined_at) > max_wait);
            queue.entries = fresh;
            removed.extend(stale);
        }
        for entry in &removed {
            lobby.waiting.remove(&entry.participant);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn matchmaker() -> Matchmaker {
        Matchmaker::new(Arc::new(VariantRegistry::builtin()), Some(42))
    }

    fn key() -> QueueKey {
        QueueKey::new("win-as-much", "TEST101")
    }

    fn pid(i: usize) -> ParticipantId {
        ParticipantId::from(format!("p{}", i))
    }

    #[test]
    fn test_join_requires_open_queue() {
        let mm = matchmaker();
        assert!(matches!(
            mm.join(&key(), pid(0)),
            Err(EngineError::UnknownQueue(_))
        ));
        mm.open(&key()).unwrap();
        assert_eq!(mm.join(&key(), pid(0)).unwrap(), 1);
    }

    #[test]
    fn test_open_unknown_variant() {
        let mm = matchmaker();
        assert!(matches!(
            mm.open(&QueueKey::new("chess", "X")),
            Err(EngineError::UnknownVariant(_))
        ));
    }

    #[test]
    fn test_join_twice_is_noop() {
        let mm = matchmaker();
        mm.open(&key()).unwrap();
        mm.join(&key(), pid(0)).unwrap();
        assert_eq!(mm.join(&key(), pid(0)).unwrap(), 1);
        assert_eq!(mm.size(&key()), 1);
    }

    #[test]
    fn test_cannot_wait_in_two_queues() {
        let mm = matchmaker();
        let other = QueueKey::new("stag-hunt", "TEST101");
        mm.open(&key()).unwrap();
        mm.open(&other).unwrap();
        mm.join(&key(), pid(0)).unwrap();
        assert!(matches!(
            mm.join(&other, pid(0)),
            Err(EngineError::AlreadyQueued { .. })
        ));
    }

    #[test]
    fn test_leave() {
        let mm = matchmaker();
        mm.open(&key()).unwrap();
        mm.join(&key(), pid(0)).unwrap();
        assert_eq!(mm.leave(&pid(0)), Some(key()));
        assert_eq!(mm.leave(&pid(0)), None);
        assert_eq!(mm.size(&key()), 0);
    }

    #[test]
    fn test_try_form_insufficient_supply() {
        let mm = matchmaker();
        mm.open(&key()).unwrap();
        for i in 0..3 {
            mm.join(&key(), pid(i)).unwrap();
        }
        assert!(mm.try_form(&key()).unwrap().is_none());
        assert!(mm.try_form(&key()).unwrap().is_none());
        assert_eq!(mm.size(&key()), 3);
    }

    #[test]
    fn test_try_form_exhausts_without_overlap() {
        let mm = matchmaker();
        mm.open(&key()).unwrap();
        let n = 23;
        for i in 0..n {
            mm.join(&key(), pid(i)).unwrap();
        }

        let mut seen = HashSet::new();
        let mut groups = 0;
        while let Some(formation) = mm.try_form(&key()).unwrap() {
            assert_eq!(formation.members.len(), 4);
            for m in formation.members {
                assert!(seen.insert(m), "participant matched twice");
            }
            groups += 1;
        }

        assert_eq!(groups, n / 4);
        assert_eq!(seen.len(), (n / 4) * 4);
        assert_eq!(mm.size(&key()), n % 4);
        for i in 0..n {
            let matched = seen.contains(&pid(i));
            let waiting = mm.queue_of(&pid(i)).is_some();
            assert!(matched != waiting, "p{} must be matched xor waiting", i);
        }
    }

    #[test]
    fn test_try_form_draws_from_oldest_window() {
        let mm = matchmaker();
        mm.open(&key()).unwrap();
        for i in 0..12 {
            mm.join(&key(), pid(i)).unwrap();
        }
        let formation = mm.try_form(&key()).unwrap().unwrap();
        // candidates are the 8 longest waiting
        for m in &formation.members {
            let idx: usize = m.as_str()[1..].parse().unwrap();
            assert!(idx < 8, "{} is outside the candidate window", m);
        }
    }

    #[test]
    fn test_try_form_is_seeded() {
        let form = |seed| {
            let mm = Matchmaker::new(Arc::new(VariantRegistry::builtin()), Some(seed));
            mm.open(&key()).unwrap();
            for i in 0..8 {
                mm.join(&key(), pid(i)).unwrap();
            }
            mm.try_form(&key()).unwrap().unwrap().members
        };
        assert_eq!(form(7), form(7));
    }

    #[test]
    fn test_matched_members_cannot_requeue_until_released() {
        let mm = matchmaker();
        mm.open(&key()).unwrap();
        for i in 0..4 {
            mm.join(&key(), pid(i)).unwrap();
        }
        let formation = mm.try_form(&key()).unwrap().unwrap();
        assert!(mm.is_engaged(&pid(0)));
        assert!(matches!(
            mm.join(&key(), pid(0)),
            Err(EngineError::AlreadyInGroup(_))
        ));

        mm.release(&formation.members);
        assert!(!mm.is_engaged(&pid(0)));
        assert_eq!(mm.join(&key(), pid(0)).unwrap(), 1);
    }

    #[test]
    fn test_expire() {
        let mm = matchmaker();
        mm.open(&key()).unwrap();
        mm.join(&key(), pid(0)).unwrap();
        mm.join(&key(), pid(1)).unwrap();

        let now = Instant::now();
        assert!(mm.expire_at(now, Duration::from_secs(60)).is_empty());

        let later = now + Duration::from_secs(120);
        let removed = mm.expire_at(later, Duration::from_secs(60));
        assert_eq!(removed.len(), 2);
        assert_eq!(mm.size(&key()), 0);
        assert!(mm.queue_of(&pid(0)).is_none());
    }
}
