//! Round scheduler - one cancellable deadline per group
//!
//! Level 3 - Step-level implementation
//!
//! Each armed deadline is a tokio task sleeping until the deadline. A slot
//! table maps every group to the generation of its single pending task. The
//! task fires only if it can still remove its own slot under the table lock;
//! `disarm` removes the slot under the same lock and aborts the task. Whoever
//! takes the slot first wins, so the handler runs at most once per arm.

use crate::locks::lock;
use pledge_core::GroupId;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Called when a deadline elapses without being disarmed
pub trait TimeoutHandler: Send + Sync + 'static {
    fn on_timeout(&self, group: GroupId, round: u32);
}

impl<F> TimeoutHandler for F
where
    F: Fn(GroupId, u32) + Send + Sync + 'static,
{
    fn on_timeout(&self, group: GroupId, round: u32) {
        self(group, round)
    }
}

struct Slot {
    generation: u64,
    round: u32,
    task: JoinHandle<()>,
}

type Slots = Arc<Mutex<FxHashMap<GroupId, Slot>>>;

/// Per-group deadline timer
///
/// `arm` spawns onto the current tokio runtime and must be called from inside
/// one.
pub struct RoundScheduler {
    slots: Slots,
    handler: Arc<dyn TimeoutHandler>,
    generation: AtomicU64,
}

impl RoundScheduler {
    pub fn new(handler: Arc<dyn TimeoutHandler>) -> Self {
        Self {
            slots: Arc::new(Mutex::new(FxHashMap::default())),
            handler,
            generation: AtomicU64::new(0),
        }
    }

    /// Install the deadline for `round`, replacing any pending one
    pub fn arm(&self, group: GroupId, round: u32, after: Duration) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let slots = self.slots.clone();
        let handler = self.handler.clone();

        // Held across the spawn so the task cannot look for its slot before
        // it is inserted.
        let mut table = lock(&self.slots);
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let fire = {
                let mut table = lock(&slots);
                match table.get(&group) {
                    Some(slot) if slot.generation == generation => {
                        table.remove(&group);
                        true
                    }
                    _ => false,
                }
            };
            if fire {
                tracing::debug!(group = %group, round, "deadline fired");
                handler.on_timeout(group, round);
            }
        });

        let previous = table.insert(
            group,
            Slot {
                generation,
                round,
                task,
            },
        );
        if let Some(previous) = previous {
            previous.task.abort();
        }
    }

    /// Cancel the pending deadline, returning whether there was one
    pub fn disarm(&self, group: GroupId) -> bool {
        match lock(&self.slots).remove(&group) {
            Some(slot) => {
                slot.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, group: GroupId) -> bool {
        lock(&self.slots).contains_key(&group)
    }

    /// Round the pending deadline belongs to
    pub fn armed_round(&self, group: GroupId) -> Option<u32> {
        lock(&self.slots).get(&group).map(|s| s.round)
    }

    pub fn armed_count(&self) -> usize {
        lock(&self.slots).len()
    }
}

impl Drop for RoundScheduler {
    fn drop(&mut self) {
        for (_, slot) in lock(&self.slots).drain() {
            slot.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting() -> (RoundScheduler, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let scheduler = RoundScheduler::new(Arc::new(move |_group: GroupId, _round: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        (scheduler, fired)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once() {
        let (scheduler, fired) = counting();
        scheduler.arm(GroupId(1), 1, Duration::from_secs(30));
        assert!(scheduler.is_armed(GroupId(1)));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_armed(GroupId(1)));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_prevents_fire() {
        let (scheduler, fired) = counting();
        scheduler.arm(GroupId(1), 1, Duration::from_secs(30));
        assert!(scheduler.disarm(GroupId(1)));
        assert!(!scheduler.disarm(GroupId(1)));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_previous() {
        let (scheduler, fired) = counting();
        scheduler.arm(GroupId(1), 1, Duration::from_secs(10));
        scheduler.arm(GroupId(1), 2, Duration::from_secs(30));
        assert_eq!(scheduler.armed_count(), 1);
        assert_eq!(scheduler.armed_round(GroupId(1)), Some(2));

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_groups_are_independent() {
        let (scheduler, fired) = counting();
        scheduler.arm(GroupId(1), 1, Duration::from_secs(10));
        scheduler.arm(GroupId(2), 1, Duration::from_secs(10));
        scheduler.disarm(GroupId(1));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_disarm_racing_fire_runs_at_most_once() {
        for _ in 0..200 {
            let (scheduler, fired) = counting();
            let scheduler = Arc::new(scheduler);
            scheduler.arm(GroupId(9), 1, Duration::from_micros(50));

            let racer = scheduler.clone();
            let disarm = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_micros(50)).await;
                racer.disarm(GroupId(9))
            });
            let disarmed = disarm.await.unwrap();

            tokio::time::sleep(Duration::from_millis(2)).await;
            let count = fired.load(Ordering::SeqCst);
            assert!(count <= 1);
            // exactly one side took the slot
            assert_eq!(count == 1, !disarmed);
        }
    }
}
