//! Polled event delivery
//!
//! Engine events are queued per participant and drained by
//! `GET /api/inbox/{participant}`. Queue updates keep only the latest size per
//! queue; dashboard events go to a bounded feed.

use pledge_core::{ParticipantId, QueueKey};
use pledge_engine::{Audience, Outbound, Transport};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Events kept per participant before the oldest is dropped
const PARTICIPANT_CAPACITY: usize = 256;

/// Events kept in the dashboard feed
const DASHBOARD_CAPACITY: usize = 512;

#[derive(Default)]
struct Boxes {
    participants: FxHashMap<ParticipantId, VecDeque<Outbound>>,
    queues: FxHashMap<QueueKey, usize>,
    dashboard: VecDeque<Outbound>,
}

/// In-memory transport drained by HTTP polling
#[derive(Default)]
pub struct Inbox {
    boxes: Mutex<Boxes>,
}

fn push_bounded(queue: &mut VecDeque<Outbound>, event: Outbound, capacity: usize) {
    if queue.len() == capacity {
        queue.pop_front();
    }
    queue.push_back(event);
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn boxes(&self) -> std::sync::MutexGuard<'_, Boxes> {
        self.boxes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take every pending event for a participant
    pub fn drain(&self, participant: &ParticipantId) -> Vec<Outbound> {
        self.boxes()
            .participants
            .remove(participant)
            .map(Vec::from)
            .unwrap_or_default()
    }

    pub fn pending(&self, participant: &ParticipantId) -> usize {
        self.boxes()
            .participants
            .get(participant)
            .map(|q| q.len())
            .unwrap_or(0)
    }

    /// Latest announced size of a queue
    pub fn queue_size(&self, queue: &QueueKey) -> Option<usize> {
        self.boxes().queues.get(queue).copied()
    }

    /// Recent dashboard events, oldest first
    pub fn dashboard_feed(&self) -> Vec<Outbound> {
        self.boxes().dashboard.iter().cloned().collect()
    }
}

impl Transport for Inbox {
    fn publish(&self, audience: Audience, event: Outbound) {
        let mut boxes = self.boxes();
        match audience {
            Audience::Participant(participant) => {
                let queue = boxes.participants.entry(participant).or_default();
                push_bounded(queue, event, PARTICIPANT_CAPACITY);
            }
            Audience::Members(members) => {
                for member in members {
                    let queue = boxes.participants.entry(member).or_default();
                    push_bounded(queue, event.clone(), PARTICIPANT_CAPACITY);
                }
            }
            Audience::Queue(key) => {
                if let Outbound::QueueUpdate { size, .. } = event {
                    boxes.queues.insert(key, size);
                }
            }
            Audience::Dashboard => {
                push_bounded(&mut boxes.dashboard, event, DASHBOARD_CAPACITY);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pledge_core::GroupId;

    fn ack(round: u32) -> Outbound {
        Outbound::MoveAcknowledged {
            group_id: GroupId(1),
            round,
        }
    }

    #[test]
    fn test_members_each_get_a_copy() {
        let inbox = Inbox::new();
        let a = ParticipantId::from("a");
        let b = ParticipantId::from("b");
        inbox.publish(Audience::Members(vec![a.clone(), b.clone()]), ack(1));

        assert_eq!(inbox.drain(&a), vec![ack(1)]);
        assert_eq!(inbox.pending(&b), 1);
        assert!(inbox.drain(&a).is_empty());
    }

    #[test]
    fn test_queue_keeps_latest_size() {
        let inbox = Inbox::new();
        let key = QueueKey::new("win-as-much", "A");
        for size in [1, 2, 3] {
            inbox.publish(
                Audience::Queue(key.clone()),
                Outbound::QueueUpdate {
                    queue: key.clone(),
                    size,
                },
            );
        }
        assert_eq!(inbox.queue_size(&key), Some(3));
    }

    #[test]
    fn test_participant_box_is_bounded() {
        let inbox = Inbox::new();
        let a = ParticipantId::from("a");
        for round in 0..(PARTICIPANT_CAPACITY as u32 + 10) {
            inbox.publish(Audience::Participant(a.clone()), ack(round));
        }
        let events = inbox.drain(&a);
        assert_eq!(events.len(), PARTICIPANT_CAPACITY);
        assert_eq!(events[0], ack(10));
    }
}
