//! Session - one group's round-by-round state machine
//!
//! States: `Active(round r)` -> `Active(r + 1)` -> ... -> `Complete`, or
//! `Active(*)` -> `Abandoned`. Both end states are terminal.
//!
//! A `Session` is plain data with no locking of its own. The engine keeps each
//! one behind a per-group mutex, which is what turns [`Session::resolve_round`]
//! into a compare-and-swap on the round's `resolved` flag: whichever caller
//! gets the lock first settles the round, the other sees `AlreadyResolved`.

use crate::error::EngineError;
use crate::ids::{GroupId, ParticipantId, QueueKey, VariantId};
use crate::payoff::{choice_counts, compute};
use crate::variant::{Choice, Variant};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Group lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Active,
    Complete,
    Abandoned,
}

/// One member's move in a round
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Move {
    pub choice: Choice,
    pub symbol: String,
    pub submitted_at: DateTime<Utc>,
    pub is_auto: bool,
}

/// Moves received for one round
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundRecord {
    pub group_id: GroupId,
    pub round: u32,
    pub moves: BTreeMap<ParticipantId, Move>,
    pub resolved: bool,
}

impl RoundRecord {
    fn new(group_id: GroupId, round: u32) -> Self {
        Self {
            group_id,
            round,
            moves: BTreeMap::new(),
            resolved: false,
        }
    }
}

/// How many members picked a symbol
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceCount {
    pub symbol: String,
    pub count: usize,
}

/// One member's line in a round result
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberLine {
    pub participant_id: ParticipantId,
    /// Delta after the round multiplier
    pub delta: i64,
    pub new_total: i64,
    pub is_auto: bool,
}

/// Settled outcome of a round
///
/// Carries aggregate counts and each member's own numbers, never which member
/// chose which symbol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResult {
    pub group_id: GroupId,
    pub round: u32,
    pub multiplier: i64,
    pub choice_counts: Vec<ChoiceCount>,
    pub pattern_label: String,
    pub per_member: Vec<MemberLine>,
}

impl RoundResult {
    /// Copy with only one participant's line kept
    pub fn redacted_for(&self, participant: &ParticipantId) -> RoundResult {
        RoundResult {
            per_member: self
                .per_member
                .iter()
                .filter(|line| &line.participant_id == participant)
                .cloned()
                .collect(),
            ..self.clone()
        }
    }

    /// Copy with every per-member line dropped
    ///
    /// Audiences outside the group see counts and the pattern label only.
    pub fn anonymized(&self) -> RoundResult {
        RoundResult {
            per_member: Vec::new(),
            ..self.clone()
        }
    }

    /// Sum of applied deltas
    pub fn total_delta(&self) -> i64 {
        self.per_member.iter().map(|line| line.delta).sum()
    }

    pub fn auto_moves(&self) -> usize {
        self.per_member.iter().filter(|line| line.is_auto).count()
    }

    pub fn count_of(&self, symbol: &str) -> usize {
        self.choice_counts
            .iter()
            .find(|c| c.symbol == symbol)
            .map(|c| c.count)
            .unwrap_or(0)
    }
}

/// What happens after a round resolves
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Next {
    /// The group moved on to this round
    Round(u32),
    /// That was the last round
    Complete,
}

/// A freshly resolved round
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub result: RoundResult,
    pub next: Next,
}

/// A member's running total
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberScore {
    pub participant_id: ParticipantId,
    pub total: i64,
}

/// Read-only view of a group, also the stored group row
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSnapshot {
    pub group_id: GroupId,
    pub queue: QueueKey,
    pub variant: VariantId,
    pub members: Vec<ParticipantId>,
    pub status: Status,
    pub current_round: u32,
    pub round_count: u32,
    pub scores: Vec<MemberScore>,
    pub abandon_reason: Option<String>,
    pub rounds_resolved: usize,
    pub created_at: DateTime<Utc>,
}

/// One group's full state
#[derive(Clone, Debug)]
pub struct Session {
    id: GroupId,
    queue: QueueKey,
    variant: Arc<Variant>,
    members: Vec<ParticipantId>,
    status: Status,
    abandon_reason: Option<String>,
    current_round: u32,
    /// Cumulative score, aligned with `members`
    scores: Vec<i64>,
    rounds: Vec<RoundRecord>,
    results: Vec<RoundResult>,
    created_at: DateTime<Utc>,
}

impl Session {
    /// Start a group on round 1
    pub fn new(
        id: GroupId,
        queue: QueueKey,
        variant: Arc<Variant>,
        members: Vec<ParticipantId>,
    ) -> Result<Self, EngineError> {
        let expected = variant.member_count();
        let distinct = members
            .iter()
            .enumerate()
            .all(|(i, m)| !members[..i].contains(m));
        if members.len() != expected || !distinct {
            return Err(EngineError::WrongArity {
                expected,
                got: members.len(),
            });
        }

        Ok(Self {
            id,
            queue,
            scores: vec![0; members.len()],
            members,
            variant,
            status: Status::Active,
            abandon_reason: None,
            current_round: 1,
            rounds: vec![RoundRecord::new(id, 1)],
            results: Vec::new(),
            created_at: Utc::now(),
        })
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn queue(&self) -> &QueueKey {
        &self.queue
    }

    pub fn variant(&self) -> &Arc<Variant> {
        &self.variant
    }

    pub fn members(&self) -> &[ParticipantId] {
        &self.members
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }

    pub fn current_round(&self) -> u32 {
        self.current_round
    }

    pub fn abandon_reason(&self) -> Option<&str> {
        self.abandon_reason.as_deref()
    }

    pub fn is_member(&self, participant: &ParticipantId) -> bool {
        self.members.contains(participant)
    }

    fn seat(&self, participant: &ParticipantId) -> Option<usize> {
        self.members.iter().position(|m| m == participant)
    }

    /// Cumulative score of one member
    pub fn score_of(&self, participant: &ParticipantId) -> Option<i64> {
        self.seat(participant).map(|i| self.scores[i])
    }

    /// All cumulative scores, in member order
    pub fn scores(&self) -> Vec<MemberScore> {
        self.members
            .iter()
            .zip(&self.scores)
            .map(|(m, &total)| MemberScore {
                participant_id: m.clone(),
                total,
            })
            .collect()
    }

    /// Sum of member scores
    pub fn group_total(&self) -> i64 {
        self.scores.iter().sum()
    }

    pub fn rounds(&self) -> &[RoundRecord] {
        &self.rounds
    }

    pub fn results(&self) -> &[RoundResult] {
        &self.results
    }

    /// Record for a round, if it has started
    pub fn round_record(&self, round: u32) -> Option<&RoundRecord> {
        round
            .checked_sub(1)
            .and_then(|i| self.rounds.get(i as usize))
    }

    /// Record of the round currently being played (or the last one played)
    pub fn current_record(&self) -> &RoundRecord {
        // `rounds` always holds the record for `current_round`
        &self.rounds[self.rounds.len() - 1]
    }

    /// True iff the current round holds a move from every member
    pub fn is_round_complete(&self) -> bool {
        self.current_record().moves.len() == self.variant.member_count()
    }

    /// Members with no move in the current round
    pub fn missing_members(&self) -> Vec<ParticipantId> {
        let record = self.current_record();
        self.members
            .iter()
            .filter(|m| !record.moves.contains_key(*m))
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> GroupSnapshot {
        GroupSnapshot {
            group_id: self.id,
            queue: self.queue.clone(),
            variant: self.variant.id().clone(),
            members: self.members.clone(),
            status: self.status,
            current_round: self.current_round,
            round_count: self.variant.round_count(),
            scores: self.scores(),
            abandon_reason: self.abandon_reason.clone(),
            rounds_resolved: self.results.len(),
            created_at: self.created_at,
        }
    }

    // ========================================================================
    // TRANSITIONS
    // ========================================================================

    /// Record one member's move for `round`
    ///
    /// A resubmission is always an error; the first move stands.
    pub fn submit_move(
        &mut self,
        participant: &ParticipantId,
        round: u32,
        choice: Choice,
        is_auto: bool,
    ) -> Result<(), EngineError> {
        self.admit(participant, round)?;
        if !self.variant.is_valid(choice) {
            return Err(EngineError::UnknownChoice(format!("#{}", choice.0)));
        }
        self.record_move(participant, choice, is_auto);
        Ok(())
    }

    /// Like [`Session::submit_move`], with the choice given as a symbol
    pub fn submit_symbol(
        &mut self,
        participant: &ParticipantId,
        round: u32,
        symbol: &str,
        is_auto: bool,
    ) -> Result<Choice, EngineError> {
        self.admit(participant, round)?;
        let choice = self
            .variant
            .parse_choice(symbol)
            .ok_or_else(|| EngineError::UnknownChoice(symbol.to_string()))?;
        self.record_move(participant, choice, is_auto);
        Ok(choice)
    }

    /// Checks shared by every submission path, in reporting order
    fn admit(&self, participant: &ParticipantId, round: u32) -> Result<(), EngineError> {
        if !self.is_active() {
            return Err(EngineError::NotActive(self.id));
        }
        if !self.is_member(participant) {
            return Err(EngineError::NotAMember {
                group: self.id,
                participant: participant.clone(),
            });
        }
        if round != self.current_round {
            return Err(EngineError::RoundMismatch {
                expected: self.current_round,
                got: round,
            });
        }
        let record = self.current_record();
        if record.resolved {
            return Err(EngineError::AlreadyResolved {
                group: self.id,
                round,
            });
        }
        if record.moves.contains_key(participant) {
            return Err(EngineError::AlreadySubmitted {
                participant: participant.clone(),
                round,
            });
        }
        Ok(())
    }

    fn record_move(&mut self, participant: &ParticipantId, choice: Choice, is_auto: bool) {
        let symbol = self.variant.symbol(choice).to_string();
        let last = self.rounds.len() - 1;
        self.rounds[last].moves.insert(
            participant.clone(),
            Move {
                choice,
                symbol,
                submitted_at: Utc::now(),
                is_auto,
            },
        );
    }

    /// Submit the default choice for every member still missing in `round`
    ///
    /// Returns the members that were filled in.
    pub fn auto_fill(&mut self, round: u32) -> Result<Vec<ParticipantId>, EngineError> {
        let missing = self.missing_members();
        let default = self.variant.default_choice();
        for participant in &missing {
            self.submit_move(participant, round, default, true)?;
        }
        Ok(missing)
    }

    /// Settle `round` exactly once
    ///
    /// Fails with `AlreadyResolved` and leaves everything untouched if the
    /// round was settled before.
    pub fn resolve_round(&mut self, round: u32) -> Result<Resolution, EngineError> {
        let Some(record) = self.round_record(round) else {
            return Err(EngineError::RoundMismatch {
                expected: self.current_round,
                got: round,
            });
        };
        if record.resolved {
            return Err(EngineError::AlreadyResolved {
                group: self.id,
                round,
            });
        }
        if !self.is_active() {
            return Err(EngineError::NotActive(self.id));
        }
        let expected = self.variant.member_count();
        if record.moves.len() != expected {
            return Err(EngineError::RoundIncomplete {
                round,
                received: record.moves.len(),
                expected,
            });
        }

        // Choices in member order, so deltas line up with `scores`
        let mut choices = Vec::with_capacity(expected);
        let mut autos = Vec::with_capacity(expected);
        for member in &self.members {
            match record.moves.get(member) {
                Some(m) => {
                    choices.push(m.choice);
                    autos.push(m.is_auto);
                }
                None => {
                    return Err(EngineError::RoundIncomplete {
                        round,
                        received: record.moves.len(),
                        expected,
                    })
                }
            }
        }

        let outcome = compute(&self.variant, &choices);
        let multiplier = self.variant.multiplier(round);
        let counts = choice_counts(&self.variant, &choices);

        let mut per_member = Vec::with_capacity(expected);
        for (i, member) in self.members.iter().enumerate() {
            let delta = outcome.deltas[i] * multiplier;
            self.scores[i] += delta;
            per_member.push(MemberLine {
                participant_id: member.clone(),
                delta,
                new_total: self.scores[i],
                is_auto: autos[i],
            });
        }

        let result = RoundResult {
            group_id: self.id,
            round,
            multiplier,
            choice_counts: self
                .variant
                .choices()
                .iter()
                .zip(counts)
                .map(|(symbol, count)| ChoiceCount {
                    symbol: symbol.clone(),
                    count,
                })
                .collect(),
            pattern_label: outcome.label,
            per_member,
        };

        let index = (round - 1) as usize;
        self.rounds[index].resolved = true;
        self.results.push(result.clone());

        let next = if self.current_round < self.variant.round_count() {
            self.current_round += 1;
            self.rounds.push(RoundRecord::new(self.id, self.current_round));
            Next::Round(self.current_round)
        } else {
            self.status = Status::Complete;
            Next::Complete
        };

        Ok(Resolution { result, next })
    }

    /// Give up on the group
    pub fn abandon(&mut self, reason: impl Into<String>) -> Result<(), EngineError> {
        if !self.is_active() {
            return Err(EngineError::NotActive(self.id));
        }
        self.status = Status::Abandoned;
        self.abandon_reason = Some(reason.into());
        Ok(())
    }
}
