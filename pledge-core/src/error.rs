//! Error types
//!
//! Every engine failure is scoped to one group or one queue; nothing here is
//! fatal to the process.

use crate::ids::{GroupId, ParticipantId, QueueKey};
use serde::Serialize;

/// Coarse classification of an [`EngineError`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Bad input from the caller. Rejected, no state change.
    Validation,
    /// Stale client or race loser. Safe to ignore at the call site.
    Protocol,
    /// Queue does not exist. No partial group is ever formed.
    Capacity,
}

/// Errors raised by the matchmaker and the session engine
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("unknown group {0}")]
    UnknownGroup(GroupId),

    #[error("group {0} is not active")]
    NotActive(GroupId),

    #[error("{participant} is not a member of group {group}")]
    NotAMember {
        group: GroupId,
        participant: ParticipantId,
    },

    #[error("{participant} already submitted a move for round {round}")]
    AlreadySubmitted {
        participant: ParticipantId,
        round: u32,
    },

    #[error("round {round} of group {group} is already resolved")]
    AlreadyResolved { group: GroupId, round: u32 },

    #[error("round mismatch: group is on round {expected}, got {got}")]
    RoundMismatch { expected: u32, got: u32 },

    #[error("round {round} has {received} of {expected} moves")]
    RoundIncomplete {
        round: u32,
        received: usize,
        expected: usize,
    },

    #[error("unknown choice {0:?}")]
    UnknownChoice(String),

    #[error("unknown variant {0:?}")]
    UnknownVariant(String),

    #[error("group needs exactly {expected} distinct members, got {got}")]
    WrongArity { expected: usize, got: usize },

    #[error("{0} is already playing in an active group")]
    AlreadyInGroup(ParticipantId),

    #[error("{participant} is already waiting in queue {queue}")]
    AlreadyQueued {
        participant: ParticipantId,
        queue: QueueKey,
    },

    #[error("unknown queue {0}")]
    UnknownQueue(QueueKey),
}

impl EngineError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::AlreadySubmitted { .. }
            | EngineError::AlreadyResolved { .. }
            | EngineError::NotActive(_)
            | EngineError::RoundMismatch { .. } => ErrorKind::Protocol,
            EngineError::UnknownQueue(_) => ErrorKind::Capacity,
            _ => ErrorKind::Validation,
        }
    }

    /// True for errors a race loser or stale client produces
    pub fn is_protocol(&self) -> bool {
        self.kind() == ErrorKind::Protocol
    }
}

/// Errors raised while building variants from configuration
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("variant {variant}: rule {rule} needs {expected}, got {got}")]
    Arity {
        variant: String,
        rule: &'static str,
        expected: &'static str,
        got: usize,
    },

    #[error("variant {variant}: default choice {choice:?} is not in the choice set")]
    DefaultNotInSet { variant: String, choice: String },

    #[error("variant {variant}: duplicate choice symbol {choice:?}")]
    DuplicateChoice { variant: String, choice: String },

    #[error("variant {variant}: multiplier for round {round} is outside 1..={round_count}")]
    MultiplierOutOfRange {
        variant: String,
        round: u32,
        round_count: u32,
    },

    #[error("variant {variant}: {got} choices exceed the limit of 256")]
    TooManyChoices { variant: String, got: usize },

    #[error("variant {variant}: multiplier {value} for round {round} is outside 1..=1000")]
    MultiplierValue {
        variant: String,
        round: u32,
        value: i64,
    },

    #[error("variant {0}: round count must be at least 1")]
    NoRounds(String),

    #[error("duplicate variant id {0:?}")]
    DuplicateVariant(String),
}
