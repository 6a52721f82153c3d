//! PLEDGE Core - Variants, payoffs and the group state machine
//!
//! This crate provides the pure parts of the exercise:
//! - Identifiers for groups, participants, variants and queues
//! - Variant configuration and the static variant registry
//! - Payoff rules (matrix, unanimity, majority, diversity)
//! - The per-group session state machine
//!
//! Nothing here spawns tasks or takes locks.

pub mod error;
pub mod ids;
pub mod payoff;
pub mod registry;
pub mod session;
pub mod variant;

// Re-exports for convenient access
pub use error::{ConfigError, EngineError, ErrorKind};
pub use ids::{GroupId, ParticipantId, QueueKey, VariantId};
pub use payoff::{choice_counts, compute, Outcome, PayoffFn, RuleKind};
pub use registry::{builtin_specs, VariantRegistry};
pub use session::{
    ChoiceCount, GroupSnapshot, MemberLine, MemberScore, Move, Next, Resolution, RoundRecord,
    RoundResult, Session, Status,
};
pub use variant::{Choice, Variant, VariantSpec};
