//! Payoff rules
//!
//! Each rule maps one round's choices to an unscaled per-member delta and a
//! pattern label. Rules look only at the choice counts when labelling, so a
//! label never reveals who chose what. Deltas are positional: `deltas[i]`
//! belongs to whoever submitted `choices[i]`.

use crate::error::ConfigError;
use crate::variant::{Choice, Variant};
use serde::{Deserialize, Serialize};

/// Result of applying a payoff rule to one round
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    /// Unscaled delta per member, in input order
    pub deltas: Vec<i64>,
    /// Anonymous pattern classification
    pub label: String,
}

impl Outcome {
    pub fn total(&self) -> i64 {
        self.deltas.iter().sum()
    }
}

/// Payoff function signature stored on every variant
pub type PayoffFn = fn(&Variant, &[Choice]) -> Outcome;

/// Registered payoff rules
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Fixed asymmetric matrix keyed by the number of defectors
    Matrix,
    /// Rewards unanimous cooperation
    Unanimity,
    /// Rewards siding with the majority
    Majority,
    /// Rewards choosing differently from everyone else
    Diversity,
}

impl RuleKind {
    pub fn name(self) -> &'static str {
        match self {
            RuleKind::Matrix => "matrix",
            RuleKind::Unanimity => "unanimity",
            RuleKind::Majority => "majority",
            RuleKind::Diversity => "diversity",
        }
    }

    /// Function table
    pub fn payoff_fn(self) -> PayoffFn {
        match self {
            RuleKind::Matrix => matrix,
            RuleKind::Unanimity => unanimity,
            RuleKind::Majority => majority,
            RuleKind::Diversity => diversity,
        }
    }

    /// Check member and choice counts against what the rule can score
    pub fn check_arity(
        self,
        variant: &str,
        members: usize,
        choices: usize,
    ) -> Result<(), ConfigError> {
        let arity = |expected: &'static str, got: usize| ConfigError::Arity {
            variant: variant.to_string(),
            rule: self.name(),
            expected,
            got,
        };

        match self {
            RuleKind::Matrix => {
                if members != MATRIX_MEMBERS {
                    return Err(arity("exactly 4 members", members));
                }
                if choices != 2 {
                    return Err(arity("exactly 2 choices", choices));
                }
            }
            RuleKind::Unanimity | RuleKind::Majority => {
                if members < 2 {
                    return Err(arity("at least 2 members", members));
                }
                if choices != 2 {
                    return Err(arity("exactly 2 choices", choices));
                }
            }
            RuleKind::Diversity => {
                if members < 2 {
                    return Err(arity("at least 2 members", members));
                }
                if choices < 2 {
                    return Err(arity("at least 2 choices", choices));
                }
            }
        }
        Ok(())
    }
}

/// Compute one round's unscaled payoff
///
/// The caller guarantees `choices.len() == variant.member_count()`.
pub fn compute(variant: &Variant, choices: &[Choice]) -> Outcome {
    debug_assert_eq!(choices.len(), variant.member_count());
    variant.payoff(choices)
}

/// Number of times each symbol was chosen, in choice-set order
pub fn choice_counts(variant: &Variant, choices: &[Choice]) -> Vec<usize> {
    let mut counts = vec![0usize; variant.choices().len()];
    for c in choices {
        if let Some(n) = counts.get_mut(c.index()) {
            *n += 1;
        }
    }
    counts
}

// ============================================================================
// RULES
// ============================================================================

const MATRIX_MEMBERS: usize = 4;

/// (defector payoff, cooperator payoff), indexed by number of defectors
const MATRIX_TABLE: [(i64, i64); MATRIX_MEMBERS + 1] = [
    (0, 1),   // all cooperate
    (3, -1),  // 1 defector
    (2, -2),  // 2 defectors
    (1, -3),  // 3 defectors
    (-1, 0),  // all defect
];

/// Choice 0 cooperates, choice 1 defects
fn matrix(variant: &Variant, choices: &[Choice]) -> Outcome {
    let counts = choice_counts(variant, choices);
    let (coop, defect) = (counts[0], counts[1]);
    let (defector_pay, cooperator_pay) = MATRIX_TABLE[defect.min(MATRIX_MEMBERS)];

    let deltas = choices
        .iter()
        .map(|c| if c.0 == 0 { cooperator_pay } else { defector_pay })
        .collect();

    let (c_sym, d_sym) = (variant.symbol(Choice(0)), variant.symbol(Choice(1)));
    let label = if defect == 0 {
        format!("{} {}", coop, c_sym)
    } else if coop == 0 {
        format!("{} {}", defect, d_sym)
    } else {
        format!("{} {} / {} {}", coop, c_sym, defect, d_sym)
    };

    Outcome { deltas, label }
}

const STAG_REWARD: i64 = 4;
const LONE_STAG: i64 = -1;
const HARE_REWARD: i64 = 1;

/// Choice 0 pays big only if everyone picks it; choice 1 is the safe option
fn unanimity(variant: &Variant, choices: &[Choice]) -> Outcome {
    let counts = choice_counts(variant, choices);
    let n = choices.len();

    let (deltas, label) = if counts[0] == n {
        (vec![STAG_REWARD; n], format!("Unanimous {}", variant.symbol(Choice(0))))
    } else {
        let deltas = choices
            .iter()
            .map(|c| if c.0 == 0 { LONE_STAG } else { HARE_REWARD })
            .collect();
        let label = if counts[1] == n {
            format!("Unanimous {}", variant.symbol(Choice(1)))
        } else {
            "Split".to_string()
        };
        (deltas, label)
    };

    Outcome { deltas, label }
}

const MAJORITY_REWARD: i64 = 2;
const MINORITY_PENALTY: i64 = -1;

/// Members on the larger side gain, the smaller side loses, ties pay nothing
fn majority(variant: &Variant, choices: &[Choice]) -> Outcome {
    let counts = choice_counts(variant, choices);
    let (a, b) = (counts[0], counts[1]);

    if a == b {
        return Outcome {
            deltas: vec![0; choices.len()],
            label: "Tie".to_string(),
        };
    }

    let winner = if a > b { 0 } else { 1 };
    let margin = a.abs_diff(b);
    let deltas = choices
        .iter()
        .map(|c| if c.0 == winner { MAJORITY_REWARD } else { MINORITY_PENALTY })
        .collect();

    let label = if a == 0 || b == 0 {
        "Landslide"
    } else if margin == 1 {
        "Narrow"
    } else {
        "Majority"
    };

    Outcome {
        deltas,
        label: label.to_string(),
    }
}

const ALL_DIFFERENT: i64 = 3;
const UNIQUE_PICK: i64 = 2;
const ALL_SAME: i64 = -1;

/// Rewards spreading out across the choice set
fn diversity(variant: &Variant, choices: &[Choice]) -> Outcome {
    let counts = choice_counts(variant, choices);
    let n = choices.len();
    let distinct = counts.iter().filter(|&&k| k > 0).count();

    if distinct == n {
        return Outcome {
            deltas: vec![ALL_DIFFERENT; n],
            label: "All Different".to_string(),
        };
    }
    if distinct == 1 {
        return Outcome {
            deltas: vec![ALL_SAME; n],
            label: "All Same".to_string(),
        };
    }

    let deltas = choices
        .iter()
        .map(|c| if counts[c.index()] == 1 { UNIQUE_PICK } else { 0 })
        .collect();

    Outcome {
        deltas,
        label: "Mixed".to_string(),
    }
}
