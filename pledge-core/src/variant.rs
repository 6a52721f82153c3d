//! Variant - exercise configuration
//!
//! A variant is built once from a [`VariantSpec`] and never mutated. The
//! payoff rule named in a definition is resolved to a function pointer here, so
//! nothing downstream dispatches on strings.

use crate::error::ConfigError;
use crate::ids::VariantId;
use crate::payoff::{Outcome, PayoffFn, RuleKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Largest choice set a [`Choice`] index can address
pub const MAX_CHOICES: usize = u8::MAX as usize + 1;

/// Round multipliers must lie in `1..=MAX_MULTIPLIER`
pub const MAX_MULTIPLIER: i64 = 1_000;

/// A choice, as an index into the variant's choice set
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Choice(pub u8);

impl Choice {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Choice at a position in the choice set, if it fits the index type
    pub fn from_index(index: usize) -> Option<Self> {
        u8::try_from(index).ok().map(Choice)
    }
}

/// Serializable variant description
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantSpec {
    pub id: String,
    pub name: String,
    pub member_count: usize,
    pub round_count: u32,
    /// Round number to multiplier. Rounds not listed pay x1.
    #[serde(default)]
    pub multipliers: BTreeMap<u32, i64>,
    pub choices: Vec<String>,
    pub default_choice: String,
    pub rule: RuleKind,
}

impl VariantSpec {
    /// Load a list of variant specs from a JSON file
    ///
    /// Accepts either a bare array or `{ "variants": [...] }`.
    pub fn load_all(path: &Path) -> anyhow::Result<Vec<Self>> {
        let content = std::fs::read_to_string(path)?;

        if let Ok(specs) = serde_json::from_str::<Vec<VariantSpec>>(&content) {
            return Ok(specs);
        }

        #[derive(Deserialize)]
        struct Wrapped {
            variants: Vec<VariantSpec>,
        }

        let wrapped: Wrapped = serde_json::from_str(&content)?;
        Ok(wrapped.variants)
    }
}

/// Immutable exercise configuration
#[derive(Clone, Debug)]
pub struct Variant {
    id: VariantId,
    name: String,
    member_count: usize,
    round_count: u32,
    multipliers: BTreeMap<u32, i64>,
    choices: Vec<String>,
    default_choice: Choice,
    rule: RuleKind,
    payoff: PayoffFn,
}

impl Variant {
    /// Validate a spec and resolve its payoff rule
    pub fn from_spec(spec: VariantSpec) -> Result<Self, ConfigError> {
        if spec.round_count == 0 {
            return Err(ConfigError::NoRounds(spec.id));
        }
        if spec.choices.len() > MAX_CHOICES {
            return Err(ConfigError::TooManyChoices {
                variant: spec.id,
                got: spec.choices.len(),
            });
        }
        spec.rule
            .check_arity(&spec.id, spec.member_count, spec.choices.len())?;

        for (i, symbol) in spec.choices.iter().enumerate() {
            if spec.choices[..i].contains(symbol) {
                return Err(ConfigError::DuplicateChoice {
                    variant: spec.id,
                    choice: symbol.clone(),
                });
            }
        }

        if let Some(&round) = spec
            .multipliers
            .keys()
            .find(|&&r| r == 0 || r > spec.round_count)
        {
            return Err(ConfigError::MultiplierOutOfRange {
                variant: spec.id,
                round,
                round_count: spec.round_count,
            });
        }

        if let Some((&round, &value)) = spec
            .multipliers
            .iter()
            .find(|(_, &m)| !(1..=MAX_MULTIPLIER).contains(&m))
        {
            return Err(ConfigError::MultiplierValue {
                variant: spec.id,
                round,
                value,
            });
        }

        let default_choice = match spec
            .choices
            .iter()
            .position(|c| *c == spec.default_choice)
            .and_then(Choice::from_index)
        {
            Some(choice) => choice,
            None => {
                return Err(ConfigError::DefaultNotInSet {
                    variant: spec.id,
                    choice: spec.default_choice,
                })
            }
        };

        Ok(Self {
            id: VariantId::from(spec.id),
            name: spec.name,
            member_count: spec.member_count,
            round_count: spec.round_count,
            multipliers: spec.multipliers,
            choices: spec.choices,
            default_choice,
            rule: spec.rule,
            payoff: spec.rule.payoff_fn(),
        })
    }

    /// Back to the serializable form
    pub fn to_spec(&self) -> VariantSpec {
        VariantSpec {
            id: self.id.to_string(),
            name: self.name.clone(),
            member_count: self.member_count,
            round_count: self.round_count,
            multipliers: self.multipliers.clone(),
            choices: self.choices.clone(),
            default_choice: self.symbol(self.default_choice).to_string(),
            rule: self.rule,
        }
    }

    pub fn id(&self) -> &VariantId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn member_count(&self) -> usize {
        self.member_count
    }

    pub fn round_count(&self) -> u32 {
        self.round_count
    }

    pub fn rule(&self) -> RuleKind {
        self.rule
    }

    /// Multiplier for a round (x1 unless configured)
    pub fn multiplier(&self, round: u32) -> i64 {
        self.multipliers.get(&round).copied().unwrap_or(1)
    }

    /// All choice symbols in configured order
    pub fn choices(&self) -> &[String] {
        &self.choices
    }

    /// Symbol for a choice index
    pub fn symbol(&self, choice: Choice) -> &str {
        self.choices
            .get(choice.index())
            .map(String::as_str)
            .unwrap_or("?")
    }

    /// Parse a symbol (exact match first, then case-insensitive)
    pub fn parse_choice(&self, symbol: &str) -> Option<Choice> {
        self.choices
            .iter()
            .position(|c| c == symbol)
            .or_else(|| {
                self.choices
                    .iter()
                    .position(|c| c.eq_ignore_ascii_case(symbol))
            })
            .and_then(Choice::from_index)
    }

    /// Whether a choice index is in range
    pub fn is_valid(&self, choice: Choice) -> bool {
        choice.index() < self.choices.len()
    }

    /// Choice auto-submitted when a member misses the deadline
    pub fn default_choice(&self) -> Choice {
        self.default_choice
    }

    /// Unscaled payoff for one round
    pub fn payoff(&self, choices: &[Choice]) -> Outcome {
        (self.payoff)(self, choices)
    }

    /// Sum of all round multipliers
    pub fn multiplier_sum(&self) -> i64 {
        (1..=self.round_count).map(|r| self.multiplier(r)).sum()
    }

    /// Best per-member total under a uniform strategy
    ///
    /// Every member picks the same symbol in every round; the best symbol wins.
    pub fn benchmark(&self) -> i64 {
        (0..self.choices.len())
            .filter_map(Choice::from_index)
            .map(|choice| {
                let uniform = vec![choice; self.member_count];
                let outcome = self.payoff(&uniform);
                outcome.deltas.first().copied().unwrap_or(0) * self.multiplier_sum()
            })
            .max()
            .unwrap_or(0)
    }

    /// Best group total under a uniform strategy
    pub fn group_benchmark(&self) -> i64 {
        self.benchmark() * self.member_count as i64
    }
}
