//! Variant registry - static table of exercise configurations

use crate::error::ConfigError;
use crate::ids::VariantId;
use crate::payoff::RuleKind;
use crate::variant::{Variant, VariantSpec};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Lookup table from variant id to its configuration
#[derive(Clone, Debug)]
pub struct VariantRegistry {
    order: Vec<VariantId>,
    variants: FxHashMap<VariantId, Arc<Variant>>,
}

impl VariantRegistry {
    /// Build from specs, resolving every payoff rule
    pub fn from_specs(specs: Vec<VariantSpec>) -> Result<Self, ConfigError> {
        let mut order = Vec::with_capacity(specs.len());
        let mut variants = FxHashMap::default();

        for spec in specs {
            let variant = Variant::from_spec(spec)?;
            let id = variant.id().clone();
            if variants.contains_key(&id) {
                return Err(ConfigError::DuplicateVariant(id.to_string()));
            }
            order.push(id.clone());
            variants.insert(id, Arc::new(variant));
        }

        Ok(Self { order, variants })
    }

    /// The built-in variants
    pub fn builtin() -> Self {
        // The built-in table is checked by tests; an empty registry is the
        // only possible fallback.
        Self::from_specs(builtin_specs()).unwrap_or_else(|_| Self {
            order: Vec::new(),
            variants: FxHashMap::default(),
        })
    }

    /// Load variants from a JSON file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let specs = VariantSpec::load_all(path)?;
        Ok(Self::from_specs(specs)?)
    }

    pub fn get(&self, id: &VariantId) -> Option<Arc<Variant>> {
        self.variants.get(id).cloned()
    }

    pub fn get_str(&self, id: &str) -> Option<Arc<Variant>> {
        self.get(&VariantId::from(id))
    }

    pub fn contains(&self, id: &VariantId) -> bool {
        self.variants.contains_key(id)
    }

    /// Variants in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Variant>> {
        self.order.iter().filter_map(|id| self.variants.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for VariantRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Specs for the built-in variants
pub fn builtin_specs() -> Vec<VariantSpec> {
    vec![
        VariantSpec {
            id: "win-as-much".into(),
            name: "Win As Much As You Can".into(),
            member_count: 4,
            round_count: 8,
            multipliers: BTreeMap::from([(4, 3), (8, 10)]),
            choices: vec!["Contribute".into(), "Protect".into()],
            default_choice: "Protect".into(),
            rule: RuleKind::Matrix,
        },
        VariantSpec {
            id: "stag-hunt".into(),
            name: "Stag Hunt".into(),
            member_count: 3,
            round_count: 6,
            multipliers: BTreeMap::from([(6, 2)]),
            choices: vec!["Stag".into(), "Hare".into()],
            default_choice: "Hare".into(),
            rule: RuleKind::Unanimity,
        },
        VariantSpec {
            id: "majority".into(),
            name: "Follow The Crowd".into(),
            member_count: 5,
            round_count: 6,
            multipliers: BTreeMap::from([(3, 2), (6, 5)]),
            choices: vec!["Red".into(), "Blue".into()],
            default_choice: "Red".into(),
            rule: RuleKind::Majority,
        },
        VariantSpec {
            id: "diversity".into(),
            name: "Spread Out".into(),
            member_count: 3,
            round_count: 5,
            multipliers: BTreeMap::from([(5, 3)]),
            choices: vec!["North".into(), "East".into(), "West".into()],
            default_choice: "North".into(),
            rule: RuleKind::Diversity,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_specs_are_valid() {
        let registry = VariantRegistry::from_specs(builtin_specs()).unwrap();
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_lookup() {
        let registry = VariantRegistry::builtin();
        let v = registry.get_str("win-as-much").unwrap();
        assert_eq!(v.member_count(), 4);
        assert_eq!(v.round_count(), 8);
        assert!(registry.get_str("chess").is_none());
    }

    #[test]
    fn test_iter_preserves_order() {
        let registry = VariantRegistry::builtin();
        let ids: Vec<_> = registry.iter().map(|v| v.id().to_string()).collect();
        assert_eq!(ids, vec!["win-as-much", "stag-hunt", "majority", "diversity"]);
    }

    #[test]
    fn test_benchmarks() {
        let registry = VariantRegistry::builtin();
        assert_eq!(registry.get_str("win-as-much").unwrap().group_benchmark(), 76);
        // 4 per round, x2 on the last of 6 rounds
        assert_eq!(registry.get_str("stag-hunt").unwrap().benchmark(), 28);
        // landslide pays 2, rounds sum to 1+1+2+1+1+5
        assert_eq!(registry.get_str("majority").unwrap().benchmark(), 22);
        // uniform play in a diversity game is all-same, -1 per round
        assert_eq!(registry.get_str("diversity").unwrap().benchmark(), -7);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut specs = builtin_specs();
        specs.push(specs[0].clone());
        assert!(matches!(
            VariantRegistry::from_specs(specs),
            Err(ConfigError::DuplicateVariant(_))
        ));
    }
}
