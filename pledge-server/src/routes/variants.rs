//! Variant catalogue endpoint

use crate::state::ServerState;
use axum::{extract::State, Json};
use pledge_core::{RuleKind, Variant, VariantId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantInfo {
    pub id: VariantId,
    pub name: String,
    pub member_count: usize,
    pub round_count: u32,
    pub choices: Vec<String>,
    pub default_choice: String,
    pub rule: RuleKind,
    /// Only rounds that do not pay x1
    pub multipliers: BTreeMap<u32, i64>,
    pub benchmark: i64,
    pub group_benchmark: i64,
}

impl From<&Variant> for VariantInfo {
    fn from(variant: &Variant) -> Self {
        let spec = variant.to_spec();
        Self {
            id: variant.id().clone(),
            name: spec.name,
            member_count: spec.member_count,
            round_count: spec.round_count,
            choices: spec.choices,
            default_choice: spec.default_choice,
            rule: spec.rule,
            multipliers: spec.multipliers,
            benchmark: variant.benchmark(),
            group_benchmark: variant.group_benchmark(),
        }
    }
}

/// Every registered variant, in registry order
pub async fn list_variants(State(state): State<Arc<ServerState>>) -> Json<Vec<VariantInfo>> {
    Json(
        state
            .engine
            .registry()
            .iter()
            .map(|v| VariantInfo::from(v.as_ref()))
            .collect(),
    )
}
