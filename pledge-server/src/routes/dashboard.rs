//! Instructor dashboard endpoint

use crate::dashboard::RunMetrics;
use crate::error::{ApiError, ApiResult};
use crate::state::ServerState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use pledge_core::{GroupId, Status, VariantId};
use pledge_engine::Outbound;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Most recent events returned with the dashboard
const RECENT_EVENTS: usize = 50;

#[derive(Deserialize)]
pub struct DashboardQuery {
    pub token: Option<String>,
}

/// Headline counters
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cards {
    pub connected: usize,
    pub in_queue: usize,
    pub active_games: usize,
    pub completed: usize,
    pub abandoned: usize,
    pub auto_moves: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub run_id: String,
    pub variant: VariantId,
    pub cards: Cards,
    pub group_benchmark: i64,
    pub average_total: Option<f64>,
    pub metrics: RunMetrics,
    pub recent: Vec<Outbound>,
}

fn event_group(event: &Outbound) -> Option<GroupId> {
    match event {
        Outbound::QueueUpdate { .. } => None,
        Outbound::GroupFormed { group_id, .. }
        | Outbound::RoundStarted { group_id, .. }
        | Outbound::MoveAcknowledged { group_id, .. }
        | Outbound::RoundResolved { group_id, .. }
        | Outbound::GroupComplete { group_id, .. }
        | Outbound::GroupAbandoned { group_id, .. } => Some(*group_id),
    }
}

pub async fn get_dashboard(
    State(state): State<Arc<ServerState>>,
    Path(run_id): Path<String>,
    Query(query): Query<DashboardQuery>,
) -> ApiResult<DashboardResponse> {
    let token = query.token.unwrap_or_default();
    let run = state
        .runs
        .authorize(&run_id, &token)
        .ok_or(ApiError::Forbidden)?;

    let queue = run.queue();
    let groups: FxHashSet<GroupId> = state
        .store
        .groups_in_run(&run.run_id)
        .iter()
        .map(|g| g.group_id)
        .collect();

    let feed = state.inbox.dashboard_feed();
    let mut recent: Vec<Outbound> = feed
        .into_iter()
        .rev()
        .filter(|event| match event {
            Outbound::QueueUpdate { queue: q, .. } => q == &queue,
            other => event_group(other).is_some_and(|g| groups.contains(&g)),
        })
        .take(RECENT_EVENTS)
        .collect();
    recent.reverse();

    let metrics = state.dashboard.metrics(&run.run_id);
    let window = state.engine.timing().reconnect_grace();
    let cards = Cards {
        connected: state.presence.connected(&run.run_id, window),
        in_queue: state.engine.queue_size(&queue),
        active_games: state.store.count_by_status(&run.run_id, Status::Active),
        completed: state.store.count_by_status(&run.run_id, Status::Complete),
        abandoned: state.store.count_by_status(&run.run_id, Status::Abandoned),
        auto_moves: metrics.auto_moves,
    };
    let group_benchmark = state
        .engine
        .registry()
        .get(&run.variant)
        .map(|v| v.group_benchmark())
        .unwrap_or(0);

    Ok(Json(DashboardResponse {
        run_id: run.run_id,
        variant: run.variant,
        cards,
        group_benchmark,
        average_total: metrics.average_total(),
        metrics,
        recent,
    }))
}
