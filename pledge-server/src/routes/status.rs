//! Status endpoint

use crate::state::ServerState;
use axum::{extract::State, Json};
use pledge_engine::GroupCounts;
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub engine: &'static str,
    pub groups: GroupCounts,
    pub runs: usize,
    pub armed_deadlines: usize,
}

pub async fn status_handler(State(state): State<Arc<ServerState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        engine: "rust",
        groups: state.engine.counts(),
        runs: state.runs.len(),
        armed_deadlines: state.engine.scheduler().armed_count(),
    })
}
