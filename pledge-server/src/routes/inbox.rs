//! Event polling endpoint

use crate::error::ApiResult;
use crate::routes::queue::parse_participant;
use crate::state::ServerState;
use axum::{
    extract::{Path, State},
    Json,
};
use pledge_core::{GroupId, QueueKey};
use pledge_engine::Outbound;
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub queue: QueueKey,
    pub size: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxResponse {
    pub events: Vec<Outbound>,
    /// The queue the participant waits in
    pub queue: Option<QueueStatus>,
    pub group_id: Option<GroupId>,
}

/// Drain a participant's pending events; polling also counts as presence
pub async fn poll_inbox(
    State(state): State<Arc<ServerState>>,
    Path(participant): Path<String>,
) -> ApiResult<InboxResponse> {
    let participant = parse_participant(&participant)?;
    state.presence.touch(&participant, None);

    let queue = state.engine.queue_of(&participant).map(|queue| QueueStatus {
        size: state
            .inbox
            .queue_size(&queue)
            .unwrap_or_else(|| state.engine.queue_size(&queue)),
        queue,
    });

    Ok(Json(InboxResponse {
        events: state.inbox.drain(&participant),
        queue,
        group_id: state.engine.group_of(&participant),
    }))
}
