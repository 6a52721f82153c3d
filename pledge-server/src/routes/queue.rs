//! Queue endpoints

use crate::error::{ApiError, ApiResult};
use crate::state::ServerState;
use axum::{extract::State, Json};
use pledge_core::{GroupId, ParticipantId, QueueKey};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Longest accepted participant id
const MAX_PARTICIPANT_ID: usize = 64;

pub(crate) fn parse_participant(raw: &str) -> Result<ParticipantId, ApiError> {
    let id = raw.trim();
    if id.is_empty() || id.len() > MAX_PARTICIPANT_ID {
        return Err(ApiError::BadRequest(format!("invalid participant id: {:?}", raw)));
    }
    Ok(ParticipantId::from(id))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub participant_id: String,
    pub run_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub queue: QueueKey,
    pub queue_size: usize,
    /// The joiner's group, if joining completed one
    pub group_id: Option<GroupId>,
}

pub async fn join_queue(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<JoinRequest>,
) -> ApiResult<JoinResponse> {
    let participant = parse_participant(&req.participant_id)?;
    let run = state
        .runs
        .get(&req.run_id)
        .ok_or_else(|| ApiError::NotFound(format!("unknown run: {}", req.run_id)))?;
    state.presence.touch(&participant, Some(&run.run_id));

    let queue = run.queue();
    let outcome = state.engine.join(&queue, participant.clone())?;
    Ok(Json(JoinResponse {
        queue,
        queue_size: outcome.queue_size,
        group_id: state.engine.group_of(&participant),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRequest {
    pub participant_id: String,
}

#[derive(Serialize)]
pub struct LeaveResponse {
    pub left: Option<QueueKey>,
}

pub async fn leave_queue(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<LeaveRequest>,
) -> ApiResult<LeaveResponse> {
    let participant = parse_participant(&req.participant_id)?;
    state.presence.touch(&participant, None);
    Ok(Json(LeaveResponse {
        left: state.engine.leave_queue(&participant),
    }))
}
