//! Move submission and group view endpoints

use crate::error::{ApiError, ApiResult};
use crate::routes::queue::parse_participant;
use crate::state::ServerState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use pledge_core::{EngineError, GroupId, MemberScore, RoundResult, Status, VariantId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    pub participant_id: String,
    pub group_id: u64,
    pub round: u32,
    pub choice: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveResponse {
    pub accepted: bool,
    pub round: u32,
    /// Own view of the result when this move completed the round
    pub resolved: Option<RoundResult>,
}

pub async fn submit_move(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<MoveRequest>,
) -> ApiResult<MoveResponse> {
    let participant = parse_participant(&req.participant_id)?;
    state.presence.touch(&participant, None);

    let outcome =
        state
            .engine
            .submit_move(GroupId(req.group_id), &participant, req.round, &req.choice)?;
    Ok(Json(MoveResponse {
        accepted: true,
        round: outcome.round,
        resolved: outcome.resolved.map(|r| r.redacted_for(&participant)),
    }))
}

#[derive(Deserialize)]
pub struct GroupQuery {
    pub participant: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
    pub group_id: GroupId,
    pub variant: VariantId,
    pub status: Status,
    pub current_round: u32,
    pub round_count: u32,
    pub member_count: usize,
    pub your_total: Option<i64>,
    /// Per-member lines are limited to the caller's own
    pub results: Vec<RoundResult>,
    /// Only once the group has ended
    pub final_scores: Option<Vec<MemberScore>>,
    pub abandon_reason: Option<String>,
}

pub async fn get_group(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<u64>,
    Query(query): Query<GroupQuery>,
) -> ApiResult<GroupView> {
    let group_id = GroupId(id);
    let snapshot = state
        .store
        .group(group_id)
        .ok_or(EngineError::UnknownGroup(group_id))?;

    let viewer = match query.participant.as_deref() {
        Some(raw) => {
            let participant = parse_participant(raw)?;
            if !snapshot.members.contains(&participant) {
                return Err(ApiError::from(EngineError::NotAMember {
                    group: group_id,
                    participant,
                }));
            }
            state.presence.touch(&participant, Some(&snapshot.queue.run));
            Some(participant)
        }
        None => None,
    };

    let results = state
        .store
        .results(group_id)
        .into_iter()
        .map(|r| match &viewer {
            Some(p) => r.redacted_for(p),
            None => r.anonymized(),
        })
        .collect();
    let your_total = viewer.as_ref().and_then(|p| {
        snapshot
            .scores
            .iter()
            .find(|s| &s.participant_id == p)
            .map(|s| s.total)
    });

    Ok(Json(GroupView {
        group_id,
        variant: snapshot.variant,
        status: snapshot.status,
        current_round: snapshot.current_round,
        round_count: snapshot.round_count,
        member_count: snapshot.members.len(),
        your_total,
        results,
        final_scores: (snapshot.status != Status::Active).then_some(snapshot.scores),
        abandon_reason: snapshot.abandon_reason,
    }))
}
