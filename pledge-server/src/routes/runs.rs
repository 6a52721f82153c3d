//! Run creation endpoint

use crate::error::{ApiError, ApiResult};
use crate::runs::RunRejection;
use crate::state::ServerState;
use axum::{extract::State, Json};
use pledge_core::{EngineError, VariantId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DEFAULT_VARIANT: &str = "win-as-much";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRunRequest {
    pub class_code: String,
    pub variant: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRunResponse {
    pub run_id: String,
    pub variant: VariantId,
    pub dashboard_url: String,
    pub token: String,
    pub created: bool,
}

/// Open a class run and its queue
pub async fn create_run(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<CreateRunRequest>,
) -> ApiResult<CreateRunResponse> {
    let variant = VariantId::from(req.variant.as_deref().unwrap_or(DEFAULT_VARIANT));
    if !state.engine.registry().contains(&variant) {
        return Err(EngineError::UnknownVariant(variant.to_string()).into());
    }

    let (run, created) = state
        .runs
        .create(&req.class_code, variant)
        .map_err(|rejection| match rejection {
            RunRejection::InvalidClassCode => ApiError::BadRequest(format!(
                "invalid class code: {:?}",
                req.class_code
            )),
            RunRejection::VariantMismatch(existing) => ApiError::Conflict(format!(
                "class code {} already runs {}",
                req.class_code.trim().to_ascii_uppercase(),
                existing
            )),
        })?;
    state.engine.open_queue(&run.queue())?;

    if created {
        tracing::info!("Run {} created for {}", run.run_id, run.variant);
    }

    Ok(Json(CreateRunResponse {
        dashboard_url: run.dashboard_url(),
        run_id: run.run_id,
        variant: run.variant,
        token: run.token,
        created,
    }))
}
