use axum::{Json, extract::Extension, http::StatusCode};
use std::sync::Arc;

use super::manager::{Applied, ReplicationManager};
use super::protocol::{ReplicateRequest, ReplicateResponse};

pub async fn handle_replicate(
    Extension(manager): Extension<Arc<ReplicationManager>>,
    Json(req): Json<ReplicateRequest>,
) -> (StatusCode, Json<ReplicateResponse>) {
    let op_id = req.op_id;
    match manager.apply(req) {
        Ok(Applied::Rejected(reason)) => {
            tracing::error!("Rejected replicated operation {}: {}", op_id, reason);
            (
                StatusCode::BAD_REQUEST,
                Json(ReplicateResponse {
                    success: false,
                    message: reason,
                }),
            )
        }
        Ok(applied) => (
            StatusCode::OK,
            Json(ReplicateResponse {
                success: true,
                message: applied.describe(),
            }),
        ),
        Err(e) => {
            tracing::error!("Failed to apply replicated operation {}: {}", op_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ReplicateResponse {
                    success: false,
                    message: format!("Local persistence failure: {}", e),
                }),
            )
        }
    }
}
