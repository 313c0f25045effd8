use axum::{Json, extract::Extension, http::StatusCode};
use std::sync::Arc;

use super::protocol::{JoinRequest, JoinResponse, SnapshotResponse};
use super::service::StateTransferService;
use crate::election::service::LeaderElector;

pub async fn handle_join(
    Extension(elector): Extension<Arc<LeaderElector>>,
    Extension(transfer): Extension<Arc<StateTransferService>>,
    Json(req): Json<JoinRequest>,
) -> (StatusCode, Json<JoinResponse>) {
    if !elector.is_ready() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(JoinResponse::failure("Node is still joining")),
        );
    }

    let response = transfer.accept_join(req.address);
    let status = if response.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(response))
}

pub async fn handle_snapshot(
    Extension(elector): Extension<Arc<LeaderElector>>,
    Extension(transfer): Extension<Arc<StateTransferService>>,
) -> (StatusCode, Json<SnapshotResponse>) {
    if !elector.is_ready() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(SnapshotResponse {
                success: false,
                reports: Vec::new(),
            }),
        );
    }

    match transfer.snapshot() {
        Ok(reports) => (
            StatusCode::OK,
            Json(SnapshotResponse {
                success: true,
                reports,
            }),
        ),
        Err(e) => {
            tracing::error!("Failed to build snapshot: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SnapshotResponse {
                    success: false,
                    reports: Vec::new(),
                }),
            )
        }
    }
}
