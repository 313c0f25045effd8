use axum::{Json, extract::Extension, http::StatusCode};
use std::sync::Arc;

use super::protocol::{LeaderInfoResponse, LeaseAck, LeaseRenewal};
use super::service::LeaderElector;

pub async fn handle_leader_info(
    Extension(elector): Extension<Arc<LeaderElector>>,
) -> (StatusCode, Json<LeaderInfoResponse>) {
    if !elector.is_ready() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(LeaderInfoResponse::unavailable()),
        );
    }
    (StatusCode::OK, Json(elector.leader_info()))
}

pub async fn handle_lease(
    Extension(elector): Extension<Arc<LeaderElector>>,
    Json(renewal): Json<LeaseRenewal>,
) -> (StatusCode, Json<LeaseAck>) {
    (StatusCode::OK, Json(elector.observe_lease(renewal)))
}
