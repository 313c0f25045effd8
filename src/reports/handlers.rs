use axum::{
    Json,
    extract::{Extension, Query},
    http::StatusCode,
};
use std::sync::Arc;

use super::protocol::{
    ListRiskReportsQuery, ListRiskReportsResponse, SendRiskReportRequest, SendRiskReportResponse,
};
use super::service::{ReportService, SubmitOutcome};

pub async fn handle_send_report(
    Extension(reports): Extension<Arc<ReportService>>,
    Json(req): Json<SendRiskReportRequest>,
) -> (StatusCode, Json<SendRiskReportResponse>) {
    let (status, success, message, leader_address) = match reports.submit(req) {
        SubmitOutcome::Accepted { duplicate, .. } => {
            let message = if duplicate {
                "Risk report already stored"
            } else {
                "Risk report received and stored successfully"
            };
            (StatusCode::OK, true, message.to_string(), None)
        }
        SubmitOutcome::NotLeader { leader } => (
            StatusCode::MISDIRECTED_REQUEST,
            false,
            "Not leader. Please contact the leader.".to_string(),
            (!leader.is_placeholder()).then_some(leader),
        ),
        SubmitOutcome::Invalid(reason) => {
            tracing::error!("Rejected risk report: {}", reason);
            (StatusCode::BAD_REQUEST, false, reason, None)
        }
        SubmitOutcome::Failed(reason) => (StatusCode::INTERNAL_SERVER_ERROR, false, reason, None),
    };

    (
        status,
        Json(SendRiskReportResponse {
            success,
            message,
            alert_sent: false,
            leader_address,
        }),
    )
}

pub async fn handle_list_reports(
    Extension(reports): Extension<Arc<ReportService>>,
    Query(query): Query<ListRiskReportsQuery>,
) -> (StatusCode, Json<ListRiskReportsResponse>) {
    if !reports.elector().is_ready() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ListRiskReportsResponse {
                success: false,
                reports: Vec::new(),
            }),
        );
    }

    match reports.list(&query.patient_id, query.count) {
        Ok(lines) => (
            StatusCode::OK,
            Json(ListRiskReportsResponse {
                success: true,
                reports: lines,
            }),
        ),
        Err(e) => {
            tracing::error!("Error listing risk reports: {:#}", e);
            let status = if query.patient_id.trim().is_empty() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (
                status,
                Json(ListRiskReportsResponse {
                    success: false,
                    reports: Vec::new(),
                }),
            )
        }
    }
}
