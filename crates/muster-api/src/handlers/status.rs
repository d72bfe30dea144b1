//! /api/status handler.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use muster_services::{RecordSummary, RegistrationStatus};

use super::ApiState;

#[derive(Serialize)]
pub struct StatusResponse {
    pub active: usize,
    pub pending: usize,
    pub servers: Vec<RecordSummary>,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let servers = state.registry.records();
    let count = |status: RegistrationStatus| servers.iter().filter(|s| s.status == status).count();
    let active = count(RegistrationStatus::Active);
    let pending = count(RegistrationStatus::Pending);

    Json(StatusResponse {
        active,
        pending,
        servers,
    })
}
