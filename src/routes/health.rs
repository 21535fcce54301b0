//! Liveness and version endpoints
//!
//! - /health, /healthz - 200 while the process is serving
//! - /version          - Build stamp for deployment checks

use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::routes::common::{json_response, BoxBody};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub status: &'static str,
    pub version: &'static str,
    /// Seconds since startup
    pub uptime: u64,
    /// Where state is persisted: "mongodb" or "memory"
    pub journal: &'static str,
    pub broker: &'static str,
    pub entities: usize,
    pub pending_tickets: usize,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct VersionInfo {
    pub version: &'static str,
    pub git_commit: &'static str,
    pub build_time: &'static str,
}

pub fn health_check(state: Arc<AppState>) -> Response<BoxBody> {
    let gk = &state.gatekeeper;
    let response = HealthResponse {
        healthy: true,
        status: "online",
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        journal: gk.journal_name(),
        broker: gk.broker().name(),
        entities: gk.registry().len(),
        pending_tickets: gk.tickets().pending_count(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    json_response(StatusCode::OK, &response)
}

pub fn version_info() -> Response<BoxBody> {
    json_response(
        StatusCode::OK,
        &VersionInfo {
            version: env!("CARGO_PKG_VERSION"),
            git_commit: env!("GIT_COMMIT_SHORT"),
            build_time: env!("BUILD_TIMESTAMP"),
        },
    )
}
