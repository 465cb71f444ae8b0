//! 헬스 체크 endpoint.

use std::sync::Arc;

use axum::{extract::State, Json};
use marketsim_engine::SchedulerState;
use serde::Serialize;

use crate::state::AppState;

/// 헬스 체크 응답 구조체.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// 서비스 상태 ("healthy")
    pub status: String,
    /// API 버전
    pub version: String,
    /// 서버 업타임(초)
    pub uptime_secs: u64,
    /// 현재 시간 (ISO 8601)
    pub timestamp: String,
    /// 스케줄러 상태
    pub scheduler: SchedulerState,
    /// 추적 중인 심볼 수
    pub symbols: usize,
    /// WebSocket 연결 수
    pub connections: usize,
}

/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let symbols = state.simulator.read().await.symbol_count();
    let connections = state.subscriptions.connection_count().await;

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime_secs: state.uptime_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        scheduler: state.scheduler.state(),
        symbols,
        connections,
    })
}
