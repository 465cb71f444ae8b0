//! 성능 모니터 조회 endpoint.
//!
//! - `GET /api/v1/metrics/performance` - 브로드캐스트 지연, 메시지 크기, 틱 간격 통계
//! - `POST /api/v1/metrics/performance/reset` - 샘플 초기화 (새 측정 구간 시작)

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use marketsim_engine::PerformanceStats;
use serde::Serialize;
use tracing::info;

use crate::state::AppState;

/// 성능 통계 응답.
#[derive(Debug, Serialize)]
pub struct PerformanceResponse {
    #[serde(flatten)]
    pub stats: PerformanceStats,
    /// 설정된 틱 간격 (밀리초)
    pub configured_interval_ms: u64,
    pub connections: usize,
}

pub fn performance_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/performance", get(get_performance))
        .route("/performance/reset", post(reset_performance))
}

/// GET /api/v1/metrics/performance
pub async fn get_performance(State(state): State<Arc<AppState>>) -> Json<PerformanceResponse> {
    Json(PerformanceResponse {
        stats: state.monitor.snapshot(),
        configured_interval_ms: state.config.simulator.tick_interval_ms,
        connections: state.subscriptions.connection_count().await,
    })
}

/// POST /api/v1/metrics/performance/reset
pub async fn reset_performance(State(state): State<Arc<AppState>>) -> StatusCode {
    state.monitor.reset();
    info!("성능 샘플 초기화");
    StatusCode::NO_CONTENT
}
