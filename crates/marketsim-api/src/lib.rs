//! 시장 시뮬레이터 REST API 및 WebSocket 브로드캐스트 서버.
//!
//! # 모듈 구성
//!
//! - [`state`]: 애플리케이션 공유 상태 (AppState)
//! - [`routes`]: REST API 엔드포인트
//! - [`websocket`]: 구독 관리 및 실시간 팬아웃
//! - [`metrics`]: Prometheus 메트릭 수집
//! - [`error`]: API 에러 응답

pub mod error;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod websocket;

use std::sync::Arc;
use std::time::Duration;

use axum::{http::StatusCode, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

pub use error::{ApiErrorResponse, ApiResult};
pub use metrics::setup_metrics_recorder;
pub use routes::*;
pub use state::AppState;
pub use websocket::{
    websocket_handler, BroadcastListener, Channel, ClientMessage, ServerMessage,
    SubscriptionManager, WsError,
};

/// 전체 라우터 생성.
///
/// `metrics_handle`이 없으면 `/metrics` 엔드포인트를 등록하지 않습니다 (테스트용).
pub fn create_router(state: Arc<AppState>, metrics_handle: Option<PrometheusHandle>) -> Router {
    let timeout = Duration::from_secs(state.config.server.request_timeout_secs.max(1));

    let ws_router = Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(Arc::clone(&state));

    let mut router = Router::new()
        .merge(create_api_router().with_state(state))
        .merge(ws_router);

    if let Some(handle) = metrics_handle {
        let metrics_router = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(handle);
        router = router.merge(metrics_router);
    }

    router.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                timeout,
            ))
            .layer(cors_layer()),
    )
}

/// /metrics 엔드포인트 핸들러.
async fn metrics_handler(
    axum::extract::State(handle): axum::extract::State<PrometheusHandle>,
) -> String {
    handle.render()
}

/// CORS 레이어.
///
/// `CORS_ORIGINS` 환경변수(쉼표 구분)가 있으면 해당 origin만 허용하고,
/// 없으면 모든 origin을 허용합니다.
fn cors_layer() -> CorsLayer {
    let configured = std::env::var("CORS_ORIGINS")
        .ok()
        .filter(|origins| !origins.is_empty());

    let allow_origin = match &configured {
        Some(origins) => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();

            if origins.is_empty() {
                warn!("CORS_ORIGINS is set but contains no valid origins, allowing any");
                AllowOrigin::any()
            } else {
                info!("CORS configured with {} allowed origins", origins.len());
                AllowOrigin::list(origins)
            }
        }
        None => AllowOrigin::any(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::PATCH,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
        ])
        .max_age(Duration::from_secs(3600))
}
