//! 시뮬레이터 제어 endpoint.
//!
//! - `POST /api/v1/simulator/start` - 스케줄러 시작 (멱등)
//! - `POST /api/v1/simulator/stop` - 스케줄러 정지 (멱등)
//! - `GET /api/v1/simulator/status` - 상태 조회

use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use marketsim_engine::SchedulerStatus;
use serde::Serialize;

use crate::error::{sim_error, ApiResult};
use crate::state::AppState;

/// 시뮬레이터 상태 응답.
#[derive(Debug, Serialize)]
pub struct SimulatorStatusResponse {
    #[serde(flatten)]
    pub scheduler: SchedulerStatus,
    pub symbols: Vec<String>,
    pub connections: usize,
    pub formula_fallbacks: u64,
}

/// 시작/정지 응답.
#[derive(Debug, Serialize)]
pub struct ControlResponse {
    /// 이번 호출로 상태가 바뀌었는지 여부
    pub changed: bool,
    pub status: SimulatorStatusResponse,
}

pub fn simulator_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/start", post(start_simulator))
        .route("/stop", post(stop_simulator))
        .route("/status", get(simulator_status))
}

/// POST /api/v1/simulator/start
pub async fn start_simulator(State(state): State<Arc<AppState>>) -> ApiResult<Json<ControlResponse>> {
    let changed = state
        .scheduler
        .start(state.tick_interval())
        .await
        .map_err(sim_error)?;
    Ok(Json(ControlResponse {
        changed,
        status: status_of(&state).await,
    }))
}

/// POST /api/v1/simulator/stop
pub async fn stop_simulator(State(state): State<Arc<AppState>>) -> Json<ControlResponse> {
    let changed = state.scheduler.stop().await;
    Json(ControlResponse {
        changed,
        status: status_of(&state).await,
    })
}

/// GET /api/v1/simulator/status
pub async fn simulator_status(State(state): State<Arc<AppState>>) -> Json<SimulatorStatusResponse> {
    Json(status_of(&state).await)
}

async fn status_of(state: &AppState) -> SimulatorStatusResponse {
    let (symbols, formula_fallbacks) = {
        let sim = state.simulator.read().await;
        (sim.symbols(), sim.formula_fallbacks())
    };
    SimulatorStatusResponse {
        scheduler: state.scheduler.status(),
        symbols,
        connections: state.subscriptions.connection_count().await,
        formula_fallbacks,
    }
}
