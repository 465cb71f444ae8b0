//! 심볼별 시나리오 설정 endpoint.
//!
//! 모든 쓰기 경로는 수치 제약 검사와 수식 샌드박스 검증을 거칩니다. 거부된 수식은 저장되지
//! 않으며 응답에 거부된 구성 요소와 위치가 포함됩니다.
//!
//! - `GET /api/v1/scenarios/{symbol}` - 유효 시나리오 조회
//! - `PUT /api/v1/scenarios/{symbol}` - 전체 교체
//! - `PATCH /api/v1/scenarios/{symbol}` - 부분 교체
//! - `DELETE /api/v1/scenarios/{symbol}` - 기본 시나리오로 복귀

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use marketsim_core::{normalize_symbol, Scenario, ScenarioPatch, SimError, Trend};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use crate::error::{sim_error, validation_error, ApiResult};
use crate::state::AppState;

/// 시나리오 전체 교체 요청.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ScenarioRequest {
    #[serde(default)]
    #[validate(range(min = -0.01, max = 0.01, message = "drift는 [-0.01, 0.01] 범위여야 합니다"))]
    pub drift: f64,

    #[serde(default = "default_volatility")]
    #[validate(range(min = 0.0, max = 0.05, message = "volatility는 [0, 0.05] 범위여야 합니다"))]
    pub volatility: f64,

    #[serde(default)]
    pub trend: Trend,

    #[validate(range(exclusive_min = 0.0, message = "target_price는 양수여야 합니다"))]
    pub target_price: Option<f64>,

    #[validate(range(min = 0.0, max = 1.0, message = "house_edge는 [0, 1] 범위여야 합니다"))]
    pub house_edge: Option<f64>,

    #[serde(default)]
    pub anti_pattern: bool,

    #[validate(length(min = 1, max = 512, message = "formula는 1-512자여야 합니다"))]
    pub formula: Option<String>,

    #[serde(default = "default_spread_bps")]
    #[validate(range(min = 0.0, max = 1000.0, message = "spread_bps는 [0, 1000] 범위여야 합니다"))]
    pub spread_bps: f64,

    #[serde(default = "default_depth")]
    #[validate(range(min = 1, max = 50, message = "depth는 1-50이어야 합니다"))]
    pub depth: u32,
}

fn default_volatility() -> f64 {
    Scenario::default().volatility
}

fn default_spread_bps() -> f64 {
    Scenario::default().spread_bps
}

fn default_depth() -> u32 {
    Scenario::default().depth
}

impl From<ScenarioRequest> for Scenario {
    fn from(request: ScenarioRequest) -> Self {
        Scenario {
            drift: request.drift,
            volatility: request.volatility,
            trend: request.trend,
            target_price: request.target_price,
            house_edge: request.house_edge,
            anti_pattern: request.anti_pattern,
            formula: request.formula,
            spread_bps: request.spread_bps,
            depth: request.depth,
        }
    }
}

/// 시나리오 응답.
#[derive(Debug, Serialize)]
pub struct ScenarioResponse {
    pub symbol: String,
    pub scenario: Scenario,
    /// 심볼별 재정의 여부 (false면 기본 시나리오)
    pub is_override: bool,
}

pub fn scenarios_router() -> Router<Arc<AppState>> {
    Router::new().route(
        "/{symbol}",
        get(get_scenario)
            .put(replace_scenario)
            .patch(patch_scenario)
            .delete(reset_scenario),
    )
}

/// GET /api/v1/scenarios/{symbol}
pub async fn get_scenario(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> ApiResult<Json<ScenarioResponse>> {
    let symbol = known_symbol(&state, &symbol).await?;
    let book = state.scenarios.read().await;
    Ok(Json(ScenarioResponse {
        scenario: book.get(&symbol).scenario.clone(),
        is_override: book.has_override(&symbol),
        symbol,
    }))
}

/// PUT /api/v1/scenarios/{symbol}
pub async fn replace_scenario(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Json(request): Json<ScenarioRequest>,
) -> ApiResult<Json<ScenarioResponse>> {
    if let Err(errors) = request.validate() {
        return Err(validation_error(&errors));
    }
    let symbol = known_symbol(&state, &symbol).await?;

    let mut book = state.scenarios.write().await;
    let entry = book.set(&symbol, request.into()).map_err(sim_error)?;
    Ok(Json(ScenarioResponse {
        scenario: entry.scenario.clone(),
        is_override: true,
        symbol,
    }))
}

/// PATCH /api/v1/scenarios/{symbol}
pub async fn patch_scenario(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Json(patch): Json<ScenarioPatch>,
) -> ApiResult<Json<ScenarioResponse>> {
    if patch.is_empty() {
        return Err(sim_error(SimError::Validation(
            "변경할 필드가 없습니다".to_string(),
        )));
    }
    let symbol = known_symbol(&state, &symbol).await?;

    let mut book = state.scenarios.write().await;
    let entry = book.patch(&symbol, &patch).map_err(sim_error)?;
    Ok(Json(ScenarioResponse {
        scenario: entry.scenario.clone(),
        is_override: true,
        symbol,
    }))
}

/// DELETE /api/v1/scenarios/{symbol}
pub async fn reset_scenario(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> ApiResult<Json<ScenarioResponse>> {
    let symbol = known_symbol(&state, &symbol).await?;

    let mut book = state.scenarios.write().await;
    if book.reset(&symbol) {
        info!(symbol = %symbol, "시나리오 재정의 제거");
    }
    Ok(Json(ScenarioResponse {
        scenario: book.get(&symbol).scenario.clone(),
        is_override: false,
        symbol,
    }))
}

async fn known_symbol(state: &AppState, symbol: &str) -> ApiResult<String> {
    let key = normalize_symbol(symbol);
    if state.simulator.read().await.contains(&key) {
        Ok(key)
    } else {
        Err(sim_error(SimError::UnknownSymbol(key)))
    }
}
