//! 시장 데이터 조회 endpoint.
//!
//! 클라이언트가 실시간 업데이트를 받기 전 초기 화면을 그리는 데 사용합니다.
//!
//! - `GET /api/v1/market/snapshot` - 전체 심볼 스냅샷
//! - `GET /api/v1/market/snapshot/{symbol}` - 단일 심볼 스냅샷
//! - `GET /api/v1/market/candles/{symbol}?limit=N` - 캔들 히스토리

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use marketsim_engine::{CandleHistory, MarketSnapshot};
use serde::{Deserialize, Serialize};

use crate::error::{not_found, ApiResult};
use crate::state::AppState;

const DEFAULT_TRADES_LIMIT: usize = 20;
const DEFAULT_CANDLES_LIMIT: usize = 500;

#[derive(Debug, Default, Deserialize)]
pub struct SnapshotQuery {
    /// 최근 체결 개수
    pub trades: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CandlesQuery {
    /// 마감 캔들 개수
    pub limit: Option<usize>,
}

/// 전체 스냅샷 응답.
#[derive(Debug, Serialize)]
pub struct SnapshotListResponse {
    pub symbols: Vec<MarketSnapshot>,
    pub total: usize,
}

/// 캔들 히스토리 응답.
#[derive(Debug, Serialize)]
pub struct CandlesResponse {
    pub symbol: String,
    pub width_secs: u64,
    #[serde(flatten)]
    pub history: CandleHistory,
}

pub fn market_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/snapshot", get(list_snapshots))
        .route("/snapshot/{symbol}", get(get_snapshot))
        .route("/candles/{symbol}", get(get_candles))
}

/// GET /api/v1/market/snapshot
pub async fn list_snapshots(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SnapshotQuery>,
) -> Json<SnapshotListResponse> {
    let limit = trades_limit(&state, query.trades);
    let book = state.scenarios.read().await;
    let sim = state.simulator.read().await;

    let symbols: Vec<MarketSnapshot> = sim
        .symbols()
        .iter()
        .filter_map(|symbol| sim.snapshot(symbol, &book.get(symbol).scenario, limit))
        .collect();

    Json(SnapshotListResponse {
        total: symbols.len(),
        symbols,
    })
}

/// GET /api/v1/market/snapshot/{symbol}
pub async fn get_snapshot(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<SnapshotQuery>,
) -> ApiResult<Json<MarketSnapshot>> {
    let limit = trades_limit(&state, query.trades);
    let book = state.scenarios.read().await;
    let sim = state.simulator.read().await;

    sim.snapshot(&symbol, &book.get(&symbol).scenario, limit)
        .map(Json)
        .ok_or_else(|| not_found(format!("알 수 없는 심볼: {symbol}")))
}

/// GET /api/v1/market/candles/{symbol}
pub async fn get_candles(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<CandlesQuery>,
) -> ApiResult<Json<CandlesResponse>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_CANDLES_LIMIT)
        .min(state.config.simulator.max_candles);
    let sim = state.simulator.read().await;

    let history = sim
        .candles(&symbol, limit)
        .ok_or_else(|| not_found(format!("알 수 없는 심볼: {symbol}")))?;

    Ok(Json(CandlesResponse {
        symbol: marketsim_core::normalize_symbol(&symbol),
        width_secs: state.config.simulator.candle_width_secs,
        history,
    }))
}

fn trades_limit(state: &AppState, requested: Option<usize>) -> usize {
    requested
        .unwrap_or(DEFAULT_TRADES_LIMIT)
        .min(state.config.simulator.recent_trades)
}
