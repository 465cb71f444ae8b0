//! 심볼 추가 endpoint.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{sim_error, validation_error, ApiResult};
use crate::state::AppState;

/// 심볼 추가 요청.
#[derive(Debug, Deserialize, Validate)]
pub struct AddSymbolRequest {
    #[validate(length(min = 1, max = 20, message = "심볼은 1-20자여야 합니다"))]
    pub symbol: String,

    #[validate(range(exclusive_min = 0.0, message = "initial_price는 양수여야 합니다"))]
    pub initial_price: f64,
}

/// 심볼 추가 응답.
#[derive(Debug, Serialize, Deserialize)]
pub struct AddSymbolResponse {
    pub symbol: String,
    pub initial_price: f64,
    /// 백필된 캔들 수
    pub candles: usize,
}

/// POST /api/v1/symbols
///
/// 심볼을 추가하고 즉시 히스토리를 백필합니다. 다음 틱부터 스트리밍됩니다.
pub async fn add_symbol(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AddSymbolRequest>,
) -> ApiResult<(StatusCode, Json<AddSymbolResponse>)> {
    if let Err(errors) = request.validate() {
        return Err(validation_error(&errors));
    }

    let book = state.scenarios.read().await;
    let mut sim = state.simulator.write().await;
    let candles = sim
        .add_symbol(
            &request.symbol,
            request.initial_price,
            book.get(&request.symbol),
            Utc::now(),
        )
        .map_err(sim_error)?;

    Ok((
        StatusCode::CREATED,
        Json(AddSymbolResponse {
            symbol: marketsim_core::normalize_symbol(&request.symbol),
            initial_price: request.initial_price,
            candles,
        }),
    ))
}
