//! REST API 라우트.

pub mod health;
pub mod market;
pub mod performance;
pub mod scenarios;
pub mod simulator;
pub mod symbols;

pub use health::{health_check, HealthResponse};
pub use market::{market_router, CandlesResponse, SnapshotListResponse};
pub use performance::{performance_router, PerformanceResponse};
pub use scenarios::{scenarios_router, ScenarioRequest, ScenarioResponse};
pub use simulator::{simulator_router, ControlResponse, SimulatorStatusResponse};
pub use symbols::{add_symbol, AddSymbolRequest, AddSymbolResponse};

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::state::AppState;

pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/symbols", post(add_symbol))
        .nest("/api/v1/market", market_router())
        .nest("/api/v1/scenarios", scenarios_router())
        .nest("/api/v1/simulator", simulator_router())
        .nest("/api/v1/metrics", performance_router())
}
