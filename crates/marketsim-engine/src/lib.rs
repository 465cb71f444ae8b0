//! # Marketsim Engine
//!
//! 시장 시뮬레이터의 가격 생성 엔진입니다.
//!
//! - [`formula`]: 사용자 수식 샌드박스 (파싱, 검증, 평가)
//! - [`engine`]: 확률적 가격 스텝 (트렌드, 평균 회귀, 하우스 엣지)
//! - [`candles`], [`backfill`]: 캔들 집계 및 히스토리 백필
//! - [`scheduler`]: 고정 간격 틱 드라이버
//! - [`monitor`]: 브로드캐스트 지연/메시지 크기 통계

pub mod backfill;
pub mod candles;
pub mod engine;
pub mod formula;
pub mod monitor;
pub mod orderbook;
pub mod random;
pub mod scenarios;
pub mod scheduler;
pub mod simulator;

pub use backfill::{backfill, BackfillPlan};
pub use candles::{CandleAggregator, CandleHistory, CandleSeries};
pub use engine::{PriceStep, StepSource, StochasticEngine};
pub use formula::{CompiledFormula, EvalError, FormulaContext, FormulaError};
pub use monitor::{PerformanceMonitor, PerformanceStats, SeriesStats, SharedMonitor};
pub use orderbook::synthesize_order_book;
pub use scenarios::{ScenarioBook, ScenarioEntry};
pub use scheduler::{
    SchedulerState, SchedulerStatus, SharedScenarioBook, TickListener, TickReport, TickScheduler,
};
pub use simulator::{MarketSimulator, MarketSnapshot, SharedSimulator, TickOutput};
