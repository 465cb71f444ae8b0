//! 시작 시 히스토리 백필.
//!
//! 라이브 틱과 같은 확률 규칙을 지연 없이 돌려 과거 캔들을 합성합니다.
//! 캔들 하나는 `steps_per_candle`개의 하위 스텝으로 만들어지며, 각 스텝의 `dt`는
//! 캔들 하나에 해당하는 라이브 틱 수를 스텝 수로 나눈 값입니다.

use chrono::{DateTime, Utc};
use marketsim_core::{Candle, SimulatorConfig, SymbolState};

use crate::candles::CandleSeries;
use crate::engine::StochasticEngine;
use crate::scenarios::ScenarioEntry;

/// 백필 계획.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackfillPlan {
    /// 생성할 캔들 수
    pub candles: usize,
    /// 캔들당 하위 스텝 수
    pub steps_per_candle: u32,
    /// 캔들 하나에 해당하는 라이브 틱 수
    pub ticks_per_candle: f64,
}

impl BackfillPlan {
    pub fn from_config(config: &SimulatorConfig) -> Self {
        Self {
            candles: config.backfill_candles(),
            steps_per_candle: config.backfill_steps_per_candle.max(1),
            ticks_per_candle: config.ticks_per_candle(),
        }
    }

    fn step_dt(&self) -> f64 {
        self.ticks_per_candle / f64::from(self.steps_per_candle)
    }
}

/// 히스토리를 합성해 `series`에 채우고 `state`를 마지막 종가에 맞춥니다.
///
/// 생성된 마감 캔들 수를 반환합니다.
pub fn backfill(
    engine: &mut StochasticEngine,
    state: &mut SymbolState,
    series: &mut CandleSeries,
    entry: &ScenarioEntry,
    plan: &BackfillPlan,
    now: DateTime<Utc>,
) -> usize {
    let width = series.width();
    let current_bucket = series.bucket_start(now);
    let first_bucket = current_bucket - width * plan.candles as i32;
    let dt = plan.step_dt();

    let mut price = state.price;
    let mut reference = None;

    for i in 0..plan.candles {
        let open_time = first_bucket + width * i as i32;
        let mut candle = Candle::open_at(open_time, price);
        reference.get_or_insert(price);

        for _ in 0..plan.steps_per_candle {
            let step = engine.step_price(&state.symbol, price, &entry.scenario, entry.formula(), dt);
            let quantity = engine.draw_volume(dt);
            candle.apply(step.price, quantity);
            price = step.price;
        }

        series.push_closed(candle);
    }

    state.reference_price = reference.unwrap_or(state.price);
    state.price = price;
    state.previous_price = price;
    state.reset_window();
    state.last_update = now;
    series.open_empty(now, price);

    plan.candles
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use marketsim_core::{EngineTuning, Scenario};

    fn plan(candles: usize) -> BackfillPlan {
        BackfillPlan {
            candles,
            steps_per_candle: 12,
            ticks_per_candle: 600.0,
        }
    }

    #[test]
    fn test_backfill_fills_series() {
        let mut engine = StochasticEngine::new(EngineTuning::default(), Some(11));
        let now = Utc::now();
        let mut state = SymbolState::new("BTCUSDT", 45_000.0, now);
        let mut series = CandleSeries::new(60, 2_000);
        let entry = ScenarioEntry::compile(Scenario::default()).unwrap();

        let produced = backfill(&mut engine, &mut state, &mut series, &entry, &plan(1_440), now);

        assert_eq!(produced, 1_440);
        assert_eq!(series.len(), 1_440);
        assert!(series.closed().all(|c| c.is_consistent() && c.trade_count == 12));

        // 상태는 마지막 종가와 일치
        let last = series.closed().last().unwrap();
        assert_eq!(state.price, last.close);
        assert_eq!(state.high, state.price);
        assert_eq!(state.low, state.price);
        assert_eq!(series.open_candle().unwrap().open, last.close);
        assert_eq!(series.open_candle().unwrap().trade_count, 0);

        // 기준가는 첫 캔들 시가
        assert_eq!(state.reference_price, 45_000.0);
    }

    #[test]
    fn test_backfill_buckets_are_contiguous() {
        let mut engine = StochasticEngine::new(EngineTuning::default(), Some(5));
        let now = Utc::now();
        let mut state = SymbolState::new("ETHUSDT", 2_500.0, now);
        let mut series = CandleSeries::new(60, 100);
        let entry = ScenarioEntry::compile(Scenario::default()).unwrap();

        backfill(&mut engine, &mut state, &mut series, &entry, &plan(30), now);

        let times: Vec<_> = series.closed().map(|c| c.open_time).collect();
        for pair in times.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::seconds(60));
        }
        let open = series.open_candle().unwrap();
        assert_eq!(open.open_time - *times.last().unwrap(), Duration::seconds(60));
        assert!(open.open_time <= now);
    }
}
