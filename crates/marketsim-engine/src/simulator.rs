//! 시장 시뮬레이터.
//!
//! 심볼 상태, 캔들 집계기, 최근 체결 링을 함께 소유하며 스케줄러가 틱마다 호출합니다.
//! 프로세스 시작 시 한 번 생성되어 [`SharedSimulator`] 핸들로 전달됩니다.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use marketsim_core::{
    normalize_symbol, Candle, EngineTuning, OrderBook, PriceTick, Scenario, SimError, SimResult,
    SimulatorConfig, SymbolState, Trade,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::backfill::{backfill, BackfillPlan};
use crate::candles::{CandleAggregator, CandleHistory};
use crate::engine::StochasticEngine;
use crate::orderbook::synthesize_order_book;
use crate::scenarios::ScenarioEntry;

/// 공유 가능한 시뮬레이터 타입.
pub type SharedSimulator = Arc<RwLock<MarketSimulator>>;

/// 한 심볼의 한 틱 결과.
#[derive(Debug, Clone)]
pub struct TickOutput {
    pub trade: Trade,
    pub price: PriceTick,
    pub closed_candle: Option<Candle>,
}

/// 초기 화면 표시용 스냅샷.
#[derive(Debug, Clone, Serialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub state: SymbolState,
    pub open_candle: Option<Candle>,
    /// 최신순
    pub recent_trades: Vec<Trade>,
    pub order_book: OrderBook,
    pub scenario: Scenario,
}

/// 시장 시뮬레이터.
pub struct MarketSimulator {
    engine: StochasticEngine,
    aggregator: CandleAggregator,
    states: BTreeMap<String, SymbolState>,
    trades: BTreeMap<String, VecDeque<Trade>>,
    plan: BackfillPlan,
    recent_capacity: usize,
}

impl MarketSimulator {
    pub fn new(config: &SimulatorConfig, tuning: EngineTuning) -> Self {
        Self {
            engine: StochasticEngine::new(tuning, config.seed),
            aggregator: CandleAggregator::new(config.candle_width_secs, config.max_candles),
            states: BTreeMap::new(),
            trades: BTreeMap::new(),
            plan: BackfillPlan::from_config(config),
            recent_capacity: config.recent_trades.max(1),
        }
    }

    /// 공유 핸들로 감쌉니다.
    pub fn into_shared(self) -> SharedSimulator {
        Arc::new(RwLock::new(self))
    }

    /// 심볼을 추가하고 히스토리를 백필합니다.
    ///
    /// 생성된 캔들 수를 반환합니다.
    pub fn add_symbol(
        &mut self,
        symbol: &str,
        initial_price: f64,
        entry: &ScenarioEntry,
        now: DateTime<Utc>,
    ) -> SimResult<usize> {
        let key = normalize_symbol(symbol);
        if key.is_empty() {
            return Err(SimError::Validation("심볼이 비어 있습니다".into()));
        }
        if !initial_price.is_finite() || initial_price <= 0.0 {
            return Err(SimError::Validation(format!(
                "{key}: initial_price는 양수여야 합니다"
            )));
        }
        if self.states.contains_key(&key) {
            return Err(SimError::DuplicateSymbol(key));
        }

        let mut state = SymbolState::new(key.clone(), initial_price, now);
        let series = self.aggregator.series_mut(&key);
        let produced = backfill(&mut self.engine, &mut state, series, entry, &self.plan, now);

        info!(
            symbol = %key,
            candles = produced,
            price = state.price,
            "심볼 추가 및 히스토리 백필 완료"
        );

        self.states.insert(key.clone(), state);
        self.trades
            .insert(key, VecDeque::with_capacity(self.recent_capacity));
        Ok(produced)
    }

    /// 한 심볼을 한 틱 전진시킵니다.
    pub fn tick_symbol(
        &mut self,
        symbol: &str,
        entry: &ScenarioEntry,
        dt: f64,
        now: DateTime<Utc>,
    ) -> SimResult<TickOutput> {
        let state = self
            .states
            .get_mut(symbol)
            .ok_or_else(|| SimError::UnknownSymbol(symbol.to_string()))?;

        let trade = self
            .engine
            .advance(state, &entry.scenario, entry.formula(), dt, now);
        let closed_candle = self.aggregator.roll(symbol, &trade, now);
        if closed_candle.is_some() {
            // 새 캔들 구간: 고가/저가를 새 캔들 기준으로
            state.reset_window();
            state.volume = trade.quantity;
        }

        if let Some(ring) = self.trades.get_mut(symbol) {
            while ring.len() >= self.recent_capacity {
                ring.pop_front();
            }
            ring.push_back(trade.clone());
        }

        Ok(TickOutput {
            price: state.to_tick(),
            trade,
            closed_candle,
        })
    }

    /// 추적 중인 심볼 목록 (정렬됨).
    pub fn symbols(&self) -> Vec<String> {
        self.states.keys().cloned().collect()
    }

    pub fn symbol_count(&self) -> usize {
        self.states.len()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.states.contains_key(&normalize_symbol(symbol))
    }

    pub fn state(&self, symbol: &str) -> Option<&SymbolState> {
        self.states.get(&normalize_symbol(symbol))
    }

    /// 캔들 히스토리. 마감 캔들은 오래된 순.
    pub fn candles(&self, symbol: &str, limit: usize) -> Option<CandleHistory> {
        self.aggregator
            .series(&normalize_symbol(symbol))
            .map(|series| series.history(limit))
    }

    /// 마감 캔들 개수.
    pub fn candle_count(&self, symbol: &str) -> usize {
        self.aggregator
            .series(&normalize_symbol(symbol))
            .map(|series| series.len())
            .unwrap_or(0)
    }

    /// 최근 체결 (최신순).
    pub fn recent_trades(&self, symbol: &str, limit: usize) -> Vec<Trade> {
        self.trades
            .get(&normalize_symbol(symbol))
            .map(|ring| ring.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn formula_fallbacks(&self) -> u64 {
        self.engine.formula_fallbacks()
    }

    /// 한 심볼의 스냅샷.
    pub fn snapshot(
        &self,
        symbol: &str,
        scenario: &Scenario,
        trades_limit: usize,
    ) -> Option<MarketSnapshot> {
        let key = normalize_symbol(symbol);
        let state = self.states.get(&key)?;
        let open_candle = self
            .aggregator
            .series(&key)
            .and_then(|series| series.open_candle().cloned());

        Some(MarketSnapshot {
            symbol: key.clone(),
            price: state.price,
            change: state.change(),
            change_percent: state.change_percent(),
            state: state.clone(),
            open_candle,
            recent_trades: self.recent_trades(&key, trades_limit),
            order_book: synthesize_order_book(
                &key,
                state.price,
                scenario.spread_bps,
                scenario.depth,
                state.last_update,
            ),
            scenario: scenario.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn small_config() -> SimulatorConfig {
        SimulatorConfig {
            history_hours: 1,
            max_candles: 100,
            recent_trades: 5,
            seed: Some(9),
            ..Default::default()
        }
    }

    fn default_entry() -> ScenarioEntry {
        ScenarioEntry::compile(Scenario::default()).unwrap()
    }

    #[test]
    fn test_add_symbol_backfills() {
        let mut sim = MarketSimulator::new(&small_config(), EngineTuning::default());
        let produced = sim
            .add_symbol("btcusdt", 45_000.0, &default_entry(), Utc::now())
            .unwrap();
        assert_eq!(produced, 60);
        assert_eq!(sim.candle_count("BTCUSDT"), 60);
        assert!(sim.contains("BTCUSDT"));
    }

    #[test]
    fn test_duplicate_symbol_rejected() {
        let mut sim = MarketSimulator::new(&small_config(), EngineTuning::default());
        let now = Utc::now();
        sim.add_symbol("BTCUSDT", 1.0, &default_entry(), now).unwrap();
        assert!(matches!(
            sim.add_symbol("btcusdt", 1.0, &default_entry(), now),
            Err(SimError::DuplicateSymbol(_))
        ));
        assert!(matches!(
            sim.add_symbol("ETHUSDT", -1.0, &default_entry(), now),
            Err(SimError::Validation(_))
        ));
    }

    #[test]
    fn test_tick_updates_state_candle_and_ring() {
        let mut sim = MarketSimulator::new(&small_config(), EngineTuning::default());
        let now = Utc::now();
        sim.add_symbol("ETHUSDT", 2_500.0, &default_entry(), now).unwrap();

        for _ in 0..8 {
            sim.tick_symbol("ETHUSDT", &default_entry(), 1.0, now).unwrap();
        }

        let state = sim.state("ETHUSDT").unwrap();
        assert_eq!(state.sequence, 8);
        let trades = sim.recent_trades("ETHUSDT", 10);
        assert_eq!(trades.len(), 5);
        assert_eq!(trades[0].price, state.price);

        let history = sim.candles("ETHUSDT", 10).unwrap();
        assert_eq!(history.closed.len(), 10);
        assert_eq!(history.open.unwrap().trade_count, 8);
    }

    #[test]
    fn test_bucket_crossing_resets_window() {
        let mut sim = MarketSimulator::new(&small_config(), EngineTuning::default());
        let now = Utc::now();
        sim.add_symbol("SOLUSDT", 100.0, &default_entry(), now).unwrap();
        sim.tick_symbol("SOLUSDT", &default_entry(), 1.0, now).unwrap();

        let later = now + Duration::seconds(61);
        let output = sim
            .tick_symbol("SOLUSDT", &default_entry(), 1.0, later)
            .unwrap();
        assert!(output.closed_candle.is_some());
        assert_eq!(sim.candle_count("SOLUSDT"), 61);

        let state = sim.state("SOLUSDT").unwrap();
        assert_eq!(state.high, state.price);
        assert_eq!(state.low, state.price);
    }

    #[test]
    fn test_unknown_symbol() {
        let mut sim = MarketSimulator::new(&small_config(), EngineTuning::default());
        assert!(matches!(
            sim.tick_symbol("NOPE", &default_entry(), 1.0, Utc::now()),
            Err(SimError::UnknownSymbol(_))
        ));
        assert!(sim.snapshot("NOPE", &Scenario::default(), 10).is_none());
    }

    #[test]
    fn test_snapshot() {
        let mut sim = MarketSimulator::new(&small_config(), EngineTuning::default());
        let now = Utc::now();
        sim.add_symbol("BTCUSDT", 45_000.0, &default_entry(), now).unwrap();
        sim.tick_symbol("BTCUSDT", &default_entry(), 1.0, now).unwrap();

        let scenario = Scenario {
            depth: 4,
            ..Default::default()
        };
        let snapshot = sim.snapshot("btcusdt", &scenario, 10).unwrap();
        assert_eq!(snapshot.symbol, "BTCUSDT");
        assert_eq!(snapshot.recent_trades.len(), 1);
        assert_eq!(snapshot.order_book.asks.len(), 4);
        assert!(snapshot.open_candle.is_some());
        assert!(snapshot.price > 0.0);
    }
}
