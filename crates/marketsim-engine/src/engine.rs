//! 확률 상태 엔진.
//!
//! 틱마다 심볼 상태를 한 스텝 전진시키고 체결 기록을 만듭니다.
//!
//! # 가격 갱신 순서
//!
//! 1. 원시 로그 수익률 `r = (drift + 추세 편향) * dt + volatility * sqrt(dt) * Z`.
//!    수식이 설정되어 있으면 수식 결과(직전 가격의 `[1/k, k]`배로 제한)를 새 가격으로 사용
//! 2. 추세 편향: up/down이면 `trend_drift`를 드리프트에 가감 (수식 경로에는 적용하지 않음)
//! 3. 평균 회귀: 목표가가 있으면 `min(κ·dt, 1) · (target - price) / price`를 더함 (수식 경로 제외)
//! 4. 하우스 엣지와 안티 패턴: 1~3단계가 끝난 최종 수익률에만 적용
//! 5. 수익률 범위 제한 후 `price = prev · exp(r)`, 비정상 값은 직전 가격으로 대체

use chrono::{DateTime, Utc};
use marketsim_core::{sanitize_price, EngineTuning, Scenario, Side, SymbolState, Trade};
use rand::rngs::StdRng;
use rand::Rng;
use tracing::{error, warn};

use crate::formula::{CompiledFormula, EvalError, FormulaContext};
use crate::random::{make_rng, standard_normal};

/// 교란용 보조 생성기 시드를 주 시드와 분리하기 위한 상수.
const PERTURB_SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// 거래량 계산이 비정상 값을 내면 사용하는 값.
const FALLBACK_VOLUME: f64 = 1.0;

/// 한 스텝의 가격 결정 경로.
#[derive(Debug, Clone, PartialEq)]
pub enum StepSource {
    /// 기본 확률 규칙
    Stochastic,
    /// 사용자 수식
    Formula,
    /// 수식 평가 실패로 기본 규칙 사용
    FormulaFallback(EvalError),
    /// 수식 텍스트는 있으나 컴파일본이 없음 (발생하면 안 되는 상황)
    MissingFormula,
}

/// 가격 한 스텝 결과.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceStep {
    pub price: f64,
    pub log_return: f64,
    pub source: StepSource,
}

/// 확률 상태 엔진.
pub struct StochasticEngine {
    tuning: EngineTuning,
    rng: StdRng,
    perturb_rng: StdRng,
    formula_fallbacks: u64,
}

impl StochasticEngine {
    /// 새 엔진을 생성합니다. 시드가 같으면 같은 경로를 만듭니다.
    pub fn new(tuning: EngineTuning, seed: Option<u64>) -> Self {
        Self {
            tuning,
            rng: make_rng(seed),
            perturb_rng: make_rng(seed.map(|s| s ^ PERTURB_SEED_MIX)),
            formula_fallbacks: 0,
        }
    }

    pub fn tuning(&self) -> &EngineTuning {
        &self.tuning
    }

    /// 지금까지 수식 대신 기본 규칙으로 대체된 횟수.
    pub fn formula_fallbacks(&self) -> u64 {
        self.formula_fallbacks
    }

    /// 심볼 상태를 한 틱 전진시키고 체결을 반환합니다.
    pub fn advance(
        &mut self,
        state: &mut SymbolState,
        scenario: &Scenario,
        formula: Option<&CompiledFormula>,
        dt: f64,
        now: DateTime<Utc>,
    ) -> Trade {
        let prev = state.price;
        let step = self.step_price(&state.symbol, prev, scenario, formula, dt);
        let quantity = self.draw_volume(dt);
        let side = self.draw_side(prev, step.price);

        state.apply(step.price, quantity, now);
        Trade::new(state.symbol.clone(), state.price, quantity, side, now)
    }

    /// 다음 가격을 계산합니다. 상태는 변경하지 않습니다.
    pub fn step_price(
        &mut self,
        symbol: &str,
        prev: f64,
        scenario: &Scenario,
        formula: Option<&CompiledFormula>,
        dt: f64,
    ) -> PriceStep {
        let prev = sanitize_price(prev, 1.0);
        let dt = if dt.is_finite() && dt > 0.0 { dt } else { 0.0 };

        let (raw, source) = match (scenario.formula.as_deref(), formula) {
            (None, _) => (self.stochastic_return(prev, scenario, dt), StepSource::Stochastic),
            (Some(_), Some(compiled)) => match self.formula_return(prev, scenario, compiled, dt) {
                Ok(r) => (r, StepSource::Formula),
                Err(e) => {
                    self.formula_fallbacks += 1;
                    metrics::counter!("marketsim_formula_fallbacks_total").increment(1);
                    warn!(symbol = %symbol, error = %e, "수식 평가 실패, 기본 규칙으로 대체");
                    (
                        self.stochastic_return(prev, scenario, dt),
                        StepSource::FormulaFallback(e),
                    )
                }
            },
            (Some(text), None) => {
                self.formula_fallbacks += 1;
                metrics::counter!("marketsim_formula_fallbacks_total").increment(1);
                error!(symbol = %symbol, formula = %text, "컴파일되지 않은 수식 참조");
                debug_assert!(false, "formula for {symbol} was never compiled");
                (self.stochastic_return(prev, scenario, dt), StepSource::MissingFormula)
            }
        };

        let perturbed = self.perturb(raw, scenario, dt);
        let limit = self.tuning.max_log_return;
        let r = if perturbed.is_finite() {
            perturbed.max(-limit).min(limit)
        } else {
            0.0
        };

        let price = sanitize_price(prev * r.exp(), prev);
        PriceStep {
            price,
            log_return: (price / prev).ln(),
            source,
        }
    }

    /// 1~3단계: 드리프트/변동성, 추세 편향, 평균 회귀.
    fn stochastic_return(&mut self, prev: f64, scenario: &Scenario, dt: f64) -> f64 {
        let drift = scenario.drift + scenario.trend.sign() * self.tuning.trend_drift;
        let z = standard_normal(&mut self.rng);
        let mut r = drift * dt + scenario.volatility * dt.sqrt() * z;

        if let Some(target) = scenario.target_price {
            let strength = (self.tuning.mean_reversion * dt).min(1.0);
            r += strength * (target - prev) / prev;
        }
        r
    }

    fn formula_return(
        &mut self,
        prev: f64,
        scenario: &Scenario,
        formula: &CompiledFormula,
        dt: f64,
    ) -> Result<f64, EvalError> {
        let ctx = FormulaContext {
            price: prev,
            dt,
            trend: scenario.trend,
            target: scenario.target_price,
            drift: scenario.drift,
            volatility: scenario.volatility,
            seed: self.rng.gen(),
        };
        let value = formula.evaluate(&ctx)?;
        if value <= 0.0 {
            return Err(EvalError::NonFinite { op: "non-positive result" });
        }
        let jump = self.tuning.max_formula_jump;
        // 경계가 NaN이면 값이 그대로 통과
        let bounded = value.max(prev / jump).min(prev * jump);
        Ok((bounded / prev).ln())
    }

    /// 4단계: 하우스 엣지와 안티 패턴 부호 반전.
    fn perturb(&mut self, r: f64, scenario: &Scenario, dt: f64) -> f64 {
        let mut r = r;
        if let Some(edge) = scenario.house_edge {
            r -= edge * self.tuning.house_edge_scale * scenario.volatility * dt.sqrt();
        }
        if scenario.anti_pattern && scenario.trend.is_directional() {
            let roll: f64 = self.perturb_rng.gen();
            if roll < self.tuning.anti_pattern_flip_probability {
                r = -r;
            }
        }
        r
    }

    /// 로그 정규 분포 거래량. `dt`에 비례하며 설정 범위로 제한됩니다.
    pub fn draw_volume(&mut self, dt: f64) -> f64 {
        let t = &self.tuning;
        let z = standard_normal(&mut self.rng);
        let scale = if dt.is_finite() && dt > 1.0 { dt } else { 1.0 };
        let raw = (t.volume_mu + t.volume_sigma * z).exp() * scale;
        let volume = raw.max(t.volume_min).min(t.volume_max * scale);
        if volume.is_finite() && volume > 0.0 {
            volume
        } else {
            FALLBACK_VOLUME
        }
    }

    /// 가격 방향에 따라 기운 동전 던지기로 체결 방향을 정합니다.
    pub fn draw_side(&mut self, prev: f64, next: f64) -> Side {
        let bias = if next > prev {
            self.tuning.buy_bias
        } else if next < prev {
            -self.tuning.buy_bias
        } else {
            0.0
        };
        let p_buy = (0.5 + bias).max(0.0).min(1.0);
        if self.rng.gen::<f64>() < p_buy {
            Side::Buy
        } else {
            Side::Sell
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketsim_core::Trend;

    fn engine() -> StochasticEngine {
        StochasticEngine::new(EngineTuning::default(), Some(7))
    }

    #[test]
    fn test_zero_volatility_zero_drift_is_flat() {
        let mut engine = engine();
        let scenario = Scenario::with_volatility(0.0);
        let step = engine.step_price("T", 100.0, &scenario, None, 1.0);
        assert_eq!(step.price, 100.0);
        assert_eq!(step.source, StepSource::Stochastic);
    }

    #[test]
    fn test_trend_bias_direction() {
        let mut engine = StochasticEngine::new(
            EngineTuning {
                trend_drift: 0.001,
                ..Default::default()
            },
            Some(1),
        );
        let up = Scenario {
            volatility: 0.0,
            trend: Trend::Up,
            ..Default::default()
        };
        let down = Scenario {
            trend: Trend::Down,
            ..up.clone()
        };
        assert!(engine.step_price("T", 100.0, &up, None, 1.0).price > 100.0);
        assert!(engine.step_price("T", 100.0, &down, None, 1.0).price < 100.0);
    }

    #[test]
    fn test_formula_drives_price() {
        let mut engine = engine();
        let formula = CompiledFormula::compile("price + 1").unwrap();
        let scenario = Scenario {
            formula: Some("price + 1".into()),
            ..Default::default()
        };
        let step = engine.step_price("T", 100.0, &scenario, Some(&formula), 1.0);
        assert_eq!(step.source, StepSource::Formula);
        assert!((step.price - 101.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_finite_tuning_does_not_panic() {
        let mut engine = StochasticEngine::new(
            EngineTuning {
                max_formula_jump: f64::NAN,
                max_log_return: f64::NAN,
                volume_mu: f64::NAN,
                buy_bias: f64::NAN,
                ..Default::default()
            },
            Some(3),
        );
        let formula = CompiledFormula::compile("price * 1.001").unwrap();
        let scenario = Scenario {
            formula: Some("price * 1.001".into()),
            ..Default::default()
        };

        let step = engine.step_price("T", 100.0, &scenario, Some(&formula), 1.0);
        assert!(step.price.is_finite() && step.price > 0.0);

        let volume = engine.draw_volume(1.0);
        assert!(volume.is_finite() && volume > 0.0);
        engine.draw_side(100.0, 101.0);
    }

    #[test]
    fn test_formula_output_is_bounded() {
        let mut engine = engine();
        let formula = CompiledFormula::compile("price * 1000").unwrap();
        let scenario = Scenario {
            formula: Some("price * 1000".into()),
            ..Default::default()
        };
        let step = engine.step_price("T", 100.0, &scenario, Some(&formula), 1.0);
        assert!((step.price - 200.0).abs() < 1e-6);
    }

    #[test]
    fn test_formula_runtime_error_falls_back() {
        let mut engine = engine();
        let formula = CompiledFormula::compile("price / (dt - dt)").unwrap();
        let scenario = Scenario {
            formula: Some("price / (dt - dt)".into()),
            ..Default::default()
        };
        let step = engine.step_price("T", 100.0, &scenario, Some(&formula), 1.0);
        assert!(matches!(
            step.source,
            StepSource::FormulaFallback(EvalError::DivisionByZero { .. })
        ));
        assert!(step.price > 0.0);
        assert_eq!(engine.formula_fallbacks(), 1);
    }

    #[test]
    fn test_negative_formula_result_falls_back() {
        let mut engine = engine();
        let formula = CompiledFormula::compile("-price").unwrap();
        let scenario = Scenario {
            formula: Some("-price".into()),
            ..Default::default()
        };
        let step = engine.step_price("T", 100.0, &scenario, Some(&formula), 1.0);
        assert!(matches!(step.source, StepSource::FormulaFallback(_)));
        assert!(step.price > 0.0);
    }

    #[test]
    fn test_house_edge_biases_down() {
        let mut engine = engine();
        let scenario = Scenario {
            volatility: 0.0,
            house_edge: Some(0.5),
            ..Default::default()
        };
        // 변동성이 0이면 하우스 엣지도 0
        assert_eq!(engine.step_price("T", 100.0, &scenario, None, 1.0).price, 100.0);

        let noisy = Scenario {
            volatility: 0.01,
            house_edge: Some(0.5),
            ..Default::default()
        };
        let mut sum = 0.0;
        for _ in 0..2_000 {
            sum += engine.step_price("T", 100.0, &noisy, None, 1.0).log_return;
        }
        assert!(sum / 2_000.0 < 0.0);
    }

    #[test]
    fn test_anti_pattern_flips_some_steps() {
        let mut engine = StochasticEngine::new(
            EngineTuning {
                trend_drift: 0.001,
                ..Default::default()
            },
            Some(3),
        );
        let scenario = Scenario {
            volatility: 0.0,
            trend: Trend::Up,
            anti_pattern: true,
            ..Default::default()
        };
        let mut flipped = 0;
        for _ in 0..1_000 {
            if engine.step_price("T", 100.0, &scenario, None, 1.0).price < 100.0 {
                flipped += 1;
            }
        }
        // 기본 확률 0.15
        assert!((80..=220).contains(&flipped), "flipped = {flipped}");
    }

    #[test]
    fn test_advance_updates_state_and_emits_trade() {
        let mut engine = engine();
        let now = Utc::now();
        let mut state = SymbolState::new("BTCUSDT", 45_000.0, now);
        let trade = engine.advance(&mut state, &Scenario::default(), None, 1.0, now);

        assert_eq!(state.sequence, 1);
        assert_eq!(trade.symbol, "BTCUSDT");
        assert_eq!(trade.price, state.price);
        assert!(trade.quantity >= engine.tuning().volume_min);
        assert!(state.high >= state.price && state.price >= state.low);
    }

    #[test]
    fn test_side_bias() {
        let mut engine = engine();
        let buys = (0..4_000)
            .filter(|_| engine.draw_side(100.0, 101.0) == Side::Buy)
            .count();
        // P(buy) = 0.6
        assert!((2_200..=2_600).contains(&buys), "buys = {buys}");
    }

    #[test]
    fn test_seeded_engines_agree() {
        let scenario = Scenario::default();
        let mut a = engine();
        let mut b = engine();
        for _ in 0..10 {
            let pa = a.step_price("T", 100.0, &scenario, None, 1.0).price;
            let pb = b.step_price("T", 100.0, &scenario, None, 1.0).price;
            assert_eq!(pa, pb);
        }
    }
}
