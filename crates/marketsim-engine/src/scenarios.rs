//! 심볼별 시나리오 저장소.
//!
//! 모든 쓰기 경로에서 수치 제약 검사와 수식 컴파일을 수행하고, 컴파일된 수식을 시나리오와
//! 함께 보관합니다. 검증을 통과하지 못한 시나리오는 저장되지 않습니다.

use std::collections::HashMap;
use std::sync::Arc;

use marketsim_core::{normalize_symbol, Scenario, ScenarioPatch, SimResult};
use tracing::info;

use crate::formula::CompiledFormula;

/// 검증된 시나리오와 컴파일된 수식.
#[derive(Debug, Clone)]
pub struct ScenarioEntry {
    pub scenario: Scenario,
    pub formula: Option<Arc<CompiledFormula>>,
}

impl ScenarioEntry {
    /// 시나리오를 검증하고 수식을 컴파일합니다.
    pub fn compile(scenario: Scenario) -> SimResult<Self> {
        scenario.check()?;
        let formula = match scenario.formula.as_deref() {
            Some(source) => Some(Arc::new(CompiledFormula::compile(source)?)),
            None => None,
        };
        Ok(Self { scenario, formula })
    }

    pub fn formula(&self) -> Option<&CompiledFormula> {
        self.formula.as_deref()
    }
}

/// 기본 시나리오와 심볼별 재정의.
#[derive(Debug, Clone)]
pub struct ScenarioBook {
    default: ScenarioEntry,
    overrides: HashMap<String, ScenarioEntry>,
}

impl ScenarioBook {
    pub fn new(default: Scenario) -> SimResult<Self> {
        Ok(Self {
            default: ScenarioEntry::compile(default)?,
            overrides: HashMap::new(),
        })
    }

    /// 심볼의 유효 시나리오 (없으면 기본값).
    pub fn get(&self, symbol: &str) -> &ScenarioEntry {
        self.overrides
            .get(&normalize_symbol(symbol))
            .unwrap_or(&self.default)
    }

    pub fn default_entry(&self) -> &ScenarioEntry {
        &self.default
    }

    pub fn has_override(&self, symbol: &str) -> bool {
        self.overrides.contains_key(&normalize_symbol(symbol))
    }

    /// 시나리오 전체 교체.
    pub fn set(&mut self, symbol: &str, scenario: Scenario) -> SimResult<&ScenarioEntry> {
        let entry = ScenarioEntry::compile(scenario)?;
        let key = normalize_symbol(symbol);
        info!(
            symbol = %key,
            trend = %entry.scenario.trend,
            formula = entry.formula.is_some(),
            "시나리오 교체"
        );
        self.overrides.insert(key.clone(), entry);
        Ok(&self.overrides[&key])
    }

    /// 부분 갱신. 현재 유효 시나리오에 패치를 적용한 뒤 전체를 다시 검증합니다.
    pub fn patch(&mut self, symbol: &str, patch: &ScenarioPatch) -> SimResult<&ScenarioEntry> {
        let next = patch.apply_to(&self.get(symbol).scenario);
        self.set(symbol, next)
    }

    /// 재정의를 제거하고 기본 시나리오로 되돌립니다.
    pub fn reset(&mut self, symbol: &str) -> bool {
        self.overrides.remove(&normalize_symbol(symbol)).is_some()
    }
}

impl Default for ScenarioBook {
    fn default() -> Self {
        Self {
            default: ScenarioEntry {
                scenario: Scenario::default(),
                formula: None,
            },
            overrides: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketsim_core::{SimError, Trend};

    #[test]
    fn test_falls_back_to_default() {
        let book = ScenarioBook::default();
        assert_eq!(book.get("BTCUSDT").scenario, Scenario::default());
        assert!(!book.has_override("BTCUSDT"));
    }

    #[test]
    fn test_set_compiles_formula() {
        let mut book = ScenarioBook::default();
        let scenario = Scenario {
            formula: Some("price * (1 + drift * dt)".into()),
            ..Default::default()
        };
        let entry = book.set("btcusdt", scenario).unwrap();
        assert!(entry.formula.is_some());
        assert!(book.has_override("BTCUSDT"));
    }

    #[test]
    fn test_malicious_formula_never_stored() {
        let mut book = ScenarioBook::default();
        let scenario = Scenario {
            formula: Some("import os".into()),
            ..Default::default()
        };
        let err = book.set("BTCUSDT", scenario).unwrap_err();
        assert!(matches!(err, SimError::FormulaRejected { ref construct, .. } if construct == "import"));
        assert!(!book.has_override("BTCUSDT"));
        assert!(book.get("BTCUSDT").formula.is_none());
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        let mut book = ScenarioBook::default();
        let err = book.set("BTCUSDT", Scenario::with_volatility(-1.0)).unwrap_err();
        assert!(matches!(err, SimError::Validation(_)));
    }

    #[test]
    fn test_patch_keeps_other_fields() {
        let mut book = ScenarioBook::default();
        book.set(
            "ETHUSDT",
            Scenario {
                trend: Trend::Up,
                target_price: Some(3_000.0),
                ..Default::default()
            },
        )
        .unwrap();

        let patch = ScenarioPatch {
            volatility: Some(0.001),
            ..Default::default()
        };
        let entry = book.patch("ETHUSDT", &patch).unwrap();
        assert_eq!(entry.scenario.trend, Trend::Up);
        assert_eq!(entry.scenario.target_price, Some(3_000.0));
        assert_eq!(entry.scenario.volatility, 0.001);
    }

    #[test]
    fn test_rejected_patch_leaves_previous() {
        let mut book = ScenarioBook::default();
        book.set("ETHUSDT", Scenario::with_volatility(0.002)).unwrap();
        let patch = ScenarioPatch {
            formula: Some(Some("price.__class__".into())),
            ..Default::default()
        };
        assert!(book.patch("ETHUSDT", &patch).is_err());
        assert_eq!(book.get("ETHUSDT").scenario.volatility, 0.002);
        assert!(book.get("ETHUSDT").scenario.formula.is_none());
    }

    #[test]
    fn test_reset() {
        let mut book = ScenarioBook::default();
        book.set("SOLUSDT", Scenario::with_volatility(0.001)).unwrap();
        assert!(book.reset("SOLUSDT"));
        assert!(!book.reset("SOLUSDT"));
        assert_eq!(book.get("SOLUSDT").scenario, Scenario::default());
    }
}
