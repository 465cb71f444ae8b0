//! 가격 시나리오 정의.
//!
//! 시나리오는 심볼 하나의 확률 과정 매개변수(드리프트, 변동성, 추세, 목표가,
//! 사용자 수식 등)를 묶은 것입니다. 심볼별 시나리오가 없으면 시스템 기본값을 사용합니다.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{SimError, SimResult};

/// 호가창 표시 깊이 상한.
pub const MAX_BOOK_DEPTH: u32 = 50;

/// 스프레드 상한 (bp).
pub const MAX_SPREAD_BPS: f64 = 1_000.0;

/// 틱당 드리프트 절대값 상한.
pub const MAX_ABS_DRIFT: f64 = 0.01;

/// 틱당 변동성 상한.
pub const MAX_VOLATILITY: f64 = 0.05;

/// 추세 레이블.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    /// 상승 추세
    #[serde(alias = "uptrend", alias = "bullish")]
    Up,
    /// 하락 추세
    #[serde(alias = "downtrend", alias = "bearish")]
    Down,
    /// 횡보
    #[default]
    #[serde(alias = "flat", alias = "neutral")]
    Sideways,
}

impl Trend {
    /// 추세 방향 부호 (+1, -1, 0).
    pub fn sign(&self) -> f64 {
        match self {
            Trend::Up => 1.0,
            Trend::Down => -1.0,
            Trend::Sideways => 0.0,
        }
    }

    /// 방향성이 있는 추세인지 확인합니다.
    pub fn is_directional(&self) -> bool {
        !matches!(self, Trend::Sideways)
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trend::Up => write!(f, "up"),
            Trend::Down => write!(f, "down"),
            Trend::Sideways => write!(f, "sideways"),
        }
    }
}

/// 심볼 하나의 가격 시나리오.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// 틱당 기대 로그 수익률
    pub drift: f64,
    /// 틱당 표준편차
    pub volatility: f64,
    /// 추세 레이블
    pub trend: Trend,
    /// 평균 회귀 목표가
    pub target_price: Option<f64>,
    /// 하우스 엣지 (변동성 대비 하방 편향 비율)
    pub house_edge: Option<f64>,
    /// 추세 신호 교란 여부
    pub anti_pattern: bool,
    /// 사용자 정의 가격 수식
    pub formula: Option<String>,
    /// 표시용 스프레드 (bp)
    pub spread_bps: f64,
    /// 표시용 호가창 깊이 (레벨 수)
    pub depth: u32,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            drift: 0.0,
            volatility: 5e-5,
            trend: Trend::Sideways,
            target_price: None,
            house_edge: None,
            anti_pattern: false,
            formula: None,
            spread_bps: 2.0,
            depth: 10,
        }
    }
}

impl Scenario {
    /// 변동성만 지정한 시나리오를 생성합니다.
    pub fn with_volatility(volatility: f64) -> Self {
        Self {
            volatility,
            ..Default::default()
        }
    }

    /// 수식을 제외한 수치 제약을 검사합니다.
    ///
    /// 수식 검증은 엔진의 샌드박스가 담당합니다.
    pub fn check(&self) -> SimResult<()> {
        let mut problems = Vec::new();

        if !self.drift.is_finite() || self.drift.abs() > MAX_ABS_DRIFT {
            problems.push(format!("drift는 [-{MAX_ABS_DRIFT}, {MAX_ABS_DRIFT}] 범위여야 합니다"));
        }
        if !self.volatility.is_finite() || self.volatility < 0.0 || self.volatility > MAX_VOLATILITY {
            problems.push(format!("volatility는 [0, {MAX_VOLATILITY}] 범위여야 합니다"));
        }
        if let Some(target) = self.target_price {
            if !target.is_finite() || target <= 0.0 {
                problems.push("target_price는 양수여야 합니다".to_string());
            }
        }
        if let Some(edge) = self.house_edge {
            if !edge.is_finite() || !(0.0..=1.0).contains(&edge) {
                problems.push("house_edge는 [0, 1] 범위여야 합니다".to_string());
            }
        }
        if !self.spread_bps.is_finite() || self.spread_bps < 0.0 || self.spread_bps > MAX_SPREAD_BPS {
            problems.push(format!("spread_bps는 [0, {MAX_SPREAD_BPS}] 범위여야 합니다"));
        }
        if self.depth == 0 || self.depth > MAX_BOOK_DEPTH {
            problems.push(format!("depth는 [1, {MAX_BOOK_DEPTH}] 범위여야 합니다"));
        }
        if matches!(&self.formula, Some(f) if f.trim().is_empty()) {
            problems.push("formula가 비어 있습니다".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(SimError::Validation(problems.join("; ")))
        }
    }
}

/// 시나리오 부분 갱신.
///
/// `None`인 필드는 기존 값을 유지합니다. 선택 필드는 `Some(None)`으로 해제할 수 있습니다.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScenarioPatch {
    pub drift: Option<f64>,
    pub volatility: Option<f64>,
    pub trend: Option<Trend>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub target_price: Option<Option<f64>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub house_edge: Option<Option<f64>>,
    pub anti_pattern: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub formula: Option<Option<String>>,
    pub spread_bps: Option<f64>,
    pub depth: Option<u32>,
}

impl ScenarioPatch {
    /// 기존 시나리오에 패치를 적용한 새 시나리오를 반환합니다.
    pub fn apply_to(&self, base: &Scenario) -> Scenario {
        let mut next = base.clone();
        if let Some(v) = self.drift {
            next.drift = v;
        }
        if let Some(v) = self.volatility {
            next.volatility = v;
        }
        if let Some(v) = self.trend {
            next.trend = v;
        }
        if let Some(v) = self.target_price {
            next.target_price = v;
        }
        if let Some(v) = self.house_edge {
            next.house_edge = v;
        }
        if let Some(v) = self.anti_pattern {
            next.anti_pattern = v;
        }
        if let Some(v) = &self.formula {
            next.formula = v.clone();
        }
        if let Some(v) = self.spread_bps {
            next.spread_bps = v;
        }
        if let Some(v) = self.depth {
            next.depth = v;
        }
        next
    }

    /// 변경 사항이 없는 패치인지 확인합니다.
    pub fn is_empty(&self) -> bool {
        *self == ScenarioPatch::default()
    }
}

/// 명시적 `null`과 필드 누락을 구분하기 위한 역직렬화 헬퍼.
///
/// 필드가 존재하면 `Some(value)`(null이면 `Some(None)`), 없으면 `#[serde(default)]`로 `None`.
pub fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}
