//! 심볼별 가격 상태.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 가격 하한. 어떤 경로로도 가격이 이 값 아래로 내려가지 않습니다.
pub const MIN_PRICE: f64 = 1e-8;

/// 심볼 하나의 현재 가격/거래량 상태.
///
/// 확률 엔진만 변경하며, 집계기와 브로드캐스트 계층은 읽기만 합니다.
/// 불변식: `price > 0`, 열린 캔들 안에서 `high >= price >= low`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolState {
    /// 거래 심볼
    pub symbol: String,
    /// 현재가
    pub price: f64,
    /// 직전 틱 가격
    pub previous_price: f64,
    /// 열린 캔들의 고가
    pub high: f64,
    /// 열린 캔들의 저가
    pub low: f64,
    /// 열린 캔들의 누적 거래량
    pub volume: f64,
    /// 마지막 갱신 시간
    pub last_update: DateTime<Utc>,
    /// 갱신 순번 (단조 증가)
    pub sequence: u64,
    /// 변동률 계산 기준가 (히스토리 창의 시가)
    pub reference_price: f64,
}

impl SymbolState {
    /// 초기 가격으로 상태를 생성합니다.
    pub fn new(symbol: impl Into<String>, price: f64, now: DateTime<Utc>) -> Self {
        let price = sanitize_price(price, 1.0);
        Self {
            symbol: symbol.into(),
            price,
            previous_price: price,
            high: price,
            low: price,
            volume: 0.0,
            last_update: now,
            sequence: 0,
            reference_price: price,
        }
    }

    /// 새 가격과 수량을 반영합니다.
    ///
    /// 비정상 값이 들어오면 현재가를 유지합니다.
    pub fn apply(&mut self, price: f64, quantity: f64, now: DateTime<Utc>) {
        let price = sanitize_price(price, self.price);
        self.previous_price = self.price;
        self.price = price;
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        if quantity.is_finite() && quantity > 0.0 {
            self.volume += quantity;
        }
        self.last_update = now;
        self.sequence += 1;
    }

    /// 새 캔들 구간이 시작될 때 고가/저가/거래량을 현재가 기준으로 초기화합니다.
    pub fn reset_window(&mut self) {
        self.high = self.price;
        self.low = self.price;
        self.volume = 0.0;
    }

    /// 기준가 대비 변동.
    pub fn change(&self) -> f64 {
        self.price - self.reference_price
    }

    /// 기준가 대비 변동률(%).
    pub fn change_percent(&self) -> f64 {
        if self.reference_price <= 0.0 {
            return 0.0;
        }
        self.change() / self.reference_price * 100.0
    }

    /// 브로드캐스트용 스냅샷을 만듭니다.
    pub fn to_tick(&self) -> PriceTick {
        PriceTick {
            symbol: self.symbol.clone(),
            price: self.price,
            previous_price: self.previous_price,
            change: self.change(),
            change_percent: self.change_percent(),
            high: self.high,
            low: self.low,
            volume: self.volume,
            sequence: self.sequence,
            timestamp: self.last_update,
        }
    }
}

/// 한 틱의 가격 갱신 결과. 리스너에게 소유권째 전달됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub symbol: String,
    pub price: f64,
    pub previous_price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

/// 유한하지 않거나 양수가 아닌 가격을 대체값으로 바꿉니다.
pub fn sanitize_price(candidate: f64, fallback: f64) -> f64 {
    if candidate.is_finite() && candidate > 0.0 {
        candidate.max(MIN_PRICE)
    } else if fallback.is_finite() && fallback > 0.0 {
        fallback.max(MIN_PRICE)
    } else {
        MIN_PRICE
    }
}
