//! 시장 데이터 타입 및 구조체.
//!
//! 이 모듈은 시뮬레이터가 생성하는 시장 데이터 타입을 정의합니다:
//! - `Candle` - OHLCV 캔들스틱 데이터
//! - `Trade` - 틱마다 합성되는 체결 기록
//! - `OrderBook` - 표시용 호가창 데이터

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 심볼 표기를 정규화합니다 (공백 제거, 대문자).
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// 체결 방향.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// 매수
    Buy,
    /// 매도
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// 틱마다 합성되는 체결 기록.
///
/// 생성 후에는 변경되지 않습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// 체결 ID
    pub id: Uuid,
    /// 거래 심볼
    pub symbol: String,
    /// 체결가
    pub price: f64,
    /// 체결 수량
    pub quantity: f64,
    /// 체결 방향
    pub side: Side,
    /// 체결 시간
    pub timestamp: DateTime<Utc>,
}

impl Trade {
    /// 새 체결 기록을 생성합니다.
    pub fn new(
        symbol: impl Into<String>,
        price: f64,
        quantity: f64,
        side: Side,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            price,
            quantity,
            side,
            timestamp,
        }
    }
}

/// OHLCV 캔들스틱 데이터.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// 버킷 시작 시간
    pub open_time: DateTime<Utc>,
    /// 시가
    pub open: f64,
    /// 고가
    pub high: f64,
    /// 저가
    pub low: f64,
    /// 종가
    pub close: f64,
    /// 거래량
    pub volume: f64,
    /// 체결 건수
    pub trade_count: u32,
}

impl Candle {
    /// 첫 가격으로 새 캔들을 엽니다.
    pub fn open_at(open_time: DateTime<Utc>, price: f64) -> Self {
        Self {
            open_time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
            trade_count: 0,
        }
    }

    /// 체결 한 건을 캔들에 반영합니다.
    pub fn apply(&mut self, price: f64, quantity: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += quantity;
        self.trade_count += 1;
    }

    /// OHLC 값이 서로 일관적인지 확인합니다.
    pub fn is_consistent(&self) -> bool {
        self.low > 0.0
            && self.low <= self.open.min(self.close)
            && self.high >= self.open.max(self.close)
    }
}

/// 호가창 가격 레벨.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    /// 가격
    pub price: f64,
    /// 수량
    pub quantity: f64,
}

/// 표시용 호가창 데이터.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    /// 거래 심볼
    pub symbol: String,
    /// 매수 호가 - 가격 내림차순 정렬
    pub bids: Vec<OrderBookLevel>,
    /// 매도 호가 - 가격 오름차순 정렬
    pub asks: Vec<OrderBookLevel>,
    /// 생성 시간
    pub timestamp: DateTime<Utc>,
}

impl OrderBook {
    /// 최우선 매수 호가를 반환합니다.
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    /// 최우선 매도 호가를 반환합니다.
    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    /// 스프레드를 반환합니다.
    pub fn spread(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// 중간 가격을 반환합니다.
    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }
}
