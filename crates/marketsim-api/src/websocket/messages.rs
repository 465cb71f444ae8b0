//! WebSocket 메시지 타입.
//!
//! 클라이언트-서버 간 교환되는 메시지 정의.
//!
//! 가격 업데이트는 사람이 읽기 쉬운 필드(`symbol`, `price`, `change`, `changePercent`)와
//! 짧은 별칭(`s`, `p`, `c`, `cp`)을 함께 담습니다. 숫자는 가격 크기에 맞춰 반올림되어
//! 직렬화 길이가 일정 범위 안에 머뭅니다.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use marketsim_core::{Candle, PriceTick, Side, Trade};
use serde::{Deserialize, Serialize};

/// WebSocket 에러.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("잘못된 메시지 형식: {0}")]
    InvalidMessage(String),
    #[error("알 수 없는 채널: {0}")]
    UnknownChannel(String),
    #[error("직렬화 실패: {0}")]
    SerializationError(#[from] serde_json::Error),
}

// ==================== 채널 ====================

/// 브로드캐스트 채널.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// 가격 업데이트
    Prices,
    /// 체결
    Trades,
    /// 마감 캔들
    Candles,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Prices, Channel::Trades, Channel::Candles];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Prices => "prices",
            Channel::Trades => "trades",
            Channel::Candles => "candles",
        }
    }

    /// 채널 이름 목록을 알려진 채널과 알 수 없는 이름으로 나눕니다.
    pub fn partition(names: &[String]) -> (Vec<Channel>, Vec<String>) {
        let mut known = Vec::new();
        let mut unknown = Vec::new();
        for name in names {
            match name.parse::<Channel>() {
                Ok(channel) if !known.contains(&channel) => known.push(channel),
                Ok(_) => {}
                Err(_) => unknown.push(name.clone()),
            }
        }
        (known, unknown)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = WsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "prices" | "price" => Ok(Channel::Prices),
            "trades" | "trade" => Ok(Channel::Trades),
            "candles" | "candle" => Ok(Channel::Candles),
            _ => Err(WsError::UnknownChannel(s.to_string())),
        }
    }
}

// ==================== 클라이언트 → 서버 메시지 ====================

/// 클라이언트에서 서버로 보내는 메시지.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// 채널 구독
    Subscribe {
        /// 구독할 채널 목록
        channels: Vec<String>,
    },
    /// 채널 구독 해제
    Unsubscribe {
        /// 구독 해제할 채널 목록
        channels: Vec<String>,
    },
    /// 핑 (연결 유지)
    Ping,
}

impl ClientMessage {
    /// JSON 문자열에서 파싱.
    pub fn from_json(json: &str) -> Result<Self, WsError> {
        serde_json::from_str(json).map_err(|e| WsError::InvalidMessage(e.to_string()))
    }
}

// ==================== 서버 → 클라이언트 메시지 ====================

/// 서버에서 클라이언트로 보내는 메시지.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// 가격 업데이트
    PriceUpdate {
        channel: Channel,
        data: PriceUpdateData,
    },
    /// 체결
    Trade { channel: Channel, data: TradeData },
    /// 마감 캔들
    Candle { channel: Channel, data: CandleData },
    /// 구독 확인
    Subscribed {
        /// 현재 구독 중인 채널 전체
        channels: Vec<Channel>,
    },
    /// 구독 해제 확인
    Unsubscribed {
        /// 해제된 채널
        channels: Vec<Channel>,
    },
    /// 퐁 응답
    Pong {
        /// 서버 타임스탬프
        timestamp: i64,
    },
    /// 에러
    Error {
        /// 에러 코드
        code: String,
        /// 에러 메시지
        message: String,
    },
    /// 연결 환영 메시지
    Welcome {
        /// 서버 버전
        version: String,
        /// 연결 ID
        connection_id: String,
        /// 구독 가능한 채널
        channels: Vec<Channel>,
        /// 서버 타임스탬프
        timestamp: i64,
    },
}

impl ServerMessage {
    /// JSON 문자열로 직렬화.
    pub fn to_json(&self) -> Result<String, WsError> {
        serde_json::to_string(self).map_err(WsError::from)
    }

    /// 에러 메시지 생성 헬퍼.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn price_update(tick: &PriceTick) -> Self {
        ServerMessage::PriceUpdate {
            channel: Channel::Prices,
            data: PriceUpdateData::from(tick),
        }
    }

    pub fn trade(trade: &Trade) -> Self {
        ServerMessage::Trade {
            channel: Channel::Trades,
            data: TradeData::from(trade),
        }
    }

    pub fn candle(symbol: &str, candle: &Candle) -> Self {
        ServerMessage::Candle {
            channel: Channel::Candles,
            data: CandleData::new(symbol, candle),
        }
    }

    /// 와이어 `type` 태그.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::PriceUpdate { .. } => "price_update",
            ServerMessage::Trade { .. } => "trade",
            ServerMessage::Candle { .. } => "candle",
            ServerMessage::Subscribed { .. } => "subscribed",
            ServerMessage::Unsubscribed { .. } => "unsubscribed",
            ServerMessage::Pong { .. } => "pong",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Welcome { .. } => "welcome",
        }
    }
}

/// 가격 업데이트 데이터.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdateData {
    pub symbol: String,
    pub price: f64,
    pub change: f64,
    #[serde(rename = "changePercent")]
    pub change_percent: f64,
    pub s: String,
    pub p: f64,
    pub c: f64,
    pub cp: f64,
}

impl From<&PriceTick> for PriceUpdateData {
    fn from(tick: &PriceTick) -> Self {
        let decimals = price_decimals(tick.price);
        let price = round_to(tick.price, decimals);
        let change = round_to(tick.change, decimals);
        let change_percent = round_to(tick.change_percent, 2);
        Self {
            symbol: tick.symbol.clone(),
            price,
            change,
            change_percent,
            s: tick.symbol.clone(),
            p: price,
            c: change,
            cp: change_percent,
        }
    }
}

/// 체결 데이터.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeData {
    pub id: String,
    pub symbol: String,
    pub price: f64,
    pub quantity: f64,
    pub side: Side,
    /// 밀리초 타임스탬프
    pub timestamp: i64,
}

impl From<&Trade> for TradeData {
    fn from(trade: &Trade) -> Self {
        Self {
            id: trade.id.to_string(),
            symbol: trade.symbol.clone(),
            price: round_to(trade.price, price_decimals(trade.price)),
            quantity: round_to(trade.quantity, 6),
            side: trade.side,
            timestamp: trade.timestamp.timestamp_millis(),
        }
    }
}

/// 캔들 데이터.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleData {
    pub symbol: String,
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trade_count: u32,
}

impl CandleData {
    pub fn new(symbol: &str, candle: &Candle) -> Self {
        let decimals = price_decimals(candle.close);
        Self {
            symbol: symbol.to_string(),
            open_time: candle.open_time,
            open: round_to(candle.open, decimals),
            high: round_to(candle.high, decimals),
            low: round_to(candle.low, decimals),
            close: round_to(candle.close, decimals),
            volume: round_to(candle.volume, 6),
            trade_count: candle.trade_count,
        }
    }
}

/// 가격 크기에 따른 표시 소수 자릿수.
fn price_decimals(price: f64) -> i32 {
    let magnitude = price.abs();
    if magnitude >= 1_000.0 {
        2
    } else if magnitude >= 1.0 {
        4
    } else {
        8
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
