//! 캔들 집계기.
//!
//! 틱을 고정 폭 OHLCV 캔들로 묶습니다. 심볼마다 열린 캔들 하나와
//! 최대 개수가 정해진 마감 캔들 링을 유지합니다.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use marketsim_core::{Candle, Trade};
use serde::Serialize;

/// 심볼 하나의 캔들 시계열.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    width_secs: i64,
    max_closed: usize,
    closed: VecDeque<Candle>,
    open: Option<Candle>,
}

impl CandleSeries {
    pub fn new(width_secs: u64, max_closed: usize) -> Self {
        Self {
            width_secs: width_secs.max(1) as i64,
            max_closed: max_closed.max(1),
            closed: VecDeque::with_capacity(max_closed.min(4_096)),
            open: None,
        }
    }

    pub fn width(&self) -> Duration {
        Duration::seconds(self.width_secs)
    }

    /// 타임스탬프가 속한 버킷의 시작 시간.
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = ts.timestamp();
        let start = secs - secs.rem_euclid(self.width_secs);
        DateTime::from_timestamp(start, 0).unwrap_or(ts)
    }

    /// 체결 하나를 반영합니다.
    ///
    /// 버킷 경계를 넘으면 열린 캔들을 마감하고 반환합니다. 새 캔들의 시가는
    /// 직전 종가를 이어받습니다. 열린 버킷보다 이른 타임스탬프는 열린 캔들에 합칩니다.
    pub fn roll(&mut self, price: f64, quantity: f64, ts: DateTime<Utc>) -> Option<Candle> {
        let bucket = self.bucket_start(ts);

        let crossed = self.open.as_ref().is_some_and(|open| bucket > open.open_time);
        let closed = if crossed { self.open.take() } else { None };

        if let Some(candle) = &closed {
            self.push_closed(candle.clone());
        }

        let prev_close = closed
            .as_ref()
            .map(|c| c.close)
            .or_else(|| self.closed.back().map(|c| c.close));
        let open = self
            .open
            .get_or_insert_with(|| Candle::open_at(bucket, prev_close.unwrap_or(price)));
        open.apply(price, quantity);

        closed
    }

    /// 마감 캔들을 링에 추가합니다. 가득 차면 가장 오래된 캔들을 버립니다.
    pub fn push_closed(&mut self, candle: Candle) {
        while self.closed.len() >= self.max_closed {
            self.closed.pop_front();
        }
        self.closed.push_back(candle);
    }

    /// 체결 없이 빈 캔들을 엽니다 (백필 직후).
    pub fn open_empty(&mut self, ts: DateTime<Utc>, price: f64) {
        let bucket = self.bucket_start(ts);
        self.open = Some(Candle::open_at(bucket, price));
    }

    pub fn open_candle(&self) -> Option<&Candle> {
        self.open.as_ref()
    }

    pub fn closed(&self) -> impl DoubleEndedIterator<Item = &Candle> + ExactSizeIterator {
        self.closed.iter()
    }

    pub fn len(&self) -> usize {
        self.closed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closed.is_empty()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.open
            .as_ref()
            .map(|c| c.close)
            .or_else(|| self.closed.back().map(|c| c.close))
    }

    /// 최근 마감 캔들 `limit`개(오래된 순)와 열린 캔들.
    pub fn history(&self, limit: usize) -> CandleHistory {
        let skip = self.closed.len().saturating_sub(limit);
        CandleHistory {
            closed: self.closed.iter().skip(skip).cloned().collect(),
            open: self.open.clone(),
        }
    }
}

/// 캔들 조회 결과.
#[derive(Debug, Clone, Serialize)]
pub struct CandleHistory {
    pub closed: Vec<Candle>,
    pub open: Option<Candle>,
}

/// 심볼별 캔들 집계기.
#[derive(Debug, Clone)]
pub struct CandleAggregator {
    width_secs: u64,
    max_closed: usize,
    series: HashMap<String, CandleSeries>,
}

impl CandleAggregator {
    pub fn new(width_secs: u64, max_closed: usize) -> Self {
        Self {
            width_secs,
            max_closed,
            series: HashMap::new(),
        }
    }

    /// 체결을 해당 심볼의 캔들에 반영하고, 마감된 캔들이 있으면 반환합니다.
    pub fn roll(&mut self, symbol: &str, trade: &Trade, ts: DateTime<Utc>) -> Option<Candle> {
        self.series_mut(symbol).roll(trade.price, trade.quantity, ts)
    }

    pub fn series(&self, symbol: &str) -> Option<&CandleSeries> {
        self.series.get(symbol)
    }

    pub fn series_mut(&mut self, symbol: &str) -> &mut CandleSeries {
        let (width, max) = (self.width_secs, self.max_closed);
        self.series
            .entry(symbol.to_string())
            .or_insert_with(|| CandleSeries::new(width, max))
    }
}
