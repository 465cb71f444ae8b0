//! 표시용 호가창 합성.
//!
//! 시나리오의 스프레드와 깊이로 현재가 주변에 호가 레벨을 만듭니다. 체결 매칭은 하지 않습니다.

use chrono::{DateTime, Utc};
use marketsim_core::{OrderBook, OrderBookLevel};

/// 레벨이 멀어질수록 수량이 줄어드는 비율.
const QUANTITY_DECAY: f64 = 0.85;

/// 현재가 기준 호가창을 합성합니다.
pub fn synthesize_order_book(
    symbol: &str,
    price: f64,
    spread_bps: f64,
    depth: u32,
    timestamp: DateTime<Utc>,
) -> OrderBook {
    let spread = price * spread_bps.max(0.0) / 10_000.0;
    let half = spread / 2.0;
    // 레벨 간격은 스프레드와 같되, 스프레드가 0이면 1bp
    let step = if spread > 0.0 { spread } else { price * 1e-4 };
    let base_quantity = (10_000.0 / price).clamp(0.01, 1_000.0);

    let mut bids = Vec::with_capacity(depth as usize);
    let mut asks = Vec::with_capacity(depth as usize);

    for level in 0..depth {
        let offset = half + step * f64::from(level);
        let quantity = base_quantity * QUANTITY_DECAY.powi(level as i32);

        let bid = price - offset;
        if bid > 0.0 {
            bids.push(OrderBookLevel {
                price: bid,
                quantity,
            });
        }
        asks.push(OrderBookLevel {
            price: price + offset,
            quantity,
        });
    }

    OrderBook {
        symbol: symbol.to_string(),
        bids,
        asks,
        timestamp,
    }
}
