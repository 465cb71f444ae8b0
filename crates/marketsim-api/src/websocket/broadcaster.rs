//! 틱 이벤트를 WebSocket 채널로 팬아웃하는 리스너.

use async_trait::async_trait;
use marketsim_core::{Candle, PriceTick, Trade};
use marketsim_engine::TickListener;
use tracing::trace;

use super::messages::{Channel, ServerMessage};
use super::subscriptions::SharedSubscriptionManager;

/// 스케줄러에 등록되는 브로드캐스트 리스너.
pub struct BroadcastListener {
    subscriptions: SharedSubscriptionManager,
}

impl BroadcastListener {
    pub fn new(subscriptions: SharedSubscriptionManager) -> Self {
        Self { subscriptions }
    }
}

#[async_trait]
impl TickListener for BroadcastListener {
    fn name(&self) -> &str {
        "websocket-broadcast"
    }

    async fn on_price(&self, tick: &PriceTick) {
        let report = self
            .subscriptions
            .publish(&ServerMessage::price_update(tick), Some(Channel::Prices))
            .await;
        trace!(symbol = %tick.symbol, delivered = report.delivered, "가격 브로드캐스트");
    }

    async fn on_trade(&self, trade: &Trade) {
        self.subscriptions
            .publish(&ServerMessage::trade(trade), Some(Channel::Trades))
            .await;
    }

    async fn on_candle_closed(&self, symbol: &str, candle: &Candle) {
        self.subscriptions
            .publish(&ServerMessage::candle(symbol, candle), Some(Channel::Candles))
            .await;
    }
}
