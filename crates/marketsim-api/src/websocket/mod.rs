//! 실시간 시세 스트리밍을 위한 WebSocket 서버.
//!
//! # 구독 채널
//!
//! - `prices` - 심볼별 가격 업데이트 (틱마다)
//! - `trades` - 합성 체결
//! - `candles` - 마감된 캔들
//!
//! # 메시지 형식
//!
//! ## 클라이언트 → 서버
//!
//! ```json
//! {"type": "subscribe", "channels": ["prices", "trades"]}
//! {"type": "unsubscribe", "channels": ["trades"]}
//! {"type": "ping"}
//! ```
//!
//! ## 서버 → 클라이언트
//!
//! ```json
//! {"type": "price_update", "channel": "prices", "data": {"symbol": "BTCUSDT", "price": 45000.0, "change": 100.0, "changePercent": 0.22, "s": "BTCUSDT", "p": 45000.0, "c": 100.0, "cp": 0.22}}
//! {"type": "pong", "timestamp": 1700000000000}
//! ```

pub mod broadcaster;
pub mod handler;
pub mod messages;
pub mod subscriptions;

pub use broadcaster::BroadcastListener;
pub use handler::{process_client_message, websocket_handler, WsConnection, ANONYMOUS_USER};
pub use messages::{
    CandleData, Channel, ClientMessage, PriceUpdateData, ServerMessage, TradeData, WsError,
};
pub use subscriptions::{
    Connection, ConnectionRef, DeliveryError, DeliveryReport, SharedSubscriptionManager,
    SubscriptionManager,
};
