//! WebSocket 연결 handler.
//!
//! 소켓마다 제한된 크기의 송신 큐와 전용 writer 태스크를 둡니다. 팬아웃은 큐에 넣는 것까지만
//! 기다리므로 느린 클라이언트는 전송 타임아웃으로 제거되고 다른 연결을 막지 않습니다.
//! 제거된 연결과 서버 종료 시의 연결은 writer가 Close 프레임을 보내고 소켓을 닫습니다.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::messages::{Channel, ClientMessage, ServerMessage};
use super::subscriptions::{Connection, ConnectionRef, DeliveryError, SubscriptionManager};
use crate::metrics::{decrement_websocket_connections, increment_websocket_connections};
use crate::state::AppState;

/// 사용자 ID가 없을 때 사용하는 값.
pub const ANONYMOUS_USER: &str = "anonymous";

/// 업그레이드 쿼리 파라미터. 인증은 상위 계층에서 끝난 것으로 간주합니다.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    pub user_id: Option<String>,
}

/// 큐 기반 WebSocket 연결.
pub struct WsConnection {
    id: String,
    tx: mpsc::Sender<Arc<str>>,
    closed: CancellationToken,
}

impl WsConnection {
    pub fn new(id: impl Into<String>, tx: mpsc::Sender<Arc<str>>) -> Self {
        Self::with_closed(id, tx, CancellationToken::new())
    }

    /// 닫힘 토큰을 지정해 생성합니다. 서버 종료 토큰의 자식을 넘기면 종료 시 함께 닫힙니다.
    pub fn with_closed(
        id: impl Into<String>,
        tx: mpsc::Sender<Arc<str>>,
        closed: CancellationToken,
    ) -> Self {
        Self {
            id: id.into(),
            tx,
            closed,
        }
    }

    /// writer가 기다리는 닫힘 토큰.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl Connection for WsConnection {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, payload: Arc<str>) -> Result<(), DeliveryError> {
        if self.closed.is_cancelled() {
            return Err(DeliveryError::Closed);
        }
        self.tx
            .send(payload)
            .await
            .map_err(|_| DeliveryError::Closed)
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

/// WebSocket 업그레이드 핸들러.
///
/// # 엔드포인트
///
/// `GET /ws?user_id=<id>`
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let user_id = params
        .user_id
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| ANONYMOUS_USER.to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

/// WebSocket 연결 처리.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: String) {
    let connection_id = Uuid::new_v4().to_string();
    let send_timeout = state.subscriptions.send_timeout();
    let (tx, rx) = mpsc::channel::<Arc<str>>(state.config.broadcast.queue_capacity.max(1));
    let closed = state.shutdown.child_token();
    let connection: ConnectionRef = Arc::new(WsConnection::with_closed(
        connection_id.clone(),
        tx,
        closed.clone(),
    ));

    increment_websocket_connections();
    info!(connection_id = %connection_id, user_id = %user_id, "WebSocket connected");

    let (sink, mut stream) = socket.split();

    // 송신 태스크: 큐 → 소켓
    let mut writer = tokio::spawn(write_queue(sink, rx, closed));

    let welcome = ServerMessage::Welcome {
        version: env!("CARGO_PKG_VERSION").to_string(),
        connection_id: connection_id.clone(),
        channels: Channel::ALL.to_vec(),
        timestamp: Utc::now().timestamp_millis(),
    };
    reply(connection.as_ref(), &welcome, send_timeout).await;

    let subscriptions = state.subscriptions.as_ref();
    let reader = async {
        while let Some(result) = stream.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    let responses =
                        process_client_message(subscriptions, &connection, &user_id, text.as_str())
                            .await;
                    for response in &responses {
                        reply(connection.as_ref(), response, send_timeout).await;
                    }
                }
                Ok(Message::Binary(_)) => {
                    let error = ServerMessage::error("UNSUPPORTED", "바이너리 메시지는 지원하지 않습니다");
                    reply(connection.as_ref(), &error, send_timeout).await;
                }
                Ok(Message::Close(_)) => {
                    debug!(connection_id = %connection_id, "Close message received");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(connection_id = %connection_id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = reader => {
            debug!(connection_id = %connection_id, "Receive loop ended");
        }
        _ = &mut writer => {
            debug!(connection_id = %connection_id, "Writer task ended");
        }
    }

    writer.abort();
    subscriptions.unsubscribe(&connection_id, &user_id).await;
    decrement_websocket_connections();

    info!(connection_id = %connection_id, user_id = %user_id, "WebSocket disconnected");
}

/// 큐의 페이로드를 소켓으로 보냅니다.
///
/// 닫힘 토큰이 취소되면 Close 프레임을 보내고 끝나며, 큐가 닫히거나 전송이 실패해도 끝납니다.
async fn write_queue<S>(mut sink: S, mut rx: mpsc::Receiver<Arc<str>>, closed: CancellationToken)
where
    S: Sink<Message> + Unpin,
{
    loop {
        tokio::select! {
            biased;
            _ = closed.cancelled() => {
                let frame = CloseFrame {
                    code: close_code::AWAY,
                    reason: String::from("connection closed by server").into(),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                break;
            }
            payload = rx.recv() => match payload {
                Some(payload) => {
                    if sink.send(Message::Text(payload.to_string().into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
    let _ = sink.close().await;
}

/// 클라이언트 텍스트 메시지를 처리하고 응답 목록을 반환합니다.
pub async fn process_client_message(
    subscriptions: &SubscriptionManager,
    connection: &ConnectionRef,
    user_id: &str,
    text: &str,
) -> Vec<ServerMessage> {
    let message = match ClientMessage::from_json(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(connection_id = %connection.id(), error = %e, "Invalid client message");
            return vec![ServerMessage::error("INVALID_MESSAGE", e.to_string())];
        }
    };

    match message {
        ClientMessage::Subscribe { channels } => {
            let (known, unknown) = Channel::partition(&channels);
            let mut responses = Vec::new();
            if !known.is_empty() {
                let current = subscriptions
                    .subscribe(Arc::clone(connection), user_id, &known)
                    .await;
                responses.push(ServerMessage::Subscribed { channels: current });
            }
            responses.extend(unknown_channels_error(&unknown));
            if responses.is_empty() {
                responses.push(ServerMessage::error("INVALID_CHANNEL", "채널 목록이 비어 있습니다"));
            }
            responses
        }
        ClientMessage::Unsubscribe { channels } => {
            let (known, unknown) = Channel::partition(&channels);
            let removed = subscriptions
                .unsubscribe_channels(connection.id(), &known)
                .await;
            let mut responses = vec![ServerMessage::Unsubscribed { channels: removed }];
            responses.extend(unknown_channels_error(&unknown));
            responses
        }
        ClientMessage::Ping => vec![ServerMessage::Pong {
            timestamp: Utc::now().timestamp_millis(),
        }],
    }
}

fn unknown_channels_error(unknown: &[String]) -> Option<ServerMessage> {
    if unknown.is_empty() {
        return None;
    }
    Some(ServerMessage::error(
        "INVALID_CHANNEL",
        format!("알 수 없는 채널: {}", unknown.join(", ")),
    ))
}

/// 이 연결에만 응답을 보냅니다. 실패는 다음 팬아웃에서 정리됩니다.
async fn reply(connection: &dyn Connection, message: &ServerMessage, timeout: Duration) {
    let json = match message.to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "응답 직렬화 실패");
            return;
        }
    };
    match tokio::time::timeout(timeout, connection.send(Arc::from(json))).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(connection_id = %connection.id(), error = %e, "응답 전송 실패"),
        Err(_) => debug!(connection_id = %connection.id(), "응답 전송 시간 초과"),
    }
}
