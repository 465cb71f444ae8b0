//! WebSocket 구독 관리.
//!
//! 연결별 사용자 ID와 구독 채널을 관리하고 메시지를 팬아웃합니다.
//!
//! - `publish`는 해당 채널을 구독한 연결에만 전달합니다 (채널이 없으면 전체).
//! - 연결별 전송은 동시에 진행되며 각각 타임아웃이 적용됩니다.
//! - 전송에 실패하거나 타임아웃된 연결은 모든 채널에서 제거되고, 나머지 연결로의
//!   전달은 같은 호출 안에서 계속됩니다.
//! - 스케줄러가 `publish`를 순서대로 await하므로 한 채널 안에서 연결별 전달 순서는
//!   호출 순서와 같습니다.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use marketsim_core::BroadcastConfig;
use marketsim_engine::SharedMonitor;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use super::messages::{Channel, ServerMessage};
use crate::metrics::{record_broadcast, record_dropped_connection};

/// 연결 하나로의 전송 실패.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("연결이 닫혔습니다")]
    Closed,
    #[error("전송 시간 초과")]
    Timeout,
    #[error("전송 실패: {0}")]
    Io(String),
}

impl DeliveryError {
    /// 메트릭 레이블.
    pub fn label(&self) -> &'static str {
        match self {
            DeliveryError::Closed => "closed",
            DeliveryError::Timeout => "timeout",
            DeliveryError::Io(_) => "io",
        }
    }
}

/// 메시지를 받을 수 있는 연결 핸들.
///
/// 직렬화된 페이로드 하나를 여러 연결이 공유하므로 `Arc<str>`로 전달됩니다.
#[async_trait]
pub trait Connection: Send + Sync {
    /// 연결 ID (프로세스 내 고유)
    fn id(&self) -> &str;

    /// 페이로드 하나를 전송합니다.
    async fn send(&self, payload: Arc<str>) -> Result<(), DeliveryError>;

    /// 매니저가 연결을 제거할 때 호출됩니다. 소켓을 가진 구현은 여기서 닫힘을 알립니다.
    fn close(&self) {}
}

/// 공유 연결 핸들.
pub type ConnectionRef = Arc<dyn Connection>;

struct Registration {
    connection: ConnectionRef,
    user_id: String,
    channels: BTreeSet<Channel>,
}

/// 팬아웃 한 번의 결과.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// 전달 성공 연결 수
    pub delivered: usize,
    /// 실패로 제거된 연결 수
    pub dropped: usize,
}

/// 구독 관리자.
pub struct SubscriptionManager {
    registrations: RwLock<HashMap<String, Registration>>,
    send_timeout: Duration,
    monitor: SharedMonitor,
}

/// 공유 가능한 구독 관리자 타입.
pub type SharedSubscriptionManager = Arc<SubscriptionManager>;

impl SubscriptionManager {
    pub fn new(send_timeout: Duration, monitor: SharedMonitor) -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
            send_timeout,
            monitor,
        }
    }

    pub fn from_config(config: &BroadcastConfig, monitor: SharedMonitor) -> Self {
        Self::new(Duration::from_millis(config.send_timeout_ms.max(1)), monitor)
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// 연결을 등록하고 채널을 구독합니다.
    ///
    /// 이미 등록된 연결이면 채널을 추가합니다. 현재 구독 중인 채널 전체를 반환합니다.
    pub async fn subscribe(
        &self,
        connection: ConnectionRef,
        user_id: &str,
        channels: &[Channel],
    ) -> Vec<Channel> {
        let mut registrations = self.registrations.write().await;
        let id = connection.id().to_string();
        let registration = registrations
            .entry(id.clone())
            .or_insert_with(|| Registration {
                connection,
                user_id: user_id.to_string(),
                channels: BTreeSet::new(),
            });
        registration.channels.extend(channels.iter().copied());

        debug!(
            connection_id = %id,
            user_id = %registration.user_id,
            channels = ?registration.channels,
            "채널 구독"
        );
        registration.channels.iter().copied().collect()
    }

    /// 연결을 모든 채널에서 제거합니다.
    ///
    /// 등록된 사용자 ID가 다르면 제거하지 않고 `false`를 반환합니다.
    pub async fn unsubscribe(&self, connection_id: &str, user_id: &str) -> bool {
        let mut registrations = self.registrations.write().await;
        let owner = registrations
            .get(connection_id)
            .map(|registration| registration.user_id.clone());
        match owner {
            Some(owner) if owner == user_id => {
                registrations.remove(connection_id);
                debug!(connection_id = %connection_id, user_id = %user_id, "연결 구독 해제");
                true
            }
            Some(owner) => {
                warn!(
                    connection_id = %connection_id,
                    expected = %owner,
                    actual = %user_id,
                    "사용자 ID 불일치로 구독 해제 거부"
                );
                false
            }
            None => false,
        }
    }

    /// 일부 채널만 구독 해제합니다. 실제로 해제된 채널을 반환합니다.
    pub async fn unsubscribe_channels(
        &self,
        connection_id: &str,
        channels: &[Channel],
    ) -> Vec<Channel> {
        let mut registrations = self.registrations.write().await;
        let Some(registration) = registrations.get_mut(connection_id) else {
            return Vec::new();
        };
        channels
            .iter()
            .copied()
            .filter(|channel| registration.channels.remove(channel))
            .collect()
    }

    /// 채널 구독자에게 메시지를 전달합니다. 채널이 없으면 모든 연결에 전달합니다.
    pub async fn publish(&self, message: &ServerMessage, channel: Option<Channel>) -> DeliveryReport {
        let targets: Vec<ConnectionRef> = {
            let registrations = self.registrations.read().await;
            registrations
                .values()
                .filter(|r| channel.map_or(true, |c| r.channels.contains(&c)))
                .map(|r| Arc::clone(&r.connection))
                .collect()
        };
        self.deliver(message, targets).await
    }

    /// 한 사용자의 연결에만 메시지를 전달합니다.
    ///
    /// 채널이 주어지면 그 채널을 구독한 연결로 한정합니다.
    pub async fn send_direct(
        &self,
        message: &ServerMessage,
        user_id: &str,
        channel: Option<Channel>,
    ) -> DeliveryReport {
        let targets: Vec<ConnectionRef> = {
            let registrations = self.registrations.read().await;
            registrations
                .values()
                .filter(|r| r.user_id == user_id)
                .filter(|r| channel.map_or(true, |c| r.channels.contains(&c)))
                .map(|r| Arc::clone(&r.connection))
                .collect()
        };
        self.deliver(message, targets).await
    }

    async fn deliver(&self, message: &ServerMessage, targets: Vec<ConnectionRef>) -> DeliveryReport {
        if targets.is_empty() {
            return DeliveryReport::default();
        }

        let payload: Arc<str> = match message.to_json() {
            Ok(json) => Arc::from(json),
            Err(e) => {
                error!(error = %e, "메시지 직렬화 실패");
                return DeliveryReport::default();
            }
        };
        let bytes = payload.len();
        let timeout = self.send_timeout;

        let started = Instant::now();
        let outcomes = join_all(targets.iter().map(|connection| {
            let payload = Arc::clone(&payload);
            async move {
                match tokio::time::timeout(timeout, connection.send(payload)).await {
                    Ok(result) => result,
                    Err(_) => Err(DeliveryError::Timeout),
                }
            }
        }))
        .await;
        let elapsed = started.elapsed();

        let failed: Vec<(String, DeliveryError)> = targets
            .iter()
            .zip(outcomes)
            .filter_map(|(connection, outcome)| {
                outcome.err().map(|e| (connection.id().to_string(), e))
            })
            .collect();
        if !failed.is_empty() {
            self.drop_connections(&failed).await;
        }

        let kind = message.kind();
        self.monitor.record_latency(elapsed.as_secs_f64() * 1_000.0);
        // 크기 통계는 가격 업데이트만
        if matches!(message, ServerMessage::PriceUpdate { .. }) {
            self.monitor.record_message_size(bytes);
        }
        record_broadcast(kind, elapsed.as_secs_f64(), bytes);

        DeliveryReport {
            delivered: targets.len() - failed.len(),
            dropped: failed.len(),
        }
    }

    async fn drop_connections(&self, failed: &[(String, DeliveryError)]) {
        let mut registrations = self.registrations.write().await;
        for (id, reason) in failed {
            if let Some(registration) = registrations.remove(id) {
                registration.connection.close();
                warn!(connection_id = %id, reason = %reason, "전송 실패 연결 제거");
                record_dropped_connection(reason.label());
            }
        }
    }

    /// 등록된 연결 수.
    pub async fn connection_count(&self) -> usize {
        self.registrations.read().await.len()
    }

    /// 특정 채널 구독자 수.
    pub async fn subscriber_count(&self, channel: Channel) -> usize {
        self.registrations
            .read()
            .await
            .values()
            .filter(|r| r.channels.contains(&channel))
            .count()
    }

    /// 연결이 구독 중인 채널.
    pub async fn channels_of(&self, connection_id: &str) -> Vec<Channel> {
        self.registrations
            .read()
            .await
            .get(connection_id)
            .map(|r| r.channels.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn is_registered(&self, connection_id: &str) -> bool {
        self.registrations.read().await.contains_key(connection_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketsim_engine::PerformanceMonitor;
    use std::sync::Mutex;

    struct Recorder {
        id: String,
        received: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                received: Mutex::new(Vec::new()),
            })
        }

        fn count(&self) -> usize {
            self.received.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Connection for Recorder {
        fn id(&self) -> &str {
            &self.id
        }

        async fn send(&self, payload: Arc<str>) -> Result<(), DeliveryError> {
            self.received.lock().unwrap().push(payload.to_string());
            Ok(())
        }
    }

    fn manager() -> SubscriptionManager {
        SubscriptionManager::new(
            Duration::from_millis(50),
            Arc::new(PerformanceMonitor::new(100)),
        )
    }

    #[tokio::test]
    async fn test_subscribe_merges_channels() {
        let manager = manager();
        let conn = Recorder::new("c1");

        manager.subscribe(conn.clone(), "u1", &[Channel::Prices]).await;
        let channels = manager.subscribe(conn, "u1", &[Channel::Trades]).await;

        assert_eq!(channels, vec![Channel::Prices, Channel::Trades]);
        assert_eq!(manager.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_requires_matching_user() {
        let manager = manager();
        manager.subscribe(Recorder::new("c1"), "u1", &[Channel::Prices]).await;

        assert!(!manager.unsubscribe("c1", "someone-else").await);
        assert!(manager.is_registered("c1").await);
        assert!(manager.unsubscribe("c1", "u1").await);
        assert!(!manager.is_registered("c1").await);
        assert!(!manager.unsubscribe("c1", "u1").await);
    }

    #[tokio::test]
    async fn test_unsubscribe_channels_keeps_registration() {
        let manager = manager();
        manager
            .subscribe(Recorder::new("c1"), "u1", &[Channel::Prices, Channel::Trades])
            .await;

        let removed = manager
            .unsubscribe_channels("c1", &[Channel::Trades, Channel::Candles])
            .await;

        assert_eq!(removed, vec![Channel::Trades]);
        assert_eq!(manager.channels_of("c1").await, vec![Channel::Prices]);
    }

    #[tokio::test]
    async fn test_publish_without_channel_reaches_everyone() {
        let manager = manager();
        let a = Recorder::new("a");
        let b = Recorder::new("b");
        manager.subscribe(a.clone(), "u1", &[Channel::Prices]).await;
        manager.subscribe(b.clone(), "u2", &[Channel::Candles]).await;

        let report = manager.publish(&ServerMessage::error("NOTICE", "hi"), None).await;

        assert_eq!(report.delivered, 2);
        assert_eq!(a.count(), 1);
        assert_eq!(b.count(), 1);
    }

    #[tokio::test]
    async fn test_send_direct_targets_user() {
        let manager = manager();
        let a = Recorder::new("a");
        let b = Recorder::new("b");
        let c = Recorder::new("c");
        manager.subscribe(a.clone(), "alice", &[Channel::Prices]).await;
        manager.subscribe(b.clone(), "alice", &[Channel::Trades]).await;
        manager.subscribe(c.clone(), "bob", &[Channel::Prices]).await;

        let msg = ServerMessage::error("NOTICE", "direct");
        manager.send_direct(&msg, "alice", None).await;
        manager.send_direct(&msg, "alice", Some(Channel::Prices)).await;

        assert_eq!(a.count(), 2);
        assert_eq!(b.count(), 1);
        assert_eq!(c.count(), 0);
    }

    #[tokio::test]
    async fn test_publish_with_no_targets_records_nothing() {
        let monitor = Arc::new(PerformanceMonitor::new(100));
        let manager = SubscriptionManager::new(Duration::from_millis(50), monitor.clone());

        let report = manager
            .publish(&ServerMessage::error("X", "y"), Some(Channel::Prices))
            .await;

        assert_eq!(report, DeliveryReport::default());
        assert_eq!(monitor.get_stats().count, 0);
    }
}
