//! Prometheus 메트릭 설정 및 유틸리티.
//!
//! 틱, 브로드캐스트, WebSocket 연결 메트릭을 수집하고 `/metrics` 엔드포인트로 노출합니다.
//! 틱 관련 카운터와 수식 대체 카운터는 엔진 크레이트에서 직접 기록합니다.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Prometheus 메트릭 레코더를 설치하고 핸들을 반환합니다.
///
/// 레코더가 이미 설치되어 있으면 에러를 반환합니다.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("marketsim_broadcast_latency_seconds".to_string()),
            &[0.0005, 0.001, 0.0025, 0.005, 0.01, 0.02, 0.05, 0.1],
        )?
        .set_buckets_for_metric(
            Matcher::Full("marketsim_tick_duration_seconds".to_string()),
            &[0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1],
        )?
        .set_buckets_for_metric(
            Matcher::Full("marketsim_message_bytes".to_string()),
            &[64.0, 128.0, 192.0, 256.0, 512.0, 1024.0],
        )?
        .install_recorder()
}

/// 팬아웃 한 번의 지연과 메시지 크기를 메시지 타입별로 기록.
pub fn record_broadcast(kind: &'static str, latency_secs: f64, bytes: usize) {
    histogram!("marketsim_broadcast_latency_seconds", "type" => kind).record(latency_secs);
    histogram!("marketsim_message_bytes", "type" => kind).record(bytes as f64);
}

/// 전송 실패로 제거된 연결 카운터 증가.
pub fn record_dropped_connection(reason: &'static str) {
    counter!("marketsim_dropped_connections_total", "reason" => reason).increment(1);
}

/// WebSocket 연결 수 증가.
pub fn increment_websocket_connections() {
    gauge!("marketsim_websocket_connections").increment(1.0);
}

/// WebSocket 연결 수 감소.
pub fn decrement_websocket_connections() {
    gauge!("marketsim_websocket_connections").decrement(1.0);
}
