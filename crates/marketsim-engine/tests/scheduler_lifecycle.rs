//! 틱 스케줄러 수명 주기 및 주기 테스트.
//!
//! 대부분 tokio의 정지된 시계(`start_paused`)로 실행되어 시간 흐름이 결정적입니다.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use marketsim_core::{EngineTuning, PriceTick, Scenario, SimulatorConfig, Trade};
use marketsim_engine::{
    MarketSimulator, PerformanceMonitor, ScenarioBook, SchedulerState, SharedMonitor,
    TickListener, TickScheduler,
};
use tokio::sync::RwLock;

fn build(symbols: &[(&str, f64)]) -> (TickScheduler, SharedMonitor) {
    let config = SimulatorConfig {
        history_hours: 1,
        seed: Some(21),
        ..Default::default()
    };
    let book = ScenarioBook::new(Scenario::default()).unwrap();
    let mut sim = MarketSimulator::new(&config, EngineTuning::default());
    for (symbol, price) in symbols {
        sim.add_symbol(symbol, *price, book.default_entry(), Utc::now())
            .unwrap();
    }

    let monitor: SharedMonitor = Arc::new(PerformanceMonitor::new(1_000));
    let scheduler = TickScheduler::new(
        sim.into_shared(),
        Arc::new(RwLock::new(book)),
        Arc::clone(&monitor),
    );
    (scheduler, monitor)
}

#[derive(Default)]
struct CountingListener {
    prices: AtomicUsize,
    trades: AtomicUsize,
}

#[async_trait]
impl TickListener for CountingListener {
    async fn on_price(&self, _tick: &PriceTick) {
        self.prices.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_trade(&self, _trade: &Trade) {
        self.trades.fetch_add(1, Ordering::SeqCst);
    }
}

/// 가격 이벤트마다 일정 시간 멈추는 리스너.
struct SlowListener(Duration);

#[async_trait]
impl TickListener for SlowListener {
    async fn on_price(&self, _tick: &PriceTick) {
        tokio::time::sleep(self.0).await;
    }

    async fn on_trade(&self, _trade: &Trade) {}
}

struct PanickingListener;

#[async_trait]
impl TickListener for PanickingListener {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn on_price(&self, _tick: &PriceTick) {
        panic!("listener failure");
    }

    async fn on_trade(&self, _trade: &Trade) {}
}

#[tokio::test]
async fn test_stop_before_start_is_noop() {
    let (scheduler, _) = build(&[("BTCUSDT", 45_000.0)]);
    assert!(!scheduler.stop().await);
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
}

#[tokio::test]
async fn test_zero_interval_rejected() {
    let (scheduler, _) = build(&[("BTCUSDT", 45_000.0)]);
    assert!(scheduler.start(Duration::ZERO).await.is_err());
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_start_is_idempotent_and_stop_twice_is_noop() {
    let (scheduler, _) = build(&[("BTCUSDT", 45_000.0)]);

    assert!(scheduler.start(Duration::from_millis(100)).await.unwrap());
    assert!(!scheduler.start(Duration::from_millis(100)).await.unwrap());
    assert_eq!(scheduler.state(), SchedulerState::Running);

    tokio::time::sleep(Duration::from_millis(250)).await;

    assert!(scheduler.stop().await);
    assert!(!scheduler.stop().await);
    assert_eq!(scheduler.state(), SchedulerState::Stopped);

    let after_stop = scheduler.tick_count();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(scheduler.tick_count(), after_stop);

    // 정지 후 재시작 가능
    assert!(scheduler.start(Duration::from_millis(100)).await.unwrap());
    assert!(scheduler.stop().await);
}

#[tokio::test(start_paused = true)]
async fn test_cadence_matches_interval() {
    let (scheduler, monitor) = build(&[("BTCUSDT", 45_000.0), ("ETHUSDT", 2_500.0)]);

    // 첫 틱은 시작 즉시, 이후 100ms마다. 600ms 창의 끝 틱과 겹치지 않도록 650ms에 정지
    scheduler.start(Duration::from_millis(100)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(650)).await;
    scheduler.stop().await;

    assert_eq!(scheduler.tick_count(), 7);

    let interval = monitor.tick_interval_stats();
    assert_eq!(interval.count, 6);
    assert!(
        (99.0..=101.0).contains(&interval.mean),
        "mean interval = {}",
        interval.mean
    );
}

#[tokio::test(start_paused = true)]
async fn test_processing_time_does_not_accumulate_drift() {
    let (scheduler, monitor) = build(&[("BTCUSDT", 45_000.0)]);
    scheduler.add_listener(Arc::new(SlowListener(Duration::from_millis(40))));

    scheduler.start(Duration::from_millis(100)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1_050)).await;
    scheduler.stop().await;

    let interval = monitor.tick_interval_stats();
    assert!(
        (95.0..=105.0).contains(&interval.mean),
        "mean interval = {}",
        interval.mean
    );
    assert!(scheduler.tick_count() >= 10);
}

#[tokio::test]
async fn test_listeners_receive_every_symbol() {
    let (scheduler, _) = build(&[("BTCUSDT", 45_000.0), ("ETHUSDT", 2_500.0), ("SOLUSDT", 100.0)]);
    let listener = Arc::new(CountingListener::default());
    scheduler.add_listener(listener.clone());

    let report = scheduler.tick_once().await;

    assert_eq!(report.processed, 3);
    assert_eq!(report.failures, 0);
    assert_eq!(listener.prices.load(Ordering::SeqCst), 3);
    assert_eq!(listener.trades.load(Ordering::SeqCst), 3);
    assert_eq!(scheduler.tick_count(), 1);
}

#[tokio::test]
async fn test_panicking_listener_does_not_stop_delivery() {
    let (scheduler, _) = build(&[("BTCUSDT", 45_000.0), ("ETHUSDT", 2_500.0)]);
    let counter = Arc::new(CountingListener::default());
    scheduler.add_listener(Arc::new(PanickingListener));
    scheduler.add_listener(counter.clone());

    for _ in 0..3 {
        let report = scheduler.tick_once().await;
        assert_eq!(report.processed, 2);
    }

    assert_eq!(counter.prices.load(Ordering::SeqCst), 6);
    assert_eq!(scheduler.tick_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_running_loop_survives_panicking_listener() {
    let (scheduler, _) = build(&[("BTCUSDT", 45_000.0)]);
    scheduler.add_listener(Arc::new(PanickingListener));

    scheduler.start(Duration::from_millis(100)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(450)).await;

    assert!(scheduler.is_running());
    assert!(scheduler.tick_count() >= 4);
    assert!(scheduler.stop().await);
}

#[tokio::test]
async fn test_status_reports_configuration() {
    let (scheduler, _) = build(&[("BTCUSDT", 45_000.0)]);
    scheduler.add_listener(Arc::new(CountingListener::default()));

    let status = scheduler.status();
    assert_eq!(status.state, SchedulerState::Stopped);
    assert_eq!(status.listeners, 1);
    assert_eq!(status.tick_count, 0);
}
