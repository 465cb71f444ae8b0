//! 모든 핸들러에서 공유되는 애플리케이션 상태.
//!
//! 시뮬레이터, 시나리오 저장소, 성능 모니터, 구독 관리자, 스케줄러를 프로세스 시작 시 한 번
//! 생성해 Arc로 공유합니다. 전역 싱글턴은 사용하지 않습니다.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use marketsim_core::{AppConfig, Scenario, SimResult};
use marketsim_engine::{
    MarketSimulator, PerformanceMonitor, ScenarioBook, SharedMonitor, SharedScenarioBook,
    SharedSimulator, TickScheduler,
};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::websocket::{BroadcastListener, SharedSubscriptionManager, SubscriptionManager};

/// 애플리케이션 공유 상태.
#[derive(Clone)]
pub struct AppState {
    /// 로드된 설정
    pub config: Arc<AppConfig>,
    /// 심볼 상태, 캔들, 최근 체결
    pub simulator: SharedSimulator,
    /// 기본 시나리오와 심볼별 재정의
    pub scenarios: SharedScenarioBook,
    /// 브로드캐스트 지연/크기, 틱 간격 통계
    pub monitor: SharedMonitor,
    /// WebSocket 구독 관리자
    pub subscriptions: SharedSubscriptionManager,
    /// 틱 스케줄러
    pub scheduler: Arc<TickScheduler>,
    /// 서버 버전
    pub version: String,
    /// 시작 시각
    pub started_at: Instant,
    /// 프로세스 종료 신호. 취소되면 열린 WebSocket이 Close 프레임을 보내고 끝납니다.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// 설정으로부터 모든 구성 요소를 만들고 설정된 심볼의 히스토리를 백필합니다.
    ///
    /// 스케줄러는 시작하지 않습니다.
    pub fn build(config: AppConfig) -> SimResult<Self> {
        config.validate()?;

        let book = ScenarioBook::new(Scenario::default())?;
        let mut simulator = MarketSimulator::new(&config.simulator, config.engine.clone());
        let now = Utc::now();
        for seed in &config.simulator.symbols {
            simulator.add_symbol(&seed.symbol, seed.initial_price, book.get(&seed.symbol), now)?;
        }
        info!(symbols = simulator.symbol_count(), "시뮬레이터 초기화 완료");

        let monitor: SharedMonitor = Arc::new(PerformanceMonitor::new(config.monitor.max_samples));
        let subscriptions: SharedSubscriptionManager = Arc::new(SubscriptionManager::from_config(
            &config.broadcast,
            Arc::clone(&monitor),
        ));
        let simulator = simulator.into_shared();
        let scenarios: SharedScenarioBook = Arc::new(RwLock::new(book));

        let scheduler = Arc::new(TickScheduler::new(
            Arc::clone(&simulator),
            Arc::clone(&scenarios),
            Arc::clone(&monitor),
        ));
        scheduler.add_listener(Arc::new(BroadcastListener::new(Arc::clone(&subscriptions))));

        Ok(Self {
            config: Arc::new(config),
            simulator,
            scenarios,
            monitor,
            subscriptions,
            scheduler,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Instant::now(),
            shutdown: CancellationToken::new(),
        })
    }

    /// 설정된 틱 간격.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.config.simulator.tick_interval_ms)
    }

    /// 서버 업타임 (초).
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
