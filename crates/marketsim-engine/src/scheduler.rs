//! 틱 스케줄러.
//!
//! 단일 백그라운드 태스크가 고정 간격으로 모든 심볼을 전진시키고, 캔들을 갱신하고,
//! 등록된 리스너(브로드캐스트 등)를 호출합니다.
//!
//! # 상태 전이
//!
//! `Stopped → Starting → Running → Stopping → Stopped`
//!
//! - `start`는 멱등입니다. 실행 중이면 기존 드라이버를 그대로 두고 `false`를 반환합니다.
//! - `stop`은 드라이버를 취소하고 진행 중인 반복이 끝날 때까지 기다린 뒤 반환합니다.
//!   실행 중이 아니면 아무 일도 하지 않습니다.
//!
//! 다음 틱의 기한은 `이전 기한 + interval`로 계산하므로 처리 시간만큼 대기 시간이 줄어
//! 누적 지연이 생기지 않습니다.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use marketsim_core::{Candle, PriceTick, SimError, SimResult, Trade};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::monitor::SharedMonitor;
use crate::scenarios::ScenarioBook;
use crate::simulator::{SharedSimulator, TickOutput};

/// 공유 가능한 시나리오 저장소 타입.
pub type SharedScenarioBook = Arc<RwLock<ScenarioBook>>;

/// 라이브 틱 하나의 시간 간격 (틱 단위).
pub const LIVE_TICK_DT: f64 = 1.0;

/// 틱 이벤트 리스너.
///
/// 시뮬레이터 잠금이 풀린 뒤 호출되며, 이벤트 데이터의 소유권은 스케줄러에 있습니다.
/// 리스너 내부의 패닉은 스케줄러가 잡아서 기록합니다.
#[async_trait]
pub trait TickListener: Send + Sync {
    /// 로그용 이름.
    fn name(&self) -> &str {
        "listener"
    }

    /// 가격 갱신.
    async fn on_price(&self, tick: &PriceTick);

    /// 체결 발생.
    async fn on_trade(&self, trade: &Trade);

    /// 캔들 마감.
    async fn on_candle_closed(&self, _symbol: &str, _candle: &Candle) {}
}

/// 스케줄러 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SchedulerState::Starting,
            2 => SchedulerState::Running,
            3 => SchedulerState::Stopping,
            _ => SchedulerState::Stopped,
        }
    }
}

/// 스케줄러 상태 조회 결과.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub tick_count: u64,
    pub interval_ms: u64,
    pub listeners: usize,
}

/// 반복 한 번의 결과.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// 처리에 성공한 심볼 수
    pub processed: usize,
    /// 실패한 심볼 수
    pub failures: usize,
    /// 마감된 캔들 수
    pub closed_candles: usize,
    /// 처리 시간
    pub elapsed: Duration,
}

struct Shared {
    simulator: SharedSimulator,
    scenarios: SharedScenarioBook,
    monitor: SharedMonitor,
    listeners: StdRwLock<Vec<Arc<dyn TickListener>>>,
    state: AtomicU8,
    ticks: AtomicU64,
    interval_ms: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: SchedulerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn listeners(&self) -> Vec<Arc<dyn TickListener>> {
        match self.listeners.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

struct Driver {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// 틱 스케줄러.
pub struct TickScheduler {
    shared: Arc<Shared>,
    driver: Mutex<Option<Driver>>,
}

impl TickScheduler {
    pub fn new(
        simulator: SharedSimulator,
        scenarios: SharedScenarioBook,
        monitor: SharedMonitor,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                simulator,
                scenarios,
                monitor,
                listeners: StdRwLock::new(Vec::new()),
                state: AtomicU8::new(SchedulerState::Stopped as u8),
                ticks: AtomicU64::new(0),
                interval_ms: AtomicU64::new(0),
            }),
            driver: Mutex::new(None),
        }
    }

    /// 리스너를 등록합니다. 실행 중에도 등록할 수 있으며 다음 틱부터 호출됩니다.
    pub fn add_listener(&self, listener: Arc<dyn TickListener>) {
        let mut listeners = match self.shared.listeners.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        debug!(listener = listener.name(), "틱 리스너 등록");
        listeners.push(listener);
    }

    /// 드라이버를 시작합니다.
    ///
    /// 새로 시작했으면 `true`, 이미 실행 중이면 `false`.
    pub async fn start(&self, interval: Duration) -> SimResult<bool> {
        if interval.is_zero() {
            return Err(SimError::Config("틱 간격은 0보다 커야 합니다".into()));
        }

        let mut driver = self.driver.lock().await;
        if driver.as_ref().is_some_and(|d| !d.handle.is_finished()) {
            debug!("스케줄러가 이미 실행 중입니다");
            return Ok(false);
        }

        self.shared.set_state(SchedulerState::Starting);
        self.shared
            .interval_ms
            .store(interval.as_millis() as u64, Ordering::SeqCst);

        let token = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(drive(shared, interval, token.clone()));
        *driver = Some(Driver { token, handle });

        self.shared.set_state(SchedulerState::Running);
        info!(interval_ms = interval.as_millis() as u64, "틱 스케줄러 시작");
        Ok(true)
    }

    /// 드라이버를 멈추고 진행 중인 반복이 끝날 때까지 기다립니다.
    ///
    /// 실행 중이었으면 `true`.
    pub async fn stop(&self) -> bool {
        let mut driver = self.driver.lock().await;
        let Some(Driver { token, handle }) = driver.take() else {
            return false;
        };

        self.shared.set_state(SchedulerState::Stopping);
        token.cancel();
        if let Err(e) = handle.await {
            error!(error = %e, "틱 드라이버 종료 중 오류");
        }
        self.shared.set_state(SchedulerState::Stopped);
        info!(ticks = self.tick_count(), "틱 스케줄러 정지");
        true
    }

    /// 드라이버 없이 반복 한 번을 실행합니다.
    pub async fn tick_once(&self) -> TickReport {
        run_iteration(&self.shared).await
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    pub fn tick_count(&self) -> u64 {
        self.shared.ticks.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            state: self.state(),
            tick_count: self.tick_count(),
            interval_ms: self.shared.interval_ms.load(Ordering::SeqCst),
            listeners: self.shared.listeners().len(),
        }
    }
}

impl Drop for TickScheduler {
    fn drop(&mut self) {
        // 정지 없이 버려지면 백그라운드 태스크만 취소
        if let Ok(mut driver) = self.driver.try_lock() {
            if let Some(driver) = driver.take() {
                driver.token.cancel();
            }
        }
    }
}

/// 드라이버 루프. 취소될 때까지 끝나지 않습니다.
async fn drive(shared: Arc<Shared>, interval: Duration, token: CancellationToken) {
    let mut deadline = Instant::now();
    let mut last_tick: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => {}
        }

        let started = Instant::now();
        if let Some(prev) = last_tick {
            let gap = started.duration_since(prev);
            shared.monitor.record_tick_interval(gap.as_secs_f64() * 1_000.0);
        }
        last_tick = Some(started);

        if AssertUnwindSafe(run_iteration(&shared))
            .catch_unwind()
            .await
            .is_err()
        {
            error!("틱 반복 중 패닉, 이번 반복은 건너뜁니다");
        }

        deadline += interval;
        let now = Instant::now();
        if now > deadline + interval {
            // 한 주기 이상 뒤처지면 밀린 틱을 몰아서 실행하지 않고 기준을 다시 잡음
            warn!(
                behind_ms = now.duration_since(deadline).as_millis() as u64,
                "틱 처리 지연, 기한 재설정"
            );
            deadline = now;
        }
    }

    debug!("틱 드라이버 종료");
}

async fn run_iteration(shared: &Shared) -> TickReport {
    let started = Instant::now();
    let now = Utc::now();
    let mut outputs: Vec<TickOutput> = Vec::new();
    let mut failures = 0;

    {
        let book = shared.scenarios.read().await;
        let mut sim = shared.simulator.write().await;

        for symbol in sim.symbols() {
            let entry = book.get(&symbol);
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                sim.tick_symbol(&symbol, entry, LIVE_TICK_DT, now)
            }));
            match result {
                Ok(Ok(output)) => outputs.push(output),
                Ok(Err(e)) => {
                    failures += 1;
                    error!(symbol = %symbol, error = %e, "심볼 틱 처리 실패");
                }
                Err(_) => {
                    failures += 1;
                    error!(symbol = %symbol, "심볼 틱 처리 중 패닉");
                }
            }
        }
    }

    let listeners = shared.listeners();
    for output in &outputs {
        for listener in &listeners {
            notify(listener.as_ref(), output).await;
        }
    }

    let elapsed = started.elapsed();
    shared.ticks.fetch_add(1, Ordering::SeqCst);
    metrics::counter!("marketsim_ticks_total").increment(1);
    metrics::histogram!("marketsim_tick_duration_seconds").record(elapsed.as_secs_f64());

    TickReport {
        processed: outputs.len(),
        failures,
        closed_candles: outputs.iter().filter(|o| o.closed_candle.is_some()).count(),
        elapsed,
    }
}

async fn notify(listener: &dyn TickListener, output: &TickOutput) {
    let delivery = async {
        listener.on_price(&output.price).await;
        listener.on_trade(&output.trade).await;
        if let Some(candle) = &output.closed_candle {
            listener.on_candle_closed(&output.trade.symbol, candle).await;
        }
    };

    if AssertUnwindSafe(delivery).catch_unwind().await.is_err() {
        error!(
            listener = listener.name(),
            symbol = %output.trade.symbol,
            "리스너 호출 중 패닉"
        );
    }
}
