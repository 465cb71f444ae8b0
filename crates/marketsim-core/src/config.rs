//! 설정 관리.
//!
//! 이 모듈은 애플리케이션 설정을 정의하고 관리합니다.
//! 기본값 → 설정 파일(선택) → `MARKETSIM__` 환경 변수 순서로 덮어씁니다.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{SimError, SimResult};

/// 설정 파일 기본 경로.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// 애플리케이션 설정.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// 서버 설정
    pub server: ServerConfig,
    /// 시뮬레이터 설정
    pub simulator: SimulatorConfig,
    /// 확률 엔진 조정값
    pub engine: EngineTuning,
    /// 브로드캐스트 설정
    pub broadcast: BroadcastConfig,
    /// 성능 모니터 설정
    pub monitor: MonitorConfig,
    /// 로깅 설정
    pub logging: LoggingConfig,
}

/// 서버 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 바인딩할 호스트
    pub host: String,
    /// 리스닝할 포트
    pub port: u16,
    /// 요청 타임아웃 (초)
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            request_timeout_secs: 30,
        }
    }
}

/// 시뮬레이션 대상 심볼과 초기 가격.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SymbolSeed {
    /// 거래 심볼
    pub symbol: String,
    /// 초기 가격
    pub initial_price: f64,
}

impl SymbolSeed {
    pub fn new(symbol: impl Into<String>, initial_price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            initial_price,
        }
    }
}

/// 시뮬레이터 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// 틱 간격 (밀리초)
    pub tick_interval_ms: u64,
    /// 추적할 심볼 목록
    pub symbols: Vec<SymbolSeed>,
    /// 시작 시 생성할 히스토리 길이 (시간)
    pub history_hours: u32,
    /// 캔들 폭 (초)
    pub candle_width_secs: u64,
    /// 보관할 마감 캔들 최대 개수
    pub max_candles: usize,
    /// 심볼별 최근 체결 보관 개수
    pub recent_trades: usize,
    /// 백필 캔들 하나를 만드는 하위 스텝 수
    pub backfill_steps_per_candle: u32,
    /// 난수 시드 (없으면 엔트로피 사용)
    pub seed: Option<u64>,
    /// 서버 시작 시 스케줄러 자동 시작 여부
    pub auto_start: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            symbols: vec![
                SymbolSeed::new("BTCUSDT", 45_000.0),
                SymbolSeed::new("ETHUSDT", 2_500.0),
                SymbolSeed::new("SOLUSDT", 100.0),
            ],
            history_hours: 24,
            candle_width_secs: 60,
            max_candles: 2_000,
            recent_trades: 100,
            backfill_steps_per_candle: 12,
            seed: None,
            auto_start: true,
        }
    }
}

impl SimulatorConfig {
    /// 백필로 생성할 캔들 개수.
    pub fn backfill_candles(&self) -> usize {
        if self.candle_width_secs == 0 {
            return 0;
        }
        (u64::from(self.history_hours) * 3_600 / self.candle_width_secs) as usize
    }

    /// 캔들 하나에 해당하는 라이브 틱 수.
    pub fn ticks_per_candle(&self) -> f64 {
        if self.tick_interval_ms == 0 {
            return 1.0;
        }
        (self.candle_width_secs * 1_000) as f64 / self.tick_interval_ms as f64
    }
}

/// 확률 엔진의 정책 상수.
///
/// 평균 회귀 강도와 안티 패턴 교란의 모양은 정해진 공식이 없으므로 설정으로 노출합니다.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineTuning {
    /// up/down 추세일 때 드리프트에 더하는 틱당 편향
    pub trend_drift: f64,
    /// 평균 회귀 계수 (틱당)
    pub mean_reversion: f64,
    /// 안티 패턴 활성 시 부호 반전 확률
    pub anti_pattern_flip_probability: f64,
    /// 하우스 엣지 배율
    pub house_edge_scale: f64,
    /// 수식 결과가 직전 가격 대비 벗어날 수 있는 최대 배수
    pub max_formula_jump: f64,
    /// 틱당 로그 수익률 절대값 상한
    pub max_log_return: f64,
    /// 거래량 로그 정규 분포 평균 (ln 단위)
    pub volume_mu: f64,
    /// 거래량 로그 정규 분포 표준편차
    pub volume_sigma: f64,
    /// 거래량 하한
    pub volume_min: f64,
    /// 거래량 상한
    pub volume_max: f64,
    /// 가격 방향에 따른 매수 확률 편향
    pub buy_bias: f64,
}

impl EngineTuning {
    /// 검증용 (이름, 값) 목록.
    fn named_values(&self) -> [(&'static str, f64); 11] {
        [
            ("trend_drift", self.trend_drift),
            ("mean_reversion", self.mean_reversion),
            ("anti_pattern_flip_probability", self.anti_pattern_flip_probability),
            ("house_edge_scale", self.house_edge_scale),
            ("max_formula_jump", self.max_formula_jump),
            ("max_log_return", self.max_log_return),
            ("volume_mu", self.volume_mu),
            ("volume_sigma", self.volume_sigma),
            ("volume_min", self.volume_min),
            ("volume_max", self.volume_max),
            ("buy_bias", self.buy_bias),
        ]
    }
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            trend_drift: 2.5e-7,
            mean_reversion: 0.002,
            anti_pattern_flip_probability: 0.15,
            house_edge_scale: 1.0,
            max_formula_jump: 2.0,
            max_log_return: 0.75,
            volume_mu: -1.0,
            volume_sigma: 0.8,
            volume_min: 0.001,
            volume_max: 50.0,
            buy_bias: 0.1,
        }
    }
}

/// 브로드캐스트 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// 연결당 전송 타임아웃 (밀리초)
    pub send_timeout_ms: u64,
    /// 연결당 송신 큐 크기
    pub queue_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: 50,
            queue_capacity: 256,
        }
    }
}

/// 성능 모니터 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// 시리즈별 최대 샘플 수
    pub max_samples: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { max_samples: 10_000 }
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// 파일과 환경 변수에서 설정을 로드합니다.
    ///
    /// 파일이 없으면 기본값과 환경 변수만 사용합니다.
    pub fn load<P: AsRef<Path>>(path: P) -> SimResult<Self> {
        let builder = config::Config::builder()
            // 기본값으로 시작
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            // 파일에서 로드
            .add_source(config::File::from(path.as_ref()).required(false))
            // 환경 변수로 오버라이드
            .add_source(
                config::Environment::with_prefix("MARKETSIM")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// `MARKETSIM_CONFIG` 또는 기본 경로에서 설정을 로드합니다.
    pub fn load_default() -> SimResult<Self> {
        let path =
            std::env::var("MARKETSIM_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(path)
    }

    /// 설정 간 제약을 검사합니다.
    pub fn validate(&self) -> SimResult<()> {
        let sim = &self.simulator;

        if sim.tick_interval_ms == 0 {
            return Err(SimError::Config("tick_interval_ms는 0보다 커야 합니다".into()));
        }
        if sim.candle_width_secs == 0 {
            return Err(SimError::Config("candle_width_secs는 0보다 커야 합니다".into()));
        }
        if sim.backfill_steps_per_candle == 0 {
            return Err(SimError::Config(
                "backfill_steps_per_candle는 0보다 커야 합니다".into(),
            ));
        }
        if sim.max_candles < sim.backfill_candles() {
            return Err(SimError::Config(format!(
                "max_candles({})가 백필 캔들 수({})보다 작습니다",
                sim.max_candles,
                sim.backfill_candles()
            )));
        }

        let mut seen = HashSet::new();
        for seed in &sim.symbols {
            if seed.symbol.trim().is_empty() {
                return Err(SimError::Config("빈 심볼 이름".into()));
            }
            if !seed.initial_price.is_finite() || seed.initial_price <= 0.0 {
                return Err(SimError::Config(format!(
                    "{}: initial_price는 양수여야 합니다",
                    seed.symbol
                )));
            }
            if !seen.insert(seed.symbol.to_uppercase()) {
                return Err(SimError::Config(format!("중복 심볼: {}", seed.symbol)));
            }
        }

        let engine = &self.engine;
        for (name, value) in engine.named_values() {
            if !value.is_finite() {
                return Err(SimError::Config(format!("engine.{name}는 유한한 값이어야 합니다")));
            }
        }
        if !(0.0..=1.0).contains(&engine.anti_pattern_flip_probability) {
            return Err(SimError::Config(
                "anti_pattern_flip_probability는 [0, 1] 범위여야 합니다".into(),
            ));
        }
        if engine.max_formula_jump <= 1.0 {
            return Err(SimError::Config("max_formula_jump는 1보다 커야 합니다".into()));
        }
        if engine.max_log_return < engine.max_formula_jump.ln() {
            return Err(SimError::Config(
                "max_log_return은 ln(max_formula_jump) 이상이어야 합니다".into(),
            ));
        }
        if engine.volume_min <= 0.0 || engine.volume_max < engine.volume_min {
            return Err(SimError::Config("거래량 범위가 올바르지 않습니다".into()));
        }
        if engine.mean_reversion < 0.0 {
            return Err(SimError::Config("mean_reversion은 음수일 수 없습니다".into()));
        }
        if engine.volume_sigma < 0.0 {
            return Err(SimError::Config("volume_sigma는 음수일 수 없습니다".into()));
        }
        if engine.house_edge_scale < 0.0 {
            return Err(SimError::Config("house_edge_scale은 음수일 수 없습니다".into()));
        }

        if self.broadcast.queue_capacity == 0 || self.broadcast.send_timeout_ms == 0 {
            return Err(SimError::Config("broadcast 설정은 0보다 커야 합니다".into()));
        }
        if self.monitor.max_samples == 0 {
            return Err(SimError::Config("monitor.max_samples는 0보다 커야 합니다".into()));
        }

        Ok(())
    }
}
