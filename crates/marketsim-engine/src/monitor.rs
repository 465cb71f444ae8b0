//! 성능 모니터.
//!
//! 브로드캐스트 지연, 메시지 크기, 틱 간격을 메모리 내 샘플로 기록하고 요약 통계를 계산합니다.
//! 시리즈마다 최대 샘플 수가 정해져 있으며 가득 차면 가장 오래된 샘플부터 버립니다.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::error;

/// 기본 시리즈별 최대 샘플 수.
pub const DEFAULT_MAX_SAMPLES: usize = 10_000;

/// 요약 통계.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub p95: f64,
}

impl SeriesStats {
    /// 샘플 집합에서 통계를 계산합니다. 비어 있으면 모두 0입니다.
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a f64>) -> Self {
        let mut sorted: Vec<f64> = samples.into_iter().copied().collect();
        if sorted.is_empty() {
            return Self::default();
        }
        sorted.sort_by(|a, b| a.total_cmp(b));

        let count = sorted.len();
        let sum: f64 = sorted.iter().sum();
        let median = if count % 2 == 0 {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        } else {
            sorted[count / 2]
        };
        // nearest-rank
        let rank = ((0.95 * count as f64).ceil() as usize).clamp(1, count);

        Self {
            count,
            min: sorted[0],
            max: sorted[count - 1],
            mean: sum / count as f64,
            median,
            p95: sorted[rank - 1],
        }
    }
}

/// 전체 성능 통계.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    /// 브로드캐스트 지연 (밀리초)
    pub latency_ms: SeriesStats,
    /// 직렬화된 메시지 크기 (바이트)
    pub message_bytes: SeriesStats,
    /// 틱 간격 (밀리초)
    pub tick_interval_ms: SeriesStats,
}

#[derive(Debug, Default)]
struct Samples {
    latency: VecDeque<f64>,
    message_size: VecDeque<f64>,
    tick_interval: VecDeque<f64>,
}

/// 성능 모니터.
#[derive(Debug)]
pub struct PerformanceMonitor {
    max_samples: usize,
    inner: RwLock<Samples>,
}

/// 공유 가능한 성능 모니터 타입.
pub type SharedMonitor = Arc<PerformanceMonitor>;

impl PerformanceMonitor {
    pub fn new(max_samples: usize) -> Self {
        Self {
            max_samples: max_samples.max(1),
            inner: RwLock::new(Samples::default()),
        }
    }

    pub fn record_latency(&self, ms: f64) {
        self.push(|s| &mut s.latency, ms);
    }

    /// 가격 업데이트 한 건의 직렬화 크기.
    pub fn record_message_size(&self, bytes: usize) {
        self.push(|s| &mut s.message_size, bytes as f64);
    }

    pub fn record_tick_interval(&self, ms: f64) {
        self.push(|s| &mut s.tick_interval, ms);
    }

    /// 모든 샘플을 지웁니다 (새 측정 구간 시작).
    pub fn reset(&self) {
        let mut inner = self.write();
        inner.latency.clear();
        inner.message_size.clear();
        inner.tick_interval.clear();
    }

    /// 브로드캐스트 지연 통계.
    pub fn get_stats(&self) -> SeriesStats {
        SeriesStats::from_samples(&self.read().latency)
    }

    pub fn message_size_stats(&self) -> SeriesStats {
        SeriesStats::from_samples(&self.read().message_size)
    }

    pub fn tick_interval_stats(&self) -> SeriesStats {
        SeriesStats::from_samples(&self.read().tick_interval)
    }

    /// 세 시리즈 전체 통계.
    pub fn snapshot(&self) -> PerformanceStats {
        let inner = self.read();
        PerformanceStats {
            latency_ms: SeriesStats::from_samples(&inner.latency),
            message_bytes: SeriesStats::from_samples(&inner.message_size),
            tick_interval_ms: SeriesStats::from_samples(&inner.tick_interval),
        }
    }

    fn push(&self, series: impl FnOnce(&mut Samples) -> &mut VecDeque<f64>, value: f64) {
        if !value.is_finite() {
            return;
        }
        let max = self.max_samples;
        let mut inner = self.write();
        let samples = series(&mut *inner);
        while samples.len() >= max {
            samples.pop_front();
        }
        samples.push_back(value);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Samples> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("PerformanceMonitor RwLock poisoned (read), recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Samples> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("PerformanceMonitor RwLock poisoned (write), recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SAMPLES)
    }
}
