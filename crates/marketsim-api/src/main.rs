//! 시장 시뮬레이터 서버 진입점.
//!
//! 설정 로드 → 로깅 초기화 → 상태 구성(백필 포함) → 스케줄러 시작 → HTTP/WebSocket 서버 실행 순서로
//! 동작하며, Ctrl+C 또는 SIGTERM을 받으면 스케줄러를 정지하고 종료합니다.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use marketsim_api::{create_router, setup_metrics_recorder, AppState};
use marketsim_core::{init_logging, AppConfig, LogConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env 파일은 선택 사항
    let _ = dotenvy::dotenv();

    let config = AppConfig::load_default().context("설정 로드 실패")?;

    init_logging(LogConfig::from(&config.logging).override_from_env())
        .map_err(|e| anyhow::anyhow!("로깅 초기화 실패: {e}"))?;

    info!("Starting market simulator...");

    let metrics_handle = setup_metrics_recorder().context("Prometheus recorder 설치 실패")?;
    info!("Prometheus metrics recorder initialized");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("잘못된 서버 주소")?;
    let auto_start = config.simulator.auto_start;

    let state = Arc::new(AppState::build(config).context("애플리케이션 상태 구성 실패")?);
    info!(
        version = %state.version,
        tick_interval_ms = state.config.simulator.tick_interval_ms,
        "Application state initialized"
    );

    if auto_start {
        state
            .scheduler
            .start(state.tick_interval())
            .await
            .context("스케줄러 시작 실패")?;
    }

    let app = create_router(Arc::clone(&state), Some(metrics_handle));

    info!(%addr, "API server listening");
    info!("Metrics available at http://{}/metrics", addr);
    info!("WebSocket available at ws://{}/ws", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.shutdown.clone()))
        .await?;

    info!("Server shutdown initiated, cleaning up...");
    state.shutdown.cancel();
    state.scheduler.stop().await;

    info!("Server stopped gracefully");
    Ok(())
}

/// Graceful shutdown 시그널 대기.
///
/// Ctrl+C 또는 SIGTERM 시그널을 수신하면 종료 토큰을 취소합니다.
async fn shutdown_signal(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }

    shutdown_token.cancel();
}
