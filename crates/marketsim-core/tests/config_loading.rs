//! 설정 파일 로딩 통합 테스트.

use marketsim_core::{AppConfig, SimError};
use std::io::Write;

fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("marketsim-{}-{}.toml", name, std::process::id()));
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    path
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let config = AppConfig::load("/nonexistent/marketsim.toml").unwrap();
    assert_eq!(config.server.port, 3000);
    assert_eq!(config.simulator.tick_interval_ms, 100);
    assert_eq!(config.simulator.symbols.len(), 3);
}

#[test]
fn test_load_file_overrides_sections() {
    let path = write_temp(
        "override",
        r#"
[server]
port = 8080

[simulator]
tick_interval_ms = 250
history_hours = 2
max_candles = 500
seed = 42

[[simulator.symbols]]
symbol = "DOGEUSDT"
initial_price = 0.12

[engine]
mean_reversion = 0.01
"#,
    );

    let config = AppConfig::load(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(config.server.port, 8080);
    assert_eq!(config.simulator.tick_interval_ms, 250);
    assert_eq!(config.simulator.seed, Some(42));
    assert_eq!(config.simulator.symbols.len(), 1);
    assert_eq!(config.simulator.symbols[0].symbol, "DOGEUSDT");
    assert_eq!(config.simulator.backfill_candles(), 120);
    assert_eq!(config.engine.mean_reversion, 0.01);
    // 지정하지 않은 값은 기본값 유지
    assert_eq!(config.engine.anti_pattern_flip_probability, 0.15);
    assert_eq!(config.broadcast.send_timeout_ms, 50);
}

#[test]
fn test_load_rejects_invalid_file() {
    let path = write_temp(
        "invalid",
        r#"
[simulator]
tick_interval_ms = 0
"#,
    );

    let result = AppConfig::load(&path);
    std::fs::remove_file(&path).ok();

    assert!(matches!(result, Err(SimError::Config(_))));
}
