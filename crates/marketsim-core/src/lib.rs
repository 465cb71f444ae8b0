//! # Marketsim Core
//!
//! 시장 시뮬레이터의 핵심 도메인 모델 및 타입을 제공합니다.
//!
//! 이 크레이트는 시뮬레이터 전반에서 사용되는 기본 타입을 제공합니다:
//! - 심볼 상태 및 시나리오 정의
//! - 캔들, 체결, 호가창 구조체
//! - 설정 관리
//! - 로깅 인프라

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;

pub use config::*;
pub use domain::*;
pub use error::*;
pub use logging::*;
