//! 시뮬레이터 에러 타입.
//!
//! 설정 수신, 심볼 관리, 수식 검증에서 발생하는 에러를 정의합니다.
//! 틱 도중 발생하는 수치 에러는 엔진 내부에서 복구되므로 여기에 포함되지 않습니다.

use thiserror::Error;

/// 핵심 시뮬레이터 에러.
#[derive(Debug, Error)]
pub enum SimError {
    /// 설정 에러
    #[error("설정 에러: {0}")]
    Config(String),

    /// 시나리오 검증 실패
    #[error("검증 실패: {0}")]
    Validation(String),

    /// 수식이 샌드박스 검증을 통과하지 못함
    #[error("수식 거부 ({construct} @ {position}): {reason}")]
    FormulaRejected {
        /// 허용되지 않은 구성 요소
        construct: String,
        /// 소스 내 바이트 위치
        position: usize,
        /// 사람이 읽을 수 있는 사유
        reason: String,
    },

    /// 등록되지 않은 심볼
    #[error("알 수 없는 심볼: {0}")]
    UnknownSymbol(String),

    /// 이미 등록된 심볼
    #[error("중복 심볼: {0}")]
    DuplicateSymbol(String),

    /// 내부 에러
    #[error("내부 에러: {0}")]
    Internal(String),
}

/// 시뮬레이터 작업을 위한 Result 타입.
pub type SimResult<T> = Result<T, SimError>;

impl SimError {
    /// 에러 코드 문자열을 반환합니다.
    pub fn code(&self) -> &'static str {
        match self {
            SimError::Config(_) => "CONFIG_ERROR",
            SimError::Validation(_) => "VALIDATION_ERROR",
            SimError::FormulaRejected { .. } => "FORMULA_REJECTED",
            SimError::UnknownSymbol(_) => "NOT_FOUND",
            SimError::DuplicateSymbol(_) => "CONFLICT",
            SimError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<config::ConfigError> for SimError {
    fn from(err: config::ConfigError) -> Self {
        SimError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(SimError::Validation("x".into()).code(), "VALIDATION_ERROR");
        assert_eq!(SimError::UnknownSymbol("BTC".into()).code(), "NOT_FOUND");
    }

    #[test]
    fn test_formula_rejected_display() {
        let err = SimError::FormulaRejected {
            construct: "attribute access".into(),
            position: 2,
            reason: "'.' 는 허용되지 않습니다".into(),
        };
        let text = err.to_string();
        assert!(text.contains("attribute access"));
        assert!(text.contains('2'));
    }
}
