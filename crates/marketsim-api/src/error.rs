//! 통합 API 에러 응답 타입.
//!
//! 모든 API 엔드포인트에서 일관된 에러 형식을 제공합니다.

use axum::{http::StatusCode, Json};
use marketsim_core::SimError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::ValidationErrors;

/// 통합 API 에러 응답.
///
/// # 예시
///
/// ```json
/// {
///   "code": "FORMULA_REJECTED",
///   "message": "수식 거부 (import @ 0): ...",
///   "details": {"construct": "import", "position": 0},
///   "timestamp": 1738300800
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// 에러 코드 (예: "VALIDATION_ERROR", "NOT_FOUND")
    pub code: String,
    /// 사람이 읽을 수 있는 에러 메시지
    pub message: String,
    /// 추가 에러 상세 정보
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// 에러 발생 타임스탬프 (Unix timestamp)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl ApiErrorResponse {
    /// 기본 에러 생성 (타임스탬프 포함).
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            timestamp: Some(chrono::Utc::now().timestamp()),
        }
    }

    /// 상세 정보 포함 에러 생성.
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: Value,
    ) -> Self {
        Self {
            details: Some(details),
            ..Self::new(code, message)
        }
    }
}

impl std::fmt::Display for ApiErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiErrorResponse {}

/// API 핸들러 에러 타입.
pub type ApiError = (StatusCode, Json<ApiErrorResponse>);

/// API 핸들러 Result 타입 별칭.
pub type ApiResult<T> = Result<T, ApiError>;

/// 시뮬레이터 에러를 HTTP 에러로 변환합니다.
pub fn sim_error(err: SimError) -> ApiError {
    let status = match &err {
        SimError::Validation(_) | SimError::FormulaRejected { .. } | SimError::Config(_) => {
            StatusCode::BAD_REQUEST
        }
        SimError::UnknownSymbol(_) => StatusCode::NOT_FOUND,
        SimError::DuplicateSymbol(_) => StatusCode::CONFLICT,
        SimError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let body = match &err {
        SimError::FormulaRejected {
            construct,
            position,
            reason,
        } => ApiErrorResponse::with_details(
            err.code(),
            err.to_string(),
            serde_json::json!({
                "construct": construct,
                "position": position,
                "reason": reason,
            }),
        ),
        _ => ApiErrorResponse::new(err.code(), err.to_string()),
    };

    (status, Json(body))
}

/// 요청 본문 검증 실패를 400 응답으로 변환합니다.
pub fn validation_error(errors: &ValidationErrors) -> ApiError {
    let message = errors
        .field_errors()
        .iter()
        .flat_map(|(field, errors)| {
            errors.iter().map(move |e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("{}: 유효하지 않은 값", field))
            })
        })
        .collect::<Vec<_>>()
        .join("; ");
    (
        StatusCode::BAD_REQUEST,
        Json(ApiErrorResponse::new("VALIDATION_ERROR", message)),
    )
}

/// 404 응답.
pub fn not_found(message: impl Into<String>) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ApiErrorResponse::new("NOT_FOUND", message)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_response_new() {
        let error = ApiErrorResponse::new("TEST_ERROR", "Test message");
        assert_eq!(error.code, "TEST_ERROR");
        assert!(error.timestamp.is_some());
        assert!(error.details.is_none());
    }

    #[test]
    fn test_formula_rejection_carries_details() {
        let (status, Json(body)) = sim_error(SimError::FormulaRejected {
            construct: "import".into(),
            position: 0,
            reason: "허용되지 않는 구문".into(),
        });
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code, "FORMULA_REJECTED");
        let details = body.details.unwrap();
        assert_eq!(details["construct"], "import");
        assert_eq!(details["position"], 0);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            sim_error(SimError::UnknownSymbol("X".into())).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            sim_error(SimError::DuplicateSymbol("X".into())).0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            sim_error(SimError::Internal("boom".into())).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_json_skips_empty_fields() {
        let error = ApiErrorResponse {
            code: "NOT_FOUND".into(),
            message: "missing".into(),
            details: None,
            timestamp: None,
        };
        let json = serde_json::to_string(&error).unwrap();
        assert!(!json.contains("details"));
        assert!(!json.contains("timestamp"));
    }
}
