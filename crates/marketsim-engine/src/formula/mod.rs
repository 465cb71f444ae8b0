//! 수식 샌드박스.
//!
//! 사용자 정의 가격 수식을 안전하게 평가합니다. 처리 단계:
//!
//! 1. [`lexer`] - 허용 문자/토큰만 통과 (속성 접근, 문자열, 대입 등은 여기서 거부)
//! 2. [`parser`] - 제한된 문법의 재귀 하강 파서 (키워드, 깊이 제한)
//! 3. [`validate`] - 구문 트리를 화이트리스트와 대조해 타입이 있는 트리로 변환
//! 4. [`eval`] - 검증된 트리를 직접 해석
//!
//! 검증은 설정 시점에 한 번만 수행되며 [`CompiledFormula`]는 [`CompiledFormula::compile`]로만
//! 만들 수 있으므로, 검증되지 않은 수식이 평가 단계에 도달할 방법이 없습니다.
//!
//! # 사용 가능한 이름
//!
//! - 변수: `price`, `dt`, `trend`, `up`, `down`, `sideways`, `target`, `has_target`,
//!   `drift`, `volatility`, `pi`, `e`, `True`, `False`
//! - 함수: `abs`, `min`, `max`, `round`, `floor`, `ceil`, `sqrt`, `pow`, `exp`, `log`,
//!   `sin`, `cos`, `tan`, `clamp`, `random`, `uniform`, `normal`
//!
//! ```
//! use marketsim_engine::formula::{CompiledFormula, FormulaContext};
//!
//! let formula = CompiledFormula::compile("price * (1 + drift * dt)").unwrap();
//! let next = formula.evaluate(&FormulaContext::new(100.0, 1.0)).unwrap();
//! assert_eq!(next, 100.0);
//!
//! assert!(CompiledFormula::compile("__import__('os').system('id')").is_err());
//! ```

pub mod ast;
mod eval;
pub mod lexer;
pub mod parser;
mod validate;

use std::fmt;

use marketsim_core::{SimError, Trend};
use thiserror::Error;

use self::ast::Expr;

/// 수식 최대 길이 (문자).
pub const MAX_FORMULA_LEN: usize = 512;

/// 최대 중첩 깊이.
pub const MAX_DEPTH: usize = 32;

/// 최대 노드 수.
pub const MAX_NODES: usize = 256;

/// 수식 검증 에러.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormulaError {
    #[error("수식이 비어 있습니다")]
    Empty,
    #[error("수식 길이 {len}자가 한도 {max}자를 초과합니다")]
    TooLong { len: usize, max: usize },
    #[error("허용되지 않은 문자 '{ch}' (위치 {position})")]
    UnexpectedChar { ch: char, position: usize },
    #[error("허용되지 않은 구문: {construct} (위치 {position})")]
    Disallowed { construct: String, position: usize },
    #[error("예상치 못한 토큰 '{found}' (위치 {position})")]
    UnexpectedToken { found: String, position: usize },
    #[error("수식이 중간에 끝났습니다 (위치 {position})")]
    UnexpectedEnd { position: usize },
    #[error("알 수 없는 이름 '{name}' (위치 {position})")]
    UnknownName { name: String, position: usize },
    #[error("허용되지 않은 함수 '{name}' (위치 {position})")]
    UnknownFunction { name: String, position: usize },
    #[error("{name}() 인자 개수 {got}개가 올바르지 않습니다 (위치 {position})")]
    Arity {
        name: String,
        got: usize,
        position: usize,
    },
    #[error("중첩 깊이가 한도 {max}를 초과합니다 (위치 {position})")]
    TooDeep { max: usize, position: usize },
    #[error("수식 노드 수가 한도 {max}를 초과합니다")]
    TooComplex { max: usize },
    #[error("잘못된 숫자 '{text}' (위치 {position})")]
    InvalidNumber { text: String, position: usize },
}

impl FormulaError {
    /// 거부된 구성 요소 이름.
    pub fn construct(&self) -> String {
        match self {
            FormulaError::Empty => "empty formula".into(),
            FormulaError::TooLong { .. } => "formula length".into(),
            FormulaError::UnexpectedChar { ch, .. } => format!("character '{ch}'"),
            FormulaError::Disallowed { construct, .. } => construct.clone(),
            FormulaError::UnexpectedToken { found, .. } => format!("token '{found}'"),
            FormulaError::UnexpectedEnd { .. } => "end of input".into(),
            FormulaError::UnknownName { name, .. } => format!("name '{name}'"),
            FormulaError::UnknownFunction { name, .. } => format!("function '{name}'"),
            FormulaError::Arity { name, .. } => format!("call '{name}'"),
            FormulaError::TooDeep { .. } => "nesting depth".into(),
            FormulaError::TooComplex { .. } => "expression size".into(),
            FormulaError::InvalidNumber { text, .. } => format!("number '{text}'"),
        }
    }

    /// 소스 내 바이트 위치.
    pub fn position(&self) -> usize {
        match self {
            FormulaError::Empty | FormulaError::TooComplex { .. } => 0,
            FormulaError::TooLong { max, .. } => *max,
            FormulaError::UnexpectedChar { position, .. }
            | FormulaError::Disallowed { position, .. }
            | FormulaError::UnexpectedToken { position, .. }
            | FormulaError::UnexpectedEnd { position }
            | FormulaError::UnknownName { position, .. }
            | FormulaError::UnknownFunction { position, .. }
            | FormulaError::Arity { position, .. }
            | FormulaError::TooDeep { position, .. }
            | FormulaError::InvalidNumber { position, .. } => *position,
        }
    }
}

impl From<FormulaError> for SimError {
    fn from(err: FormulaError) -> Self {
        SimError::FormulaRejected {
            construct: err.construct(),
            position: err.position(),
            reason: err.to_string(),
        }
    }
}

/// 수식 평가 중 발생하는 런타임 에러.
///
/// 엔진은 이 에러를 받으면 해당 틱에만 기본 확률 규칙으로 대체합니다.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("0으로 나누기 ('{op}')")]
    DivisionByZero { op: &'static str },
    #[error("유한하지 않은 결과 ('{op}')")]
    NonFinite { op: &'static str },
}

/// 수식이 읽을 수 있는 값 전체.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormulaContext {
    /// 현재가
    pub price: f64,
    /// 틱 시간 간격 (틱 단위)
    pub dt: f64,
    /// 추세 레이블
    pub trend: Trend,
    /// 평균 회귀 목표가
    pub target: Option<f64>,
    /// 드리프트
    pub drift: f64,
    /// 변동성
    pub volatility: f64,
    /// `random()` 등에 쓰이는 시드
    pub seed: u64,
}

impl FormulaContext {
    pub fn new(price: f64, dt: f64) -> Self {
        Self {
            price,
            dt,
            trend: Trend::Sideways,
            target: None,
            drift: 0.0,
            volatility: 0.0,
            seed: 0,
        }
    }
}

/// 검증을 통과한 수식.
#[derive(Clone, PartialEq)]
pub struct CompiledFormula {
    source: String,
    expr: Expr,
    node_count: usize,
}

impl CompiledFormula {
    /// 수식을 파싱하고 화이트리스트 검증을 수행합니다.
    pub fn compile(source: &str) -> Result<Self, FormulaError> {
        let len = source.chars().count();
        if len > MAX_FORMULA_LEN {
            return Err(FormulaError::TooLong {
                len,
                max: MAX_FORMULA_LEN,
            });
        }
        if source.trim().is_empty() {
            return Err(FormulaError::Empty);
        }

        let tokens = lexer::tokenize(source)?;
        let node = parser::Parser::new(&tokens, source.len()).parse()?;
        let (expr, node_count) = validate::check(&node)?;

        Ok(Self {
            source: source.to_string(),
            expr,
            node_count,
        })
    }

    /// 주어진 컨텍스트로 수식을 평가합니다.
    pub fn evaluate(&self, ctx: &FormulaContext) -> Result<f64, EvalError> {
        let value = eval::Evaluator::new(ctx).eval(&self.expr)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(EvalError::NonFinite { op: "result" })
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }
}

impl fmt::Debug for CompiledFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledFormula")
            .field("source", &self.source)
            .field("nodes", &self.node_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> FormulaContext {
        FormulaContext {
            price: 100.0,
            dt: 1.0,
            trend: Trend::Up,
            target: Some(110.0),
            drift: 0.001,
            volatility: 0.01,
            seed: 42,
        }
    }

    fn eval(source: &str) -> Result<f64, EvalError> {
        CompiledFormula::compile(source).unwrap().evaluate(&ctx())
    }

    #[test]
    fn test_safe_formula_evaluates() {
        let value = eval("price * (1 + drift * dt)").unwrap();
        assert!((value - 100.1).abs() < 1e-9);
    }

    #[test]
    fn test_arithmetic_semantics() {
        assert_eq!(eval("2 ** 3 ** 2").unwrap(), 512.0);
        assert_eq!(eval("-2 ** 2").unwrap(), -4.0);
        assert_eq!(eval("7 // 2").unwrap(), 3.0);
        assert_eq!(eval("-7 % 3").unwrap(), 2.0);
        assert_eq!(eval("round(3.14159, 2)").unwrap(), 3.14);
        assert_eq!(eval("max(1, price, 3)").unwrap(), 100.0);
        assert_eq!(eval("clamp(price, 0, 50)").unwrap(), 50.0);
    }

    #[test]
    fn test_logic_and_conditionals() {
        assert_eq!(eval("price * 2 if trend == up else price").unwrap(), 200.0);
        assert_eq!(eval("1 < price < 1000").unwrap(), 1.0);
        assert_eq!(eval("not has_target").unwrap(), 0.0);
        assert_eq!(eval("0 or target").unwrap(), 110.0);
        assert_eq!(eval("price and 0").unwrap(), 0.0);
    }

    #[test]
    fn test_target_falls_back_to_price() {
        let formula = CompiledFormula::compile("target").unwrap();
        let value = formula.evaluate(&FormulaContext::new(42.0, 1.0)).unwrap();
        assert_eq!(value, 42.0);
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(
            eval("price / (dt - 1)").unwrap_err(),
            EvalError::DivisionByZero { op: "/" }
        );
    }

    #[test]
    fn test_overflow_is_non_finite() {
        assert!(matches!(
            eval("exp(price * 100)"),
            Err(EvalError::NonFinite { .. })
        ));
        assert!(matches!(eval("sqrt(-price)"), Err(EvalError::NonFinite { op: "sqrt" })));
    }

    #[test]
    fn test_random_is_seeded() {
        let a = eval("price + random()").unwrap();
        let b = eval("price + random()").unwrap();
        assert_eq!(a, b);
        assert!((100.0..101.0).contains(&a));

        let mut other = ctx();
        other.seed = 43;
        let c = CompiledFormula::compile("price + random()")
            .unwrap()
            .evaluate(&other)
            .unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_too_long() {
        let source = "1+".repeat(300) + "1";
        assert!(matches!(
            CompiledFormula::compile(&source),
            Err(FormulaError::TooLong { .. })
        ));
    }

    #[test]
    fn test_rejection_maps_to_sim_error() {
        let err: SimError = CompiledFormula::compile("os.system").unwrap_err().into();
        match err {
            SimError::FormulaRejected {
                construct,
                position,
                ..
            } => {
                assert_eq!(construct, "attribute access");
                assert_eq!(position, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
