//! 검증된 수식 트리 해석기.
//!
//! 입력은 [`FormulaContext`]뿐이며 I/O, 시계, 환경 변수에 접근하지 않습니다.
//! 트리 크기가 제한되어 있고 반복 구문이 없으므로 평가는 항상 유한 시간에 끝납니다.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::ast::{BinaryOp, CompareOp, Expr, Func, LogicalOp, UnaryOp, Var};
use super::{EvalError, FormulaContext};
use crate::random::standard_normal;

pub struct Evaluator<'a> {
    ctx: &'a FormulaContext,
    rng: StdRng,
}

impl<'a> Evaluator<'a> {
    pub fn new(ctx: &'a FormulaContext) -> Self {
        Self {
            ctx,
            rng: StdRng::seed_from_u64(ctx.seed),
        }
    }

    pub fn eval(&mut self, expr: &Expr) -> Result<f64, EvalError> {
        match expr {
            Expr::Number(value) => Ok(*value),
            Expr::Var(var) => Ok(self.variable(*var)),
            Expr::Unary(op, operand) => {
                let value = self.eval(operand)?;
                Ok(match op {
                    UnaryOp::Neg => -value,
                    UnaryOp::Pos => value,
                })
            }
            Expr::Binary(op, lhs, rhs) => {
                let a = self.eval(lhs)?;
                let b = self.eval(rhs)?;
                binary(*op, a, b)
            }
            Expr::Compare(op, lhs, rhs) => {
                let a = self.eval(lhs)?;
                let b = self.eval(rhs)?;
                let result = match op {
                    CompareOp::Lt => a < b,
                    CompareOp::Le => a <= b,
                    CompareOp::Gt => a > b,
                    CompareOp::Ge => a >= b,
                    CompareOp::Eq => a == b,
                    CompareOp::Ne => a != b,
                };
                Ok(truth(result))
            }
            // 파이썬과 같이 피연산자 값을 그대로 돌려줍니다 (`target or price`).
            Expr::Logical(LogicalOp::And, lhs, rhs) => {
                let a = self.eval(lhs)?;
                if a == 0.0 {
                    Ok(a)
                } else {
                    self.eval(rhs)
                }
            }
            Expr::Logical(LogicalOp::Or, lhs, rhs) => {
                let a = self.eval(lhs)?;
                if a != 0.0 {
                    Ok(a)
                } else {
                    self.eval(rhs)
                }
            }
            Expr::Not(operand) => Ok(truth(self.eval(operand)? == 0.0)),
            Expr::Conditional {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond)? != 0.0 {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Call(func, args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                let result = self.call(*func, &values)?;
                finite(result, func.name())
            }
        }
    }

    fn variable(&self, var: Var) -> f64 {
        let ctx = self.ctx;
        match var {
            Var::Price => ctx.price,
            Var::Dt => ctx.dt,
            Var::Trend => ctx.trend.sign(),
            Var::Up => 1.0,
            Var::Down => -1.0,
            Var::Sideways => 0.0,
            Var::Target => ctx.target.unwrap_or(ctx.price),
            Var::HasTarget => truth(ctx.target.is_some()),
            Var::Drift => ctx.drift,
            Var::Volatility => ctx.volatility,
            Var::Pi => std::f64::consts::PI,
            Var::E => std::f64::consts::E,
            Var::True => 1.0,
            Var::False => 0.0,
        }
    }

    fn call(&mut self, func: Func, args: &[f64]) -> Result<f64, EvalError> {
        let arg = |i: usize| args.get(i).copied().unwrap_or(0.0);

        let value = match func {
            Func::Abs => arg(0).abs(),
            Func::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Func::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Func::Round => {
                let digits = if args.len() > 1 { arg(1).round().clamp(-15.0, 15.0) } else { 0.0 };
                let factor = 10f64.powi(digits as i32);
                (arg(0) * factor).round() / factor
            }
            Func::Floor => arg(0).floor(),
            Func::Ceil => arg(0).ceil(),
            Func::Sqrt => {
                if arg(0) < 0.0 {
                    return Err(EvalError::NonFinite { op: "sqrt" });
                }
                arg(0).sqrt()
            }
            Func::Pow => arg(0).powf(arg(1)),
            Func::Exp => arg(0).exp(),
            Func::Log => {
                let x = arg(0);
                if x <= 0.0 {
                    return Err(EvalError::NonFinite { op: "log" });
                }
                if args.len() > 1 {
                    let base = arg(1);
                    if base <= 0.0 || base == 1.0 {
                        return Err(EvalError::NonFinite { op: "log" });
                    }
                    x.ln() / base.ln()
                } else {
                    x.ln()
                }
            }
            Func::Sin => arg(0).sin(),
            Func::Cos => arg(0).cos(),
            Func::Tan => arg(0).tan(),
            Func::Clamp => {
                let (x, lo, hi) = (arg(0), arg(1), arg(2));
                if lo > hi {
                    return Err(EvalError::NonFinite { op: "clamp" });
                }
                x.max(lo).min(hi)
            }
            Func::Random => self.rng.gen::<f64>(),
            Func::Uniform => {
                let (lo, hi) = (arg(0), arg(1));
                lo + (hi - lo) * self.rng.gen::<f64>()
            }
            Func::Normal => {
                let z = standard_normal(&mut self.rng);
                if args.is_empty() {
                    z
                } else {
                    arg(0) + arg(1) * z
                }
            }
        };
        Ok(value)
    }
}

fn binary(op: BinaryOp, a: f64, b: f64) -> Result<f64, EvalError> {
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod if b == 0.0 => {
            return Err(EvalError::DivisionByZero { op: op.symbol() })
        }
        BinaryOp::Div => a / b,
        BinaryOp::FloorDiv => (a / b).floor(),
        // 나머지 부호는 제수를 따름
        BinaryOp::Mod => a - b * (a / b).floor(),
        BinaryOp::Pow => a.powf(b),
    };
    finite(value, op.symbol())
}

fn finite(value: f64, op: &'static str) -> Result<f64, EvalError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EvalError::NonFinite { op })
    }
}

fn truth(flag: bool) -> f64 {
    if flag {
        1.0
    } else {
        0.0
    }
}
