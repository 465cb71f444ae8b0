//! 화이트리스트 검증.
//!
//! 파서가 만든 [`Node`] 트리를 순회하며 모든 노드를 허용 목록과 대조하고,
//! 통과하면 평가 가능한 [`Expr`]로 변환합니다. 이 단계를 거치지 않은 트리는 평가할 수 없습니다.

use super::ast::{Expr, Func, Node, NodeKind, Var};
use super::{FormulaError, MAX_NODES};

/// 구문 트리를 검증하고 평가용 트리로 변환합니다.
pub fn check(node: &Node) -> Result<(Expr, usize), FormulaError> {
    let mut count = 0;
    let expr = lower(node, &mut count)?;
    Ok((expr, count))
}

fn lower(node: &Node, count: &mut usize) -> Result<Expr, FormulaError> {
    *count += 1;
    if *count > MAX_NODES {
        return Err(FormulaError::TooComplex { max: MAX_NODES });
    }

    let expr = match &node.kind {
        NodeKind::Number(value) => {
            if !value.is_finite() {
                return Err(FormulaError::InvalidNumber {
                    text: value.to_string(),
                    position: node.pos,
                });
            }
            Expr::Number(*value)
        }
        NodeKind::Name(name) => match Var::resolve(name) {
            Some(var) => Expr::Var(var),
            None if Func::resolve(name).is_some() => {
                return Err(FormulaError::Disallowed {
                    construct: "function reference".into(),
                    position: node.pos,
                })
            }
            None => {
                return Err(FormulaError::UnknownName {
                    name: name.clone(),
                    position: node.pos,
                })
            }
        },
        NodeKind::Call { name, args } => {
            let func = Func::resolve(name).ok_or_else(|| FormulaError::UnknownFunction {
                name: name.clone(),
                position: node.pos,
            })?;
            if !func.accepts(args.len()) {
                return Err(FormulaError::Arity {
                    name: func.name().to_string(),
                    got: args.len(),
                    position: node.pos,
                });
            }
            let args = args
                .iter()
                .map(|arg| lower(arg, count))
                .collect::<Result<Vec<_>, _>>()?;
            Expr::Call(func, args)
        }
        NodeKind::Unary(op, operand) => Expr::Unary(*op, lower_boxed(operand, count)?),
        NodeKind::Binary(op, lhs, rhs) => {
            Expr::Binary(*op, lower_boxed(lhs, count)?, lower_boxed(rhs, count)?)
        }
        NodeKind::Compare(op, lhs, rhs) => {
            Expr::Compare(*op, lower_boxed(lhs, count)?, lower_boxed(rhs, count)?)
        }
        NodeKind::Logical(op, lhs, rhs) => {
            Expr::Logical(*op, lower_boxed(lhs, count)?, lower_boxed(rhs, count)?)
        }
        NodeKind::Not(operand) => Expr::Not(lower_boxed(operand, count)?),
        NodeKind::Conditional {
            cond,
            then,
            otherwise,
        } => Expr::Conditional {
            cond: lower_boxed(cond, count)?,
            then: lower_boxed(then, count)?,
            otherwise: lower_boxed(otherwise, count)?,
        },
    };

    Ok(expr)
}

fn lower_boxed(node: &Node, count: &mut usize) -> Result<Box<Expr>, FormulaError> {
    lower(node, count).map(Box::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::lexer::tokenize;
    use crate::formula::parser::Parser;

    fn check_source(source: &str) -> Result<Expr, FormulaError> {
        let tokens = tokenize(source)?;
        let node = Parser::new(&tokens, source.len()).parse()?;
        check(&node).map(|(expr, _)| expr)
    }

    #[test]
    fn test_known_names_resolve() {
        let expr = check_source("price * (1 + drift * dt)").unwrap();
        assert!(matches!(expr, Expr::Binary(..)));
    }

    #[test]
    fn test_unknown_name() {
        assert_eq!(
            check_source("price + secret").unwrap_err(),
            FormulaError::UnknownName {
                name: "secret".into(),
                position: 8
            }
        );
    }

    #[test]
    fn test_unknown_function() {
        assert!(matches!(
            check_source("open(price)"),
            Err(FormulaError::UnknownFunction { name, .. }) if name == "open"
        ));
        assert!(matches!(
            check_source("eval(price)"),
            Err(FormulaError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn test_bare_function_reference() {
        assert!(matches!(
            check_source("abs"),
            Err(FormulaError::Disallowed { construct, .. }) if construct == "function reference"
        ));
    }

    #[test]
    fn test_arity() {
        assert!(matches!(
            check_source("sqrt(price, 2)"),
            Err(FormulaError::Arity { got: 2, .. })
        ));
        assert!(matches!(
            check_source("random(1)"),
            Err(FormulaError::Arity { got: 1, .. })
        ));
        assert!(check_source("max(price, target, 1)").is_ok());
    }

    #[test]
    fn test_node_budget() {
        let source = vec!["1"; MAX_NODES].join(" + ");
        assert!(matches!(
            check_source(&source),
            Err(FormulaError::TooComplex { .. })
        ));
    }

    #[test]
    fn test_overflowing_literal() {
        assert!(matches!(
            check_source("1e400 * price"),
            Err(FormulaError::InvalidNumber { .. })
        ));
    }
}
