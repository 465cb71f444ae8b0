//! 재귀 하강 파서.
//!
//! 우선순위 (낮음 → 높음):
//! `a if c else b` < `or` < `and` < `not` < 비교 < `+ -` < `* / // %` < 단항 `- +` < `**`

use super::ast::{BinaryOp, CompareOp, LogicalOp, Node, NodeKind, UnaryOp};
use super::lexer::{Token, TokenKind};
use super::{FormulaError, MAX_DEPTH};

/// 파서가 거부하는 키워드와 그 구문 이름.
const RESERVED: &[(&str, &str)] = &[
    ("import", "import"),
    ("from", "import"),
    ("def", "function definition"),
    ("class", "class definition"),
    ("lambda", "lambda"),
    ("for", "loop"),
    ("while", "loop"),
    ("in", "membership test"),
    ("is", "identity test"),
    ("return", "statement"),
    ("yield", "generator"),
    ("with", "context manager"),
    ("global", "statement"),
    ("nonlocal", "statement"),
    ("del", "statement"),
    ("try", "exception handling"),
    ("except", "exception handling"),
    ("raise", "exception handling"),
    ("assert", "statement"),
    ("async", "coroutine"),
    ("await", "coroutine"),
    ("pass", "statement"),
    ("break", "statement"),
    ("continue", "statement"),
    ("None", "None literal"),
];

pub struct Parser<'a> {
    tokens: &'a [Token],
    cursor: usize,
    depth: usize,
    source_len: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token], source_len: usize) -> Self {
        Self {
            tokens,
            cursor: 0,
            depth: 0,
            source_len,
        }
    }

    /// 토큰 전체를 하나의 식으로 파싱합니다.
    pub fn parse(mut self) -> Result<Node, FormulaError> {
        if self.tokens.is_empty() {
            return Err(FormulaError::Empty);
        }
        let node = self.expression()?;
        match self.peek() {
            None => Ok(node),
            Some(token) => Err(unexpected(token)),
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.cursor)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.cursor);
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    fn end_position(&self) -> usize {
        self.source_len
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token { kind: TokenKind::Ident(name), .. }) if name == keyword)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&'a Token, FormulaError> {
        match self.advance() {
            Some(token) if token.kind == kind => Ok(token),
            Some(token) => Err(unexpected(token)),
            None => Err(FormulaError::UnexpectedEnd {
                position: self.end_position(),
            }),
        }
    }

    fn enter(&mut self, pos: usize) -> Result<(), FormulaError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(FormulaError::TooDeep {
                max: MAX_DEPTH,
                position: pos,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn current_pos(&self) -> usize {
        self.peek().map(|t| t.pos).unwrap_or(self.source_len)
    }

    fn expression(&mut self) -> Result<Node, FormulaError> {
        let pos = self.current_pos();
        self.enter(pos)?;
        let result = self.conditional();
        self.leave();
        result
    }

    fn conditional(&mut self) -> Result<Node, FormulaError> {
        let then = self.or_expr()?;
        if !self.peek_keyword("if") {
            return Ok(then);
        }
        let pos = then.pos;
        self.advance();
        let cond = self.or_expr()?;
        if !self.peek_keyword("else") {
            return match self.peek() {
                Some(token) => Err(unexpected(token)),
                None => Err(FormulaError::UnexpectedEnd {
                    position: self.end_position(),
                }),
            };
        }
        self.advance();
        let otherwise = self.expression()?;
        Ok(Node::new(
            NodeKind::Conditional {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            pos,
        ))
    }

    fn or_expr(&mut self) -> Result<Node, FormulaError> {
        let mut lhs = self.and_expr()?;
        while self.peek_keyword("or") {
            self.advance();
            let rhs = self.and_expr()?;
            let pos = lhs.pos;
            lhs = Node::new(
                NodeKind::Logical(LogicalOp::Or, Box::new(lhs), Box::new(rhs)),
                pos,
            );
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Node, FormulaError> {
        let mut lhs = self.not_expr()?;
        while self.peek_keyword("and") {
            self.advance();
            let rhs = self.not_expr()?;
            let pos = lhs.pos;
            lhs = Node::new(
                NodeKind::Logical(LogicalOp::And, Box::new(lhs), Box::new(rhs)),
                pos,
            );
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Node, FormulaError> {
        if self.peek_keyword("not") {
            let pos = self.current_pos();
            self.advance();
            self.enter(pos)?;
            let operand = self.not_expr();
            self.leave();
            return Ok(Node::new(NodeKind::Not(Box::new(operand?)), pos));
        }
        self.comparison()
    }

    /// 비교 연산. `a < b < c`는 `(a < b) and (b < c)`로 풀어냅니다.
    fn comparison(&mut self) -> Result<Node, FormulaError> {
        let first = self.additive()?;
        let mut result: Option<Node> = None;
        let mut lhs = first.clone();

        while let Some(op) = self.peek().and_then(|t| compare_op(&t.kind)) {
            self.advance();
            let rhs = self.additive()?;
            let pos = lhs.pos;
            let link = Node::new(
                NodeKind::Compare(op, Box::new(lhs), Box::new(rhs.clone())),
                pos,
            );
            result = Some(match result {
                None => link,
                Some(prev) => {
                    let pos = prev.pos;
                    Node::new(
                        NodeKind::Logical(LogicalOp::And, Box::new(prev), Box::new(link)),
                        pos,
                    )
                }
            });
            lhs = rhs;
        }

        Ok(result.unwrap_or(first))
    }

    fn additive(&mut self) -> Result<Node, FormulaError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Plus) => BinaryOp::Add,
                Some(TokenKind::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.term()?;
            let pos = lhs.pos;
            lhs = Node::new(NodeKind::Binary(op, Box::new(lhs), Box::new(rhs)), pos);
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Node, FormulaError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Star) => BinaryOp::Mul,
                Some(TokenKind::Slash) => BinaryOp::Div,
                Some(TokenKind::SlashSlash) => BinaryOp::FloorDiv,
                Some(TokenKind::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.unary()?;
            let pos = lhs.pos;
            lhs = Node::new(NodeKind::Binary(op, Box::new(lhs), Box::new(rhs)), pos);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Node, FormulaError> {
        let op = match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Minus) => UnaryOp::Neg,
            Some(TokenKind::Plus) => UnaryOp::Pos,
            _ => return self.power(),
        };
        let pos = self.current_pos();
        self.advance();
        self.enter(pos)?;
        let operand = self.unary();
        self.leave();
        Ok(Node::new(NodeKind::Unary(op, Box::new(operand?)), pos))
    }

    /// `**`는 오른쪽 결합이며 단항 연산자보다 강하게 묶입니다 (`-2 ** 2 == -4`).
    fn power(&mut self) -> Result<Node, FormulaError> {
        let base = self.primary()?;
        if !matches!(self.peek().map(|t| &t.kind), Some(TokenKind::StarStar)) {
            return Ok(base);
        }
        self.advance();
        let pos = base.pos;
        self.enter(pos)?;
        let exponent = self.unary();
        self.leave();
        Ok(Node::new(
            NodeKind::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent?)),
            pos,
        ))
    }

    fn primary(&mut self) -> Result<Node, FormulaError> {
        let token = self.advance().ok_or(FormulaError::UnexpectedEnd {
            position: self.source_len,
        })?;

        match &token.kind {
            TokenKind::Number(value) => Ok(Node::new(NodeKind::Number(*value), token.pos)),
            TokenKind::Ident(name) => {
                if let Some((_, construct)) = RESERVED.iter().find(|(kw, _)| kw == name) {
                    return Err(FormulaError::Disallowed {
                        construct: (*construct).to_string(),
                        position: token.pos,
                    });
                }
                if matches!(name.as_str(), "if" | "else" | "and" | "or" | "not") {
                    return Err(unexpected(token));
                }
                if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::LParen)) {
                    self.advance();
                    let args = self.arguments()?;
                    return Ok(Node::new(
                        NodeKind::Call {
                            name: name.clone(),
                            args,
                        },
                        token.pos,
                    ));
                }
                Ok(Node::new(NodeKind::Name(name.clone()), token.pos))
            }
            TokenKind::LParen => {
                let inner = self.expression()?;
                self.expect(TokenKind::RParen)?;
                // `(f)(x)` 처럼 이름이 아닌 대상 호출은 허용하지 않음
                if let Some(next) = self.peek() {
                    if next.kind == TokenKind::LParen {
                        return Err(FormulaError::Disallowed {
                            construct: "indirect call".into(),
                            position: next.pos,
                        });
                    }
                }
                Ok(inner)
            }
            _ => Err(unexpected(token)),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Node>, FormulaError> {
        let mut args = Vec::new();
        if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::RParen)) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            match self.advance() {
                Some(Token {
                    kind: TokenKind::Comma,
                    ..
                }) => continue,
                Some(Token {
                    kind: TokenKind::RParen,
                    ..
                }) => break,
                Some(token) => return Err(unexpected(token)),
                None => {
                    return Err(FormulaError::UnexpectedEnd {
                        position: self.source_len,
                    })
                }
            }
        }
        Ok(args)
    }
}

fn compare_op(kind: &TokenKind) -> Option<CompareOp> {
    Some(match kind {
        TokenKind::Lt => CompareOp::Lt,
        TokenKind::Le => CompareOp::Le,
        TokenKind::Gt => CompareOp::Gt,
        TokenKind::Ge => CompareOp::Ge,
        TokenKind::EqEq => CompareOp::Eq,
        TokenKind::NotEq => CompareOp::Ne,
        _ => return None,
    })
}

fn unexpected(token: &Token) -> FormulaError {
    FormulaError::UnexpectedToken {
        found: token.kind.describe(),
        position: token.pos,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::lexer::tokenize;

    fn parse(source: &str) -> Result<Node, FormulaError> {
        let tokens = tokenize(source)?;
        Parser::new(&tokens, source.len()).parse()
    }

    #[test]
    fn test_precedence() {
        let node = parse("1 + 2 * 3").unwrap();
        let NodeKind::Binary(BinaryOp::Add, _, rhs) = node.kind else {
            panic!("expected addition at root");
        };
        assert!(matches!(rhs.kind, NodeKind::Binary(BinaryOp::Mul, _, _)));
    }

    #[test]
    fn test_power_binds_tighter_than_negation() {
        let node = parse("-2 ** 2").unwrap();
        let NodeKind::Unary(UnaryOp::Neg, inner) = node.kind else {
            panic!("expected negation at root");
        };
        assert!(matches!(inner.kind, NodeKind::Binary(BinaryOp::Pow, _, _)));
    }

    #[test]
    fn test_conditional() {
        let node = parse("price if trend == up else price * 0.99").unwrap();
        assert!(matches!(node.kind, NodeKind::Conditional { .. }));
    }

    #[test]
    fn test_chained_comparison() {
        let node = parse("1 < price < 10").unwrap();
        assert!(matches!(node.kind, NodeKind::Logical(LogicalOp::And, _, _)));
    }

    #[test]
    fn test_import_rejected() {
        let err = parse("import os").unwrap_err();
        assert_eq!(
            err,
            FormulaError::Disallowed {
                construct: "import".into(),
                position: 0
            }
        );
    }

    #[test]
    fn test_lambda_rejected() {
        assert!(matches!(
            parse("(lambda x)"),
            Err(FormulaError::Disallowed { construct, position: 1 }) if construct == "lambda"
        ));
    }

    #[test]
    fn test_indirect_call_rejected() {
        assert!(matches!(
            parse("(abs)(price)"),
            Err(FormulaError::Disallowed { construct, .. }) if construct == "indirect call"
        ));
    }

    #[test]
    fn test_unbalanced() {
        assert!(matches!(
            parse("(price + 1"),
            Err(FormulaError::UnexpectedEnd { .. })
        ));
        assert!(matches!(
            parse("price )"),
            Err(FormulaError::UnexpectedToken { .. })
        ));
        assert!(matches!(parse(""), Err(FormulaError::Empty)));
    }

    #[test]
    fn test_depth_limit() {
        let source = format!("{}price{}", "(".repeat(MAX_DEPTH + 5), ")".repeat(MAX_DEPTH + 5));
        assert!(matches!(parse(&source), Err(FormulaError::TooDeep { .. })));
    }
}
