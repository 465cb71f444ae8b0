//! 수식 토크나이저.
//!
//! 허용 문법 밖의 문자는 이 단계에서 바로 거부합니다. 특히 `.` 뒤에 식별자가 오는
//! 속성 접근, 문자열 리터럴, 대입, 첨자는 파서에 도달하지 못합니다.

use super::FormulaError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    LParen,
    RParen,
    Comma,
}

impl TokenKind {
    /// 에러 메시지용 표기.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Number(n) => n.to_string(),
            TokenKind::Ident(name) => name.clone(),
            TokenKind::Plus => "+".into(),
            TokenKind::Minus => "-".into(),
            TokenKind::Star => "*".into(),
            TokenKind::StarStar => "**".into(),
            TokenKind::Slash => "/".into(),
            TokenKind::SlashSlash => "//".into(),
            TokenKind::Percent => "%".into(),
            TokenKind::Lt => "<".into(),
            TokenKind::Le => "<=".into(),
            TokenKind::Gt => ">".into(),
            TokenKind::Ge => ">=".into(),
            TokenKind::EqEq => "==".into(),
            TokenKind::NotEq => "!=".into(),
            TokenKind::LParen => "(".into(),
            TokenKind::RParen => ")".into(),
            TokenKind::Comma => ",".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// 소스 내 바이트 위치
    pub pos: usize,
}

/// 소스 문자열을 토큰 목록으로 변환합니다.
pub fn tokenize(source: &str) -> Result<Vec<Token>, FormulaError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            i = scan_number(bytes, i);
            let text = &source[start..i];
            let value = text.parse::<f64>().map_err(|_| FormulaError::InvalidNumber {
                text: text.to_string(),
                position: start,
            })?;
            // 숫자 바로 뒤의 식별자는 `1.real` 같은 속성 접근이거나 오타
            if bytes.get(i).is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_') {
                return Err(FormulaError::UnexpectedChar {
                    ch: bytes[i] as char,
                    position: i,
                });
            }
            tokens.push(Token {
                kind: TokenKind::Number(value),
                pos: start,
            });
            continue;
        }

        if c.is_ascii_alphabetic() || c == b'_' {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            let name = &source[start..i];
            if name.starts_with("__") {
                return Err(FormulaError::Disallowed {
                    construct: "dunder name".into(),
                    position: start,
                });
            }
            tokens.push(Token {
                kind: TokenKind::Ident(name.to_string()),
                pos: start,
            });
            continue;
        }

        let next = bytes.get(i + 1).copied();
        let (kind, width) = match (c, next) {
            (b'*', Some(b'*')) => (TokenKind::StarStar, 2),
            (b'/', Some(b'/')) => (TokenKind::SlashSlash, 2),
            (b'<', Some(b'=')) => (TokenKind::Le, 2),
            (b'>', Some(b'=')) => (TokenKind::Ge, 2),
            (b'=', Some(b'=')) => (TokenKind::EqEq, 2),
            (b'!', Some(b'=')) => (TokenKind::NotEq, 2),
            (b'+', _) => (TokenKind::Plus, 1),
            (b'-', _) => (TokenKind::Minus, 1),
            (b'*', _) => (TokenKind::Star, 1),
            (b'/', _) => (TokenKind::Slash, 1),
            (b'%', _) => (TokenKind::Percent, 1),
            (b'<', _) => (TokenKind::Lt, 1),
            (b'>', _) => (TokenKind::Gt, 1),
            (b'(', _) => (TokenKind::LParen, 1),
            (b')', _) => (TokenKind::RParen, 1),
            (b',', _) => (TokenKind::Comma, 1),
            _ => return Err(disallowed_char(source, i)),
        };
        tokens.push(Token { kind, pos: start });
        i += width;
    }

    Ok(tokens)
}

fn scan_number(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            i = j;
        }
    }
    i
}

fn disallowed_char(source: &str, position: usize) -> FormulaError {
    let bytes = source.as_bytes();
    let construct = match bytes[position] {
        b'.' => "attribute access",
        b'"' | b'\'' => "string literal",
        b'[' | b']' => "subscript",
        b'{' | b'}' => "dict or set literal",
        b'=' => "assignment",
        b';' => "statement separator",
        b'@' => "decorator",
        b'&' | b'|' | b'^' | b'~' => "bitwise operator",
        b'?' | b':' => "colon or slice",
        b'#' => "comment",
        b'\\' => "line continuation",
        _ => {
            // 멀티바이트 문자일 수 있으므로 문자 단위로 다시 읽음
            let ch = source[position..].chars().next().unwrap_or('?');
            return FormulaError::UnexpectedChar { ch, position };
        }
    };
    FormulaError::Disallowed {
        construct: construct.into(),
        position,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("1.5"), vec![TokenKind::Number(1.5)]);
        assert_eq!(kinds(".25"), vec![TokenKind::Number(0.25)]);
        assert_eq!(kinds("2e-3"), vec![TokenKind::Number(0.002)]);
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a ** 2 // 3 <= b != c"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::StarStar,
                TokenKind::Number(2.0),
                TokenKind::SlashSlash,
                TokenKind::Number(3.0),
                TokenKind::Le,
                TokenKind::Ident("b".into()),
                TokenKind::NotEq,
                TokenKind::Ident("c".into()),
            ]
        );
    }

    #[test]
    fn test_attribute_access_rejected() {
        let err = tokenize("os.system").unwrap_err();
        assert_eq!(
            err,
            FormulaError::Disallowed {
                construct: "attribute access".into(),
                position: 2
            }
        );
    }

    #[test]
    fn test_strings_and_assignment_rejected() {
        assert!(matches!(
            tokenize("'rm -rf'"),
            Err(FormulaError::Disallowed { construct, .. }) if construct == "string literal"
        ));
        assert!(matches!(
            tokenize("x = 1"),
            Err(FormulaError::Disallowed { construct, .. }) if construct == "assignment"
        ));
    }

    #[test]
    fn test_dunder_rejected() {
        assert!(matches!(
            tokenize("__import__"),
            Err(FormulaError::Disallowed { construct, position: 0 }) if construct == "dunder name"
        ));
    }

    #[test]
    fn test_unicode_rejected() {
        assert!(matches!(
            tokenize("price × 2"),
            Err(FormulaError::UnexpectedChar { ch: '×', .. })
        ));
    }
}
