//! 수식 구문 트리.
//!
//! 두 단계로 나뉩니다:
//! - [`Node`]: 파서가 만드는 구문 트리. 이름과 함수 호출이 아직 문자열입니다.
//! - [`Expr`]: 화이트리스트 검증을 통과한 트리. 변수와 함수가 닫힌 열거형으로 해석되어
//!   있어 평가 단계에서 알 수 없는 이름을 만날 수 없습니다.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// 파서 출력 노드.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    /// 소스 내 바이트 위치
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Number(f64),
    Name(String),
    Unary(UnaryOp, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Compare(CompareOp, Box<Node>, Box<Node>),
    Logical(LogicalOp, Box<Node>, Box<Node>),
    Not(Box<Node>),
    Conditional {
        cond: Box<Node>,
        then: Box<Node>,
        otherwise: Box<Node>,
    },
    Call {
        name: String,
        args: Vec<Node>,
    },
}

impl Node {
    pub fn new(kind: NodeKind, pos: usize) -> Self {
        Self { kind, pos }
    }
}

/// 수식에서 참조할 수 있는 변수.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Var {
    Price,
    Dt,
    Trend,
    Up,
    Down,
    Sideways,
    Target,
    HasTarget,
    Drift,
    Volatility,
    Pi,
    E,
    True,
    False,
}

impl Var {
    /// 이름을 변수로 해석합니다.
    pub fn resolve(name: &str) -> Option<Self> {
        let var = match name {
            "price" => Var::Price,
            "dt" => Var::Dt,
            "trend" => Var::Trend,
            "up" => Var::Up,
            "down" => Var::Down,
            "sideways" => Var::Sideways,
            "target" | "target_price" => Var::Target,
            "has_target" => Var::HasTarget,
            "drift" => Var::Drift,
            "volatility" | "vol" => Var::Volatility,
            "pi" => Var::Pi,
            "e" => Var::E,
            "True" | "true" => Var::True,
            "False" | "false" => Var::False,
            _ => return None,
        };
        Some(var)
    }
}

/// 허용된 함수 집합.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Abs,
    Min,
    Max,
    Round,
    Floor,
    Ceil,
    Sqrt,
    Pow,
    Exp,
    Log,
    Sin,
    Cos,
    Tan,
    Clamp,
    Random,
    Uniform,
    Normal,
}

impl Func {
    pub fn resolve(name: &str) -> Option<Self> {
        let func = match name {
            "abs" => Func::Abs,
            "min" => Func::Min,
            "max" => Func::Max,
            "round" => Func::Round,
            "floor" => Func::Floor,
            "ceil" => Func::Ceil,
            "sqrt" => Func::Sqrt,
            "pow" => Func::Pow,
            "exp" => Func::Exp,
            "log" | "ln" => Func::Log,
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "clamp" => Func::Clamp,
            "random" => Func::Random,
            "uniform" => Func::Uniform,
            "normal" | "gauss" => Func::Normal,
            _ => return None,
        };
        Some(func)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Func::Abs => "abs",
            Func::Min => "min",
            Func::Max => "max",
            Func::Round => "round",
            Func::Floor => "floor",
            Func::Ceil => "ceil",
            Func::Sqrt => "sqrt",
            Func::Pow => "pow",
            Func::Exp => "exp",
            Func::Log => "log",
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Tan => "tan",
            Func::Clamp => "clamp",
            Func::Random => "random",
            Func::Uniform => "uniform",
            Func::Normal => "normal",
        }
    }

    /// 허용되는 인자 개수인지 확인합니다.
    pub fn accepts(&self, argc: usize) -> bool {
        match self {
            Func::Random => argc == 0,
            Func::Normal => argc == 0 || argc == 2,
            Func::Round | Func::Log => argc == 1 || argc == 2,
            Func::Min | Func::Max => (2..=8).contains(&argc),
            Func::Pow | Func::Uniform => argc == 2,
            Func::Clamp => argc == 3,
            _ => argc == 1,
        }
    }
}

/// 검증된 수식 트리.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Var(Var),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Call(Func, Vec<Expr>),
}
