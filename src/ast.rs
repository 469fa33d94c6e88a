use std::fmt;

/// Source position as (line, column), both 1-based.
pub type Pos = (i32, i32);

/// Position carried by nodes synthesized after parsing.
#[allow(dead_code)]
pub const DUMMY_POS: Pos = (-1, -1);

#[derive(Debug, Clone)]
pub struct Program {
    pub funcs: Vec<Func>,
    pub body: Vec<Stat>,
}

#[derive(Debug, Clone)]
pub struct Func {
    pub ret_ty: Type,
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stat>,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub ty: Type,
    pub name: String,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub enum Stat {
    Skip(Pos),
    Declare(Type, String, RValue, Pos),
    Assign(LValue, RValue, Pos),
    Read(LValue, Pos),
    Free(Expr, Pos),
    Return(Expr, Pos),
    Exit(Expr, Pos),
    Print(Expr, Pos),
    Println(Expr, Pos),
    If(Expr, Vec<Stat>, Vec<Stat>, Pos),
    While(Expr, Vec<Stat>, Pos),
    Scope(Vec<Stat>, Pos),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairSel {
    Fst,
    Snd,
}

impl fmt::Display for PairSel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairSel::Fst => write!(f, "fst"),
            PairSel::Snd => write!(f, "snd"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum LValue {
    Ident(String, Pos),
    ArrayElem(String, Vec<Expr>, Pos),
    PairElem(PairSel, Box<LValue>, Pos),
}

impl LValue {
    pub fn pos(&self) -> Pos {
        match self {
            LValue::Ident(_, p) | LValue::ArrayElem(_, _, p) | LValue::PairElem(_, _, p) => *p,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RValue {
    Expr(Expr),
    ArrayLit(Vec<Expr>, Pos),
    NewPair(Expr, Expr, Pos),
    Call(String, Vec<Expr>, Pos),
    PairElem(PairSel, LValue, Pos),
}

impl RValue {
    pub fn pos(&self) -> Pos {
        match self {
            RValue::Expr(e) => e.pos(),
            RValue::ArrayLit(_, p)
            | RValue::NewPair(_, _, p)
            | RValue::Call(_, _, p)
            | RValue::PairElem(_, _, p) => *p,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    IntLit(i32, Pos),
    BoolLit(bool, Pos),
    CharLit(char, Pos),
    StrLit(String, Pos),
    NullLit(Pos),
    Ident(String, Pos),
    ArrayElem(String, Vec<Expr>, Pos),
    Unary(UnOp, Box<Expr>, Pos),
    Binary(Box<Expr>, BinOp, Box<Expr>, Pos),
}

impl Expr {
    pub fn pos(&self) -> Pos {
        match self {
            Expr::IntLit(_, p)
            | Expr::BoolLit(_, p)
            | Expr::CharLit(_, p)
            | Expr::StrLit(_, p)
            | Expr::NullLit(p)
            | Expr::Ident(_, p)
            | Expr::ArrayElem(_, _, p)
            | Expr::Unary(_, _, p)
            | Expr::Binary(_, _, _, p) => *p,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
    Len,
    Ord,
    Chr,
}

impl fmt::Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnOp::Not => "!",
            UnOp::Neg => "-",
            UnOp::Len => "len",
            UnOp::Ord => "ord",
            UnOp::Chr => "chr",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
    And,
    Or,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Int,
    Bool,
    Char,
    String,
    Array(Box<Type>),
    /// A pair with both element types known.
    Pair(Box<Type>, Box<Type>),
    /// The bare `pair` token: a pair whose element types have been erased.
    ErasedPair,
    /// Wildcard inferred for empty array literals and unknown pair elements.
    Any,
    /// The type of the `null` literal.
    Null,
    /// Sentinel produced after a reported mismatch; equivalent to everything
    /// so one bad subtree does not drown its siblings in follow-up errors.
    Error,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Bool => write!(f, "bool"),
            Type::Char => write!(f, "char"),
            Type::String => write!(f, "string"),
            Type::Array(elem) => write!(f, "{elem}[]"),
            Type::Pair(a, b) => write!(f, "pair({a}, {b})"),
            Type::ErasedPair => write!(f, "pair"),
            Type::Any => write!(f, "any"),
            Type::Null => write!(f, "null"),
            Type::Error => write!(f, "<error>"),
        }
    }
}
