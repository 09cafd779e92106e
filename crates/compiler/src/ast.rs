//! Abstract syntax tree for Pico.
//!
//! The parser produces one [`Program`] per source file. Every node keeps
//! the token that started it for diagnostics. Nodes are plain sum types;
//! all name and type resolution happens later, on the HIR.

use crate::token::Token;

/// Binary operator tags, shared by the parser's precedence table, the
/// HIR, and the emitter's opcode mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpTag {
    Or,
    And,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Band,
    Bor,
    Bxor,
    Shl,
    Shr,
}

impl OpTag {
    pub fn is_logical(self) -> bool {
        matches!(self, OpTag::And | OpTag::Or)
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            OpTag::Eq | OpTag::Neq | OpTag::Lt | OpTag::Lte | OpTag::Gt | OpTag::Gte
        )
    }
}

/// Unary operator tags. The inc/dec forms are position-sensitive: the
/// emitter splits pre and post forms around the in-place opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryTag {
    Not,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

/// A type written in source. Pico only has named types.
#[derive(Debug, Clone)]
pub struct TypeExpr {
    pub token: Token,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub token: Token,
    pub name: String,
    pub ty: TypeExpr,
}

/// A function prototype: name, return type, ordered parameters.
#[derive(Debug, Clone)]
pub struct Prototype {
    /// The `fn` keyword token.
    pub token: Token,
    pub name: String,
    pub name_token: Token,
    pub return_type: TypeExpr,
    pub params: Vec<Param>,
}

#[derive(Debug, Clone)]
pub struct StructField {
    pub token: Token,
    pub name: String,
    pub ty: TypeExpr,
}

/// Top-level declarations.
#[derive(Debug, Clone)]
pub enum Decl {
    /// `fn name(params) ret { ... }` or a pure prototype `fn name(params) ret;`
    Function {
        proto: Prototype,
        body: Option<Stmt>,
    },
    /// `extern @module="lib" { fn ...; fn ...; }`
    ExternLib {
        token: Token,
        module_name: String,
        lib_name: String,
        protos: Vec<Prototype>,
    },
    /// `struct Name { type field; ... }`
    Struct {
        token: Token,
        name: String,
        name_token: Token,
        fields: Vec<StructField>,
    },
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Block {
        token: Token,
        stmts: Vec<Stmt>,
    },
    If {
        token: Token,
        cond: Expr,
        then_block: Box<Stmt>,
        else_block: Option<Box<Stmt>>,
    },
    Loop {
        token: Token,
        body: Box<Stmt>,
    },
    While {
        token: Token,
        cond: Expr,
        body: Box<Stmt>,
    },
    Return {
        token: Token,
        expr: Option<Expr>,
    },
    Break {
        token: Token,
    },
    Continue {
        token: Token,
    },
    Log {
        token: Token,
        expr: Expr,
    },
    /// `let name = init;`, `let type name = init;`, or uninitialised forms.
    Let {
        token: Token,
        name: String,
        name_token: Token,
        ty: Option<TypeExpr>,
        init: Option<Expr>,
    },
    Expr {
        token: Token,
        expr: Expr,
    },
}

/// A single `.name = value` initialiser inside a struct literal.
#[derive(Debug, Clone)]
pub struct FieldInit {
    /// The field name token.
    pub token: Token,
    pub name: String,
    pub value: Expr,
}

#[derive(Debug, Clone)]
pub enum Expr {
    IntLiteral {
        token: Token,
        value: i64,
        /// True for `LONG_LIT` tokens (`5l`).
        long: bool,
    },
    StrLiteral {
        token: Token,
        value: String,
    },
    BoolLiteral {
        token: Token,
        value: bool,
    },
    Identifier {
        token: Token,
        name: String,
    },
    Binary {
        token: Token,
        op: OpTag,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        token: Token,
        op: UnaryTag,
        operand: Box<Expr>,
    },
    Assignment {
        token: Token,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    /// `x op= v`, expanded to a plain store of `x op v` during lowering.
    CompoundAssignment {
        token: Token,
        op: OpTag,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Call {
        token: Token,
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// `qualifier::name`, used for extern library calls.
    StaticAccess {
        token: Token,
        qualifier: Box<Expr>,
        name: String,
        name_token: Token,
    },
    FieldAccess {
        token: Token,
        obj: Box<Expr>,
        field: String,
        field_token: Token,
    },
    /// `Name { .field = value, ... }`
    StructLiteral {
        token: Token,
        name: String,
        name_token: Token,
        fields: Vec<FieldInit>,
    },
    /// `int(x)`, `long(x)`, `bool(x)` — the call postfix on a primitive
    /// type name. The from-type is only known after Sema.
    Cast {
        token: Token,
        ty: TypeExpr,
        expr: Box<Expr>,
    },
}

impl Expr {
    /// The token that started this expression, for diagnostics.
    pub fn token(&self) -> &Token {
        match self {
            Expr::IntLiteral { token, .. }
            | Expr::StrLiteral { token, .. }
            | Expr::BoolLiteral { token, .. }
            | Expr::Identifier { token, .. }
            | Expr::Binary { token, .. }
            | Expr::Unary { token, .. }
            | Expr::Assignment { token, .. }
            | Expr::CompoundAssignment { token, .. }
            | Expr::Call { token, .. }
            | Expr::StaticAccess { token, .. }
            | Expr::FieldAccess { token, .. }
            | Expr::StructLiteral { token, .. }
            | Expr::Cast { token, .. } => token,
        }
    }
}

/// A parsed source file: the ordered top-level declarations.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub decls: Vec<Decl>,
}
