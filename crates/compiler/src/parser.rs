//! Parser for Pico syntax.
//!
//! Declarations and statements are recursive descent; expressions use
//! Pratt precedence climbing with C-like tiers. Assignment is
//! right-associative with the lowest binding power; the postfix forms
//! (calls, struct literals, field access, static access, `++`/`--`)
//! bind tightest.
//!
//! The first error aborts parsing; there is no recovery.

use crate::ast::{
    Decl, Expr, FieldInit, OpTag, Param, Program, Prototype, Stmt, StructField, TypeExpr, UnaryTag,
};
use crate::error::PicoError;
use crate::token::{Token, TokenTag, Tokenizer};

/// Left/right binding powers for an infix operator. Ties follow C:
/// `||` < `&&` < `|` < `^` < `&` < equality < relational < shifts <
/// additive < multiplicative.
fn infix_binding(tag: TokenTag) -> Option<(u8, u8, OpTag)> {
    let entry = match tag {
        TokenTag::PipePipe => (3, 4, OpTag::Or),
        TokenTag::AmpersandAmpersand => (5, 6, OpTag::And),
        TokenTag::Pipe => (7, 8, OpTag::Bor),
        TokenTag::Caret => (9, 10, OpTag::Bxor),
        TokenTag::Ampersand => (11, 12, OpTag::Band),
        TokenTag::EqualEqual => (13, 14, OpTag::Eq),
        TokenTag::NotEqual => (13, 14, OpTag::Neq),
        TokenTag::Less => (15, 16, OpTag::Lt),
        TokenTag::LessEqual => (15, 16, OpTag::Lte),
        TokenTag::Greater => (15, 16, OpTag::Gt),
        TokenTag::GreaterEqual => (15, 16, OpTag::Gte),
        TokenTag::LessLess => (17, 18, OpTag::Shl),
        TokenTag::GreaterGreater => (17, 18, OpTag::Shr),
        TokenTag::Plus => (19, 20, OpTag::Add),
        TokenTag::Minus => (19, 20, OpTag::Sub),
        TokenTag::Asterisk => (21, 22, OpTag::Mul),
        TokenTag::Slash => (21, 22, OpTag::Div),
        TokenTag::Modulus => (21, 22, OpTag::Mod),
        _ => return None,
    };
    Some(entry)
}

/// The compound-assignment token set and the binary op each expands to.
fn compound_op(tag: TokenTag) -> Option<OpTag> {
    let op = match tag {
        TokenTag::PlusEqual => OpTag::Add,
        TokenTag::MinusEqual => OpTag::Sub,
        TokenTag::AsteriskEqual => OpTag::Mul,
        TokenTag::SlashEqual => OpTag::Div,
        TokenTag::ModulusEqual => OpTag::Mod,
        _ => return None,
    };
    Some(op)
}

const ASSIGN_LBP: u8 = 2;
const ASSIGN_RBP: u8 = 1;

/// Primitive type names that turn a call postfix into a cast.
fn cast_target(name: &str) -> bool {
    matches!(name, "int" | "long" | "bool")
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(source: &str) -> Result<Self, PicoError> {
        let tokens = Tokenizer::tokenize(source)?;
        Ok(Parser { tokens, pos: 0 })
    }

    /// Tokenize and parse a whole source file.
    pub fn parse(source: &str) -> Result<Program, PicoError> {
        let mut parser = Parser::new(source)?;
        let mut decls = Vec::new();
        while !parser.check(TokenTag::Eof) {
            decls.push(parser.parse_decl()?);
        }
        Ok(Program { decls })
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos]
    }

    /// The most recently consumed token; syntax errors point here.
    fn previous(&self) -> &Token {
        &self.tokens[self.pos.saturating_sub(1)]
    }

    fn check(&self, tag: TokenTag) -> bool {
        self.current().tag == tag
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, tag: TokenTag) -> Option<Token> {
        if self.check(tag) {
            Some(self.advance())
        } else {
            None
        }
    }

    fn expect(&mut self, tag: TokenTag) -> Result<Token, PicoError> {
        if self.check(tag) {
            Ok(self.advance())
        } else {
            Err(PicoError::syntax(
                format!("expected {:?}, but got {:?}", tag, self.current().tag),
                self.previous().clone(),
            ))
        }
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    fn parse_decl(&mut self) -> Result<Decl, PicoError> {
        match self.current().tag {
            TokenTag::KwFn => self.parse_function_decl(),
            TokenTag::KwStruct => self.parse_struct_decl(),
            TokenTag::KwExtern => self.parse_extern_decl(),
            tag => Err(PicoError::syntax(
                format!("expected declaration, but got {:?}", tag),
                self.current().clone(),
            )),
        }
    }

    fn parse_function_decl(&mut self) -> Result<Decl, PicoError> {
        let proto = self.parse_prototype()?;
        let body = if self.eat(TokenTag::Semicolon).is_some() {
            None
        } else {
            Some(self.parse_block()?)
        };
        Ok(Decl::Function { proto, body })
    }

    fn parse_prototype(&mut self) -> Result<Prototype, PicoError> {
        let token = self.expect(TokenTag::KwFn)?;
        let name_token = self.expect(TokenTag::Id)?;
        self.expect(TokenTag::LParen)?;
        let mut params = Vec::new();
        while !self.check(TokenTag::RParen) {
            let ty = self.parse_type_expr()?;
            let param_name = self.expect(TokenTag::Id)?;
            self.eat(TokenTag::Comma);
            params.push(Param {
                name: param_name.value.clone(),
                token: param_name,
                ty,
            });
        }
        self.expect(TokenTag::RParen)?;
        let return_type = self.parse_type_expr()?;
        Ok(Prototype {
            token,
            name: name_token.value.clone(),
            name_token,
            return_type,
            params,
        })
    }

    fn parse_struct_decl(&mut self) -> Result<Decl, PicoError> {
        let token = self.expect(TokenTag::KwStruct)?;
        let name_token = self.expect(TokenTag::Id)?;
        self.expect(TokenTag::LBrace)?;
        let mut fields = Vec::new();
        while !self.check(TokenTag::RBrace) {
            let ty = self.parse_type_expr()?;
            let field_name = self.expect(TokenTag::Id)?;
            self.expect(TokenTag::Semicolon)?;
            fields.push(StructField {
                name: field_name.value.clone(),
                token: field_name,
                ty,
            });
        }
        self.expect(TokenTag::RBrace)?;
        Ok(Decl::Struct {
            token,
            name: name_token.value.clone(),
            name_token,
            fields,
        })
    }

    /// `extern @module="lib" { fn a(...) t; fn b(...) t; }`
    fn parse_extern_decl(&mut self) -> Result<Decl, PicoError> {
        let token = self.expect(TokenTag::KwExtern)?;
        self.expect(TokenTag::At)?;
        let module_token = self.expect(TokenTag::Id)?;
        self.expect(TokenTag::Equal)?;
        let lib_token = self.expect(TokenTag::StrLit)?;
        self.expect(TokenTag::LBrace)?;
        let mut protos = Vec::new();
        while !self.check(TokenTag::RBrace) {
            let proto = self.parse_prototype()?;
            self.expect(TokenTag::Semicolon)?;
            protos.push(proto);
        }
        self.expect(TokenTag::RBrace)?;
        Ok(Decl::ExternLib {
            token,
            module_name: module_token.value,
            lib_name: lib_token.value,
            protos,
        })
    }

    fn parse_type_expr(&mut self) -> Result<TypeExpr, PicoError> {
        let token = self.expect(TokenTag::Id)?;
        Ok(TypeExpr {
            name: token.value.clone(),
            token,
        })
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_block(&mut self) -> Result<Stmt, PicoError> {
        let token = self.expect(TokenTag::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(TokenTag::RBrace) && !self.check(TokenTag::Eof) {
            stmts.push(self.parse_stmt()?);
        }
        self.expect(TokenTag::RBrace)?;
        Ok(Stmt::Block { token, stmts })
    }

    fn parse_stmt(&mut self) -> Result<Stmt, PicoError> {
        match self.current().tag {
            TokenTag::KwReturn => self.parse_return(),
            TokenTag::KwLog => self.parse_log(),
            TokenTag::KwLet => self.parse_let(),
            TokenTag::KwIf => self.parse_if(),
            TokenTag::KwLoop => self.parse_loop(),
            TokenTag::KwWhile => self.parse_while(),
            TokenTag::KwBreak => {
                let token = self.advance();
                self.expect(TokenTag::Semicolon)?;
                Ok(Stmt::Break { token })
            }
            TokenTag::KwContinue => {
                let token = self.advance();
                self.expect(TokenTag::Semicolon)?;
                Ok(Stmt::Continue { token })
            }
            TokenTag::LBrace => self.parse_block(),
            _ => {
                let token = self.current().clone();
                let expr = self.parse_expr(0)?;
                self.expect(TokenTag::Semicolon)?;
                Ok(Stmt::Expr { token, expr })
            }
        }
    }

    fn parse_return(&mut self) -> Result<Stmt, PicoError> {
        let token = self.expect(TokenTag::KwReturn)?;
        let expr = if self.check(TokenTag::Semicolon) {
            None
        } else {
            Some(self.parse_expr(0)?)
        };
        self.expect(TokenTag::Semicolon)?;
        Ok(Stmt::Return { token, expr })
    }

    fn parse_log(&mut self) -> Result<Stmt, PicoError> {
        let token = self.expect(TokenTag::KwLog)?;
        let expr = self.parse_expr(0)?;
        self.expect(TokenTag::Semicolon)?;
        Ok(Stmt::Log { token, expr })
    }

    /// `let x = e;`, `let int x = e;`, `let x;`, `let int x;`
    fn parse_let(&mut self) -> Result<Stmt, PicoError> {
        let token = self.expect(TokenTag::KwLet)?;
        let first = self.expect(TokenTag::Id)?;
        let (ty, name_token) = if self.check(TokenTag::Id) {
            let name = self.advance();
            (
                Some(TypeExpr {
                    name: first.value.clone(),
                    token: first,
                }),
                name,
            )
        } else {
            (None, first)
        };
        let init = if self.eat(TokenTag::Equal).is_some() {
            Some(self.parse_expr(0)?)
        } else {
            None
        };
        self.expect(TokenTag::Semicolon)?;
        Ok(Stmt::Let {
            token,
            name: name_token.value.clone(),
            name_token,
            ty,
            init,
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, PicoError> {
        let token = self.expect(TokenTag::KwIf)?;
        self.expect(TokenTag::LParen)?;
        let cond = self.parse_expr(0)?;
        self.expect(TokenTag::RParen)?;
        let then_block = Box::new(self.parse_block()?);
        let else_block = if self.eat(TokenTag::KwElse).is_some() {
            if self.check(TokenTag::KwIf) {
                Some(Box::new(self.parse_if()?))
            } else {
                Some(Box::new(self.parse_block()?))
            }
        } else {
            None
        };
        Ok(Stmt::If {
            token,
            cond,
            then_block,
            else_block,
        })
    }

    fn parse_loop(&mut self) -> Result<Stmt, PicoError> {
        let token = self.expect(TokenTag::KwLoop)?;
        let body = Box::new(self.parse_block()?);
        Ok(Stmt::Loop { token, body })
    }

    fn parse_while(&mut self) -> Result<Stmt, PicoError> {
        let token = self.expect(TokenTag::KwWhile)?;
        self.expect(TokenTag::LParen)?;
        let cond = self.parse_expr(0)?;
        self.expect(TokenTag::RParen)?;
        let body = Box::new(self.parse_block()?);
        Ok(Stmt::While { token, cond, body })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn parse_expr(&mut self, min_bp: u8) -> Result<Expr, PicoError> {
        let mut lhs = self.parse_unary()?;

        loop {
            let tag = self.current().tag;

            if tag == TokenTag::Equal {
                if ASSIGN_LBP < min_bp {
                    break;
                }
                let token = self.advance();
                let value = self.parse_expr(ASSIGN_RBP)?;
                lhs = Expr::Assignment {
                    token,
                    target: Box::new(lhs),
                    value: Box::new(value),
                };
                continue;
            }

            if let Some(op) = compound_op(tag) {
                if ASSIGN_LBP < min_bp {
                    break;
                }
                let token = self.advance();
                let value = self.parse_expr(ASSIGN_RBP)?;
                lhs = Expr::CompoundAssignment {
                    token,
                    op,
                    target: Box::new(lhs),
                    value: Box::new(value),
                };
                continue;
            }

            let Some((lbp, rbp, op)) = infix_binding(tag) else {
                break;
            };
            if lbp < min_bp {
                break;
            }
            let token = self.advance();
            let rhs = self.parse_expr(rbp)?;
            lhs = Expr::Binary {
                token,
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }

        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, PicoError> {
        let op = match self.current().tag {
            TokenTag::Not => UnaryTag::Not,
            TokenTag::PlusPlus => UnaryTag::PreInc,
            TokenTag::MinusMinus => UnaryTag::PreDec,
            _ => {
                let primary = self.parse_primary()?;
                return self.parse_postfix(primary);
            }
        };
        let token = self.advance();
        let operand = self.parse_unary()?;
        Ok(Expr::Unary {
            token,
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, PicoError> {
        let token = self.current().clone();
        match token.tag {
            TokenTag::IntLit | TokenTag::LongLit => {
                self.advance();
                let long = token.tag == TokenTag::LongLit;
                let digits = token.value.trim_end_matches(['l', 'L']);
                let value = digits.parse::<i64>().map_err(|_| {
                    PicoError::syntax(
                        format!("integer literal '{}' out of range", token.value),
                        token.clone(),
                    )
                })?;
                Ok(Expr::IntLiteral { token, value, long })
            }
            TokenTag::StrLit => {
                self.advance();
                Ok(Expr::StrLiteral {
                    value: token.value.clone(),
                    token,
                })
            }
            TokenTag::KwTrue => {
                self.advance();
                Ok(Expr::BoolLiteral { token, value: true })
            }
            TokenTag::KwFalse => {
                self.advance();
                Ok(Expr::BoolLiteral {
                    token,
                    value: false,
                })
            }
            TokenTag::Id => {
                self.advance();
                Ok(Expr::Identifier {
                    name: token.value.clone(),
                    token,
                })
            }
            TokenTag::LParen => {
                self.advance();
                let expr = self.parse_expr(0)?;
                self.expect(TokenTag::RParen)?;
                Ok(expr)
            }
            tag => Err(PicoError::syntax(
                format!("invalid primary expression: {:?}", tag),
                token,
            )),
        }
    }

    fn parse_postfix(&mut self, mut expr: Expr) -> Result<Expr, PicoError> {
        loop {
            expr = match self.current().tag {
                TokenTag::LParen => self.parse_call(expr)?,
                TokenTag::LBrace if matches!(expr, Expr::Identifier { .. }) => {
                    self.parse_struct_literal(expr)?
                }
                TokenTag::Dot => {
                    let token = self.advance();
                    let field_token = self.expect(TokenTag::Id)?;
                    Expr::FieldAccess {
                        token,
                        obj: Box::new(expr),
                        field: field_token.value.clone(),
                        field_token,
                    }
                }
                TokenTag::ColonColon => {
                    let token = self.advance();
                    let name_token = self.expect(TokenTag::Id)?;
                    Expr::StaticAccess {
                        token,
                        qualifier: Box::new(expr),
                        name: name_token.value.clone(),
                        name_token,
                    }
                }
                TokenTag::PlusPlus => {
                    let token = self.advance();
                    Expr::Unary {
                        token,
                        op: UnaryTag::PostInc,
                        operand: Box::new(expr),
                    }
                }
                TokenTag::MinusMinus => {
                    let token = self.advance();
                    Expr::Unary {
                        token,
                        op: UnaryTag::PostDec,
                        operand: Box::new(expr),
                    }
                }
                _ => break,
            };
        }
        Ok(expr)
    }

    fn parse_call(&mut self, callee: Expr) -> Result<Expr, PicoError> {
        let token = self.expect(TokenTag::LParen)?;
        let mut args = Vec::new();
        while !self.check(TokenTag::RParen) {
            args.push(self.parse_expr(0)?);
            self.eat(TokenTag::Comma);
        }
        self.expect(TokenTag::RParen)?;

        // A call on a primitive type name is cast syntax: `long(x)`.
        if let Expr::Identifier { token: id_token, name } = &callee {
            if cast_target(name) {
                if args.len() != 1 {
                    return Err(PicoError::syntax(
                        format!("cast to '{}' takes exactly one argument", name),
                        token,
                    ));
                }
                return Ok(Expr::Cast {
                    token,
                    ty: TypeExpr {
                        token: id_token.clone(),
                        name: name.clone(),
                    },
                    expr: Box::new(args.remove(0)),
                });
            }
        }

        Ok(Expr::Call {
            token,
            callee: Box::new(callee),
            args,
        })
    }

    /// `Name { .field = value, ... }`
    fn parse_struct_literal(&mut self, name_expr: Expr) -> Result<Expr, PicoError> {
        let Expr::Identifier { token: name_token, name } = name_expr else {
            unreachable!("struct literal postfix only applies to identifiers");
        };
        let token = self.expect(TokenTag::LBrace)?;
        let mut fields = Vec::new();
        while !self.check(TokenTag::RBrace) {
            self.expect(TokenTag::Dot)?;
            let field_token = self.expect(TokenTag::Id)?;
            self.expect(TokenTag::Equal)?;
            let value = self.parse_expr(0)?;
            self.eat(TokenTag::Comma);
            fields.push(FieldInit {
                name: field_token.value.clone(),
                token: field_token,
                value,
            });
        }
        self.expect(TokenTag::RBrace)?;
        Ok(Expr::StructLiteral {
            token,
            name,
            name_token,
            fields,
        })
    }
}
