//! melc-par - Parser
//!
//! Recursive-descent parser over the token stream from `melc-lex`. Operator
//! expressions use one function per precedence level; everything else is
//! straight-line descent. The parser owns the [`NodeIdGen`] for the tree it
//! builds, so node ids are dense and unique within one parse.

use melc_ast::*;
use melc_lex::{LexError, Tok, Token};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("line {line}: syntax error: expected {expected}, found {found}")]
    Unexpected {
        expected: String,
        found: String,
        line: u32,
    },
}

/// Scan and parse a whole program.
pub fn parse(source: &str) -> Result<Program, ParseError> {
    let toks = melc_lex::scan(source)?;
    Parser::new(toks).program()
}

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
    ids: NodeIdGen,
}

impl Parser {
    fn new(toks: Vec<Tok>) -> Self {
        Self {
            toks,
            pos: 0,
            ids: NodeIdGen::new(),
        }
    }

    fn peek(&self) -> &Token {
        &self.toks[self.pos].kind
    }

    fn peek2(&self) -> &Token {
        &self.toks[(self.pos + 1).min(self.toks.len() - 1)].kind
    }

    fn line(&self) -> u32 {
        self.toks[self.pos].line
    }

    fn bump(&mut self) -> Token {
        let t = self.toks[self.pos].kind.clone();
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.peek() == tok {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Token, what: &str) -> Result<(), ParseError> {
        if self.peek() == &tok {
            self.bump();
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        ParseError::Unexpected {
            expected: expected.to_string(),
            found: self.peek().to_string(),
            line: self.line(),
        }
    }

    fn ident(&mut self, what: &str) -> Result<String, ParseError> {
        match self.peek() {
            Token::Ident(_) => match self.bump() {
                Token::Ident(s) => Ok(s),
                _ => unreachable!(),
            },
            _ => Err(self.unexpected(what)),
        }
    }

    // ------------------------------------------------------------------
    // Definitions
    // ------------------------------------------------------------------

    fn program(&mut self) -> Result<Program, ParseError> {
        let mut defs = Vec::new();
        loop {
            match self.peek() {
                Token::Let => defs.push(Definition::Let(self.letdef()?)),
                Token::Type => defs.push(Definition::Type(self.typedef()?)),
                Token::Eof => return Ok(Program { defs }),
                _ => return Err(self.unexpected("a `let` or `type` definition")),
            }
        }
    }

    fn letdef(&mut self) -> Result<LetDef, ParseError> {
        let line = self.line();
        self.expect(Token::Let, "`let`")?;
        let recursive = self.eat(&Token::Rec);
        let mut defs = vec![self.defstmt()?];
        while self.eat(&Token::And) {
            defs.push(self.defstmt()?);
        }
        Ok(LetDef {
            recursive,
            defs,
            line,
        })
    }

    fn defstmt(&mut self) -> Result<DefStmt, ParseError> {
        let line = self.line();
        if self.eat(&Token::Mutable) {
            let name = self.ident("an identifier after `mutable`")?;
            let sizes = if self.eat(&Token::LBracket) {
                let sizes = self.expr_list(Token::RBracket)?;
                Some(sizes)
            } else {
                None
            };
            let ty = self.opt_annotation()?;
            return Ok(match sizes {
                Some(sizes) => DefStmt::Array(ArrayDef {
                    id: self.ids.fresh(),
                    name,
                    sizes,
                    elem_ty: ty,
                    line,
                }),
                None => DefStmt::Variable(VariableDef {
                    id: self.ids.fresh(),
                    name,
                    ty,
                    line,
                }),
            });
        }

        let name = self.ident("an identifier")?;
        let mut params = Vec::new();
        loop {
            match self.peek() {
                Token::Ident(_) => {
                    let pline = self.line();
                    let pname = self.ident("a parameter name")?;
                    params.push(Param {
                        id: self.ids.fresh(),
                        name: pname,
                        ty: TypeExpr::unknown(pline),
                        line: pline,
                    });
                }
                Token::LParen if matches!(self.peek2(), Token::Ident(_)) => {
                    let pline = self.line();
                    self.bump();
                    let pname = self.ident("a parameter name")?;
                    self.expect(Token::Colon, "`:` in a typed parameter")?;
                    let ty = self.type_expr()?;
                    self.expect(Token::RParen, "`)` closing the parameter")?;
                    params.push(Param {
                        id: self.ids.fresh(),
                        name: pname,
                        ty,
                        line: pline,
                    });
                }
                _ => break,
            }
        }
        let ty = self.opt_annotation()?;
        self.expect(Token::Eq, "`=`")?;

        // `id = new array [e, ..] of t` is array-definition sugar
        if params.is_empty() && self.peek() == &Token::New && self.peek2() == &Token::Array {
            self.bump();
            self.bump();
            self.expect(Token::LBracket, "`[` after `new array`")?;
            let sizes = self.expr_list(Token::RBracket)?;
            self.expect(Token::Of, "`of` in an array definition")?;
            let elem_ty = self.type_postfix()?;
            return Ok(DefStmt::Array(ArrayDef {
                id: self.ids.fresh(),
                name,
                sizes,
                elem_ty,
                line,
            }));
        }

        let body = self.expr()?;
        Ok(if params.is_empty() {
            DefStmt::Constant(ConstantDef {
                id: self.ids.fresh(),
                name,
                ty,
                expr: body,
                line,
            })
        } else {
            DefStmt::Function(FunctionDef {
                id: self.ids.fresh(),
                name,
                params,
                ret_ty: ty,
                body,
                line,
            })
        })
    }

    fn opt_annotation(&mut self) -> Result<TypeExpr, ParseError> {
        if self.eat(&Token::Colon) {
            self.type_expr()
        } else {
            Ok(TypeExpr::unknown(self.line()))
        }
    }

    fn typedef(&mut self) -> Result<TypeDef, ParseError> {
        let line = self.line();
        self.expect(Token::Type, "`type`")?;
        let mut decls = vec![self.type_decl()?];
        while self.eat(&Token::And) {
            decls.push(self.type_decl()?);
        }
        Ok(TypeDef { decls, line })
    }

    fn type_decl(&mut self) -> Result<TypeDecl, ParseError> {
        let line = self.line();
        let name = self.ident("a type name")?;
        self.expect(Token::Eq, "`=` in a type definition")?;
        self.eat(&Token::Bar);
        let mut constructors = vec![self.constr_decl()?];
        while self.eat(&Token::Bar) {
            constructors.push(self.constr_decl()?);
        }
        Ok(TypeDecl {
            name,
            constructors,
            line,
        })
    }

    fn constr_decl(&mut self) -> Result<ConstrDecl, ParseError> {
        let line = self.line();
        let name = match self.peek() {
            Token::CapIdent(_) => match self.bump() {
                Token::CapIdent(s) => s,
                _ => unreachable!(),
            },
            _ => return Err(self.unexpected("a constructor name")),
        };
        let mut fields = Vec::new();
        if self.eat(&Token::Of) {
            loop {
                fields.push(self.type_postfix()?);
                if !self.starts_type() {
                    break;
                }
            }
        }
        Ok(ConstrDecl { name, fields, line })
    }

    fn starts_type(&self) -> bool {
        matches!(
            self.peek(),
            Token::KwInt
                | Token::KwFloat
                | Token::KwBool
                | Token::KwChar
                | Token::KwUnit
                | Token::Ident(_)
                | Token::LParen
        )
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    fn type_expr(&mut self) -> Result<TypeExpr, ParseError> {
        let line = self.line();
        let lhs = self.type_array()?;
        if self.eat(&Token::Arrow) {
            let rhs = self.type_expr()?;
            Ok(TypeExpr {
                kind: TypeExprKind::Fn(Box::new(lhs), Box::new(rhs)),
                line,
            })
        } else {
            Ok(lhs)
        }
    }

    fn type_array(&mut self) -> Result<TypeExpr, ParseError> {
        let line = self.line();
        if self.eat(&Token::Array) {
            let mut dims = 1usize;
            if self.eat(&Token::LBracket) {
                self.expect(Token::Star, "`*` in array dimensions")?;
                dims = 1;
                while self.eat(&Token::Comma) {
                    self.expect(Token::Star, "`*` in array dimensions")?;
                    dims += 1;
                }
                self.expect(Token::RBracket, "`]` closing array dimensions")?;
            }
            self.expect(Token::Of, "`of` in an array type")?;
            let elem = self.type_postfix()?;
            Ok(TypeExpr {
                kind: TypeExprKind::Array {
                    dims,
                    elem: Box::new(elem),
                },
                line,
            })
        } else {
            self.type_postfix()
        }
    }

    fn type_postfix(&mut self) -> Result<TypeExpr, ParseError> {
        let mut t = self.type_primary()?;
        while self.peek() == &Token::Ref {
            let line = self.line();
            self.bump();
            t = TypeExpr {
                kind: TypeExprKind::Ref(Box::new(t)),
                line,
            };
        }
        Ok(t)
    }

    fn type_primary(&mut self) -> Result<TypeExpr, ParseError> {
        let line = self.line();
        let kind = match self.peek().clone() {
            Token::KwUnit => {
                self.bump();
                TypeExprKind::Unit
            }
            Token::KwInt => {
                self.bump();
                TypeExprKind::Int
            }
            Token::KwChar => {
                self.bump();
                TypeExprKind::Char
            }
            Token::KwBool => {
                self.bump();
                TypeExprKind::Bool
            }
            Token::KwFloat => {
                self.bump();
                TypeExprKind::Float
            }
            Token::Ident(name) => {
                self.bump();
                TypeExprKind::Named(name)
            }
            Token::LParen => {
                self.bump();
                let t = self.type_expr()?;
                self.expect(Token::RParen, "`)` closing a type")?;
                return Ok(t);
            }
            _ => return Err(self.unexpected("a type")),
        };
        Ok(TypeExpr { kind, line })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn mk(&mut self, line: u32, kind: ExprKind) -> Expr {
        Expr::new(self.ids.fresh(), line, kind)
    }

    fn expr_list(&mut self, close: Token) -> Result<Vec<Expr>, ParseError> {
        let mut list = vec![self.expr()?];
        while self.eat(&Token::Comma) {
            list.push(self.expr()?);
        }
        self.expect(close, "the closing bracket")?;
        Ok(list)
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        let mut e = self.assign_expr()?;
        while self.peek() == &Token::Semicolon {
            let line = self.line();
            self.bump();
            let rhs = self.assign_expr()?;
            e = self.mk(
                line,
                ExprKind::Binop {
                    lhs: Box::new(e),
                    op: BinOp::Seq,
                    rhs: Box::new(rhs),
                },
            );
        }
        Ok(e)
    }

    fn assign_expr(&mut self) -> Result<Expr, ParseError> {
        let e = self.or_expr()?;
        if self.peek() == &Token::Assign {
            let line = self.line();
            self.bump();
            let rhs = self.assign_expr()?;
            return Ok(self.mk(
                line,
                ExprKind::Binop {
                    lhs: Box::new(e),
                    op: BinOp::Assign,
                    rhs: Box::new(rhs),
                },
            ));
        }
        Ok(e)
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut e = self.and_expr()?;
        while self.peek() == &Token::BarBar {
            let line = self.line();
            self.bump();
            let rhs = self.and_expr()?;
            e = self.mk(
                line,
                ExprKind::Binop {
                    lhs: Box::new(e),
                    op: BinOp::Or,
                    rhs: Box::new(rhs),
                },
            );
        }
        Ok(e)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut e = self.cmp_expr()?;
        while self.peek() == &Token::AmpAmp {
            let line = self.line();
            self.bump();
            let rhs = self.cmp_expr()?;
            e = self.mk(
                line,
                ExprKind::Binop {
                    lhs: Box::new(e),
                    op: BinOp::And,
                    rhs: Box::new(rhs),
                },
            );
        }
        Ok(e)
    }

    fn cmp_expr(&mut self) -> Result<Expr, ParseError> {
        let e = self.add_expr()?;
        let op = match self.peek() {
            Token::Eq => BinOp::Eq,
            Token::Neq => BinOp::Neq,
            Token::EqEq => BinOp::StructEq,
            Token::BangEq => BinOp::StructNeq,
            Token::Lt => BinOp::Lt,
            Token::Gt => BinOp::Gt,
            Token::Leq => BinOp::Le,
            Token::Geq => BinOp::Ge,
            _ => return Ok(e),
        };
        let line = self.line();
        self.bump();
        let rhs = self.add_expr()?;
        Ok(self.mk(
            line,
            ExprKind::Binop {
                lhs: Box::new(e),
                op,
                rhs: Box::new(rhs),
            },
        ))
    }

    fn add_expr(&mut self) -> Result<Expr, ParseError> {
        let mut e = self.mul_expr()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                Token::PlusDot => BinOp::FAdd,
                Token::MinusDot => BinOp::FSub,
                _ => return Ok(e),
            };
            let line = self.line();
            self.bump();
            let rhs = self.mul_expr()?;
            e = self.mk(
                line,
                ExprKind::Binop {
                    lhs: Box::new(e),
                    op,
                    rhs: Box::new(rhs),
                },
            );
        }
    }

    fn mul_expr(&mut self) -> Result<Expr, ParseError> {
        let mut e = self.pow_expr()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::StarDot => BinOp::FMul,
                Token::SlashDot => BinOp::FDiv,
                Token::Mod => BinOp::Mod,
                _ => return Ok(e),
            };
            let line = self.line();
            self.bump();
            let rhs = self.pow_expr()?;
            e = self.mk(
                line,
                ExprKind::Binop {
                    lhs: Box::new(e),
                    op,
                    rhs: Box::new(rhs),
                },
            );
        }
    }

    fn pow_expr(&mut self) -> Result<Expr, ParseError> {
        let e = self.unary_expr()?;
        if self.peek() == &Token::StarStar {
            let line = self.line();
            self.bump();
            let rhs = self.pow_expr()?;
            return Ok(self.mk(
                line,
                ExprKind::Binop {
                    lhs: Box::new(e),
                    op: BinOp::Pow,
                    rhs: Box::new(rhs),
                },
            ));
        }
        Ok(e)
    }

    fn unary_expr(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek() {
            Token::Plus => UnOp::Plus,
            Token::Minus => UnOp::Minus,
            Token::PlusDot => UnOp::FPlus,
            Token::MinusDot => UnOp::FMinus,
            Token::Not => UnOp::Not,
            Token::Delete => UnOp::Delete,
            _ => return self.atom(),
        };
        let line = self.line();
        self.bump();
        let e = self.unary_expr()?;
        Ok(self.mk(
            line,
            ExprKind::Unop {
                op,
                expr: Box::new(e),
            },
        ))
    }

    fn starts_atom(&self) -> bool {
        matches!(
            self.peek(),
            Token::Int(_)
                | Token::Float(_)
                | Token::Char(_)
                | Token::Str(_)
                | Token::True
                | Token::False
                | Token::Ident(_)
                | Token::CapIdent(_)
                | Token::LParen
                | Token::Bang
                | Token::Begin
        )
    }

    fn atom(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        match self.peek().clone() {
            Token::Int(n) => {
                self.bump();
                Ok(self.mk(line, ExprKind::IntLit(n)))
            }
            Token::Float(v) => {
                self.bump();
                Ok(self.mk(line, ExprKind::FloatLit(v)))
            }
            Token::Char(c) => {
                self.bump();
                Ok(self.mk(line, ExprKind::CharLit(c)))
            }
            Token::Str(s) => {
                self.bump();
                Ok(self.mk(line, ExprKind::StringLit(s)))
            }
            Token::True => {
                self.bump();
                Ok(self.mk(line, ExprKind::BoolLit(true)))
            }
            Token::False => {
                self.bump();
                Ok(self.mk(line, ExprKind::BoolLit(false)))
            }
            Token::LParen => {
                self.bump();
                if self.eat(&Token::RParen) {
                    return Ok(self.mk(line, ExprKind::UnitLit));
                }
                let e = self.expr()?;
                self.expect(Token::RParen, "`)`")?;
                Ok(e)
            }
            Token::Begin => {
                self.bump();
                let e = self.expr()?;
                self.expect(Token::End, "`end`")?;
                Ok(e)
            }
            Token::Bang => {
                self.bump();
                let e = self.atom()?;
                Ok(self.mk(
                    line,
                    ExprKind::Unop {
                        op: UnOp::Deref,
                        expr: Box::new(e),
                    },
                ))
            }
            Token::Ident(name) => {
                self.bump();
                if self.eat(&Token::LBracket) {
                    let indices = self.expr_list(Token::RBracket)?;
                    return Ok(self.mk(line, ExprKind::ArrayAccess { name, indices }));
                }
                let mut args = Vec::new();
                while self.starts_atom() {
                    args.push(self.atom()?);
                }
                Ok(if args.is_empty() {
                    self.mk(line, ExprKind::Ident(name))
                } else {
                    self.mk(line, ExprKind::Call { name, args })
                })
            }
            Token::CapIdent(name) => {
                self.bump();
                let mut args = Vec::new();
                while self.starts_atom() {
                    args.push(self.atom()?);
                }
                Ok(self.mk(line, ExprKind::ConstrCall { name, args }))
            }
            Token::Dim => {
                self.bump();
                let index = if let Token::Int(n) = self.peek().clone() {
                    self.bump();
                    n
                } else {
                    1
                };
                let array = self.ident("an array name after `dim`")?;
                Ok(self.mk(line, ExprKind::Dim { index, array }))
            }
            Token::New => {
                self.bump();
                let t = self.type_postfix()?;
                Ok(self.mk(line, ExprKind::New(t)))
            }
            Token::If => {
                self.bump();
                let cond = self.expr()?;
                self.expect(Token::Then, "`then`")?;
                let then_expr = self.expr()?;
                let else_expr = if self.eat(&Token::Else) {
                    Some(Box::new(self.expr()?))
                } else {
                    None
                };
                Ok(self.mk(
                    line,
                    ExprKind::If {
                        cond: Box::new(cond),
                        then_expr: Box::new(then_expr),
                        else_expr,
                    },
                ))
            }
            Token::While => {
                self.bump();
                let cond = self.expr()?;
                self.expect(Token::Do, "`do`")?;
                let body = self.expr()?;
                self.expect(Token::Done, "`done`")?;
                Ok(self.mk(
                    line,
                    ExprKind::While {
                        cond: Box::new(cond),
                        body: Box::new(body),
                    },
                ))
            }
            Token::For => {
                self.bump();
                let var = self.ident("the loop variable")?;
                let var_id = self.ids.fresh();
                self.expect(Token::Eq, "`=` after the loop variable")?;
                let start = self.expr()?;
                let ascending = match self.bump() {
                    Token::To => true,
                    Token::Downto => false,
                    _ => return Err(self.unexpected("`to` or `downto`")),
                };
                let finish = self.expr()?;
                self.expect(Token::Do, "`do`")?;
                let body = self.expr()?;
                self.expect(Token::Done, "`done`")?;
                Ok(self.mk(
                    line,
                    ExprKind::For {
                        var,
                        var_id,
                        start: Box::new(start),
                        ascending,
                        finish: Box::new(finish),
                        body: Box::new(body),
                    },
                ))
            }
            Token::Match => {
                self.bump();
                let scrutinee = self.expr()?;
                self.expect(Token::With, "`with`")?;
                self.eat(&Token::Bar);
                let mut clauses = vec![self.clause()?];
                while self.eat(&Token::Bar) {
                    clauses.push(self.clause()?);
                }
                Ok(self.mk(
                    line,
                    ExprKind::Match {
                        scrutinee: Box::new(scrutinee),
                        clauses,
                    },
                ))
            }
            Token::Let => {
                let def = self.letdef()?;
                self.expect(Token::In, "`in`")?;
                let body = self.expr()?;
                Ok(self.mk(
                    line,
                    ExprKind::LetIn {
                        def: Box::new(def),
                        body: Box::new(body),
                    },
                ))
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    fn clause(&mut self) -> Result<Clause, ParseError> {
        let line = self.line();
        let pattern = self.pattern()?;
        self.expect(Token::Arrow, "`->` in a match clause")?;
        let body = self.expr()?;
        Ok(Clause {
            pattern,
            body,
            line,
        })
    }

    fn pattern(&mut self) -> Result<Pattern, ParseError> {
        let line = self.line();
        if let Token::CapIdent(name) = self.peek().clone() {
            self.bump();
            let mut args = Vec::new();
            while self.starts_pattern_atom() {
                args.push(self.pattern_atom()?);
            }
            return Ok(Pattern {
                id: self.ids.fresh(),
                line,
                kind: PatternKind::Constr { name, args },
            });
        }
        self.pattern_atom()
    }

    fn starts_pattern_atom(&self) -> bool {
        matches!(
            self.peek(),
            Token::Int(_)
                | Token::Float(_)
                | Token::Char(_)
                | Token::True
                | Token::False
                | Token::Ident(_)
                | Token::CapIdent(_)
                | Token::LParen
                | Token::Plus
                | Token::Minus
        )
    }

    fn pattern_atom(&mut self) -> Result<Pattern, ParseError> {
        let line = self.line();
        let id = self.ids.fresh();
        match self.peek().clone() {
            Token::Int(n) => {
                self.bump();
                Ok(Pattern {
                    id,
                    line,
                    kind: PatternKind::Int(n),
                })
            }
            Token::Float(v) => {
                self.bump();
                Ok(Pattern {
                    id,
                    line,
                    kind: PatternKind::Float(v),
                })
            }
            Token::Plus | Token::Minus => {
                let negative = self.bump() == Token::Minus;
                match self.bump() {
                    Token::Int(n) => Ok(Pattern {
                        id,
                        line,
                        kind: PatternKind::Int(if negative { -n } else { n }),
                    }),
                    Token::Float(v) => Ok(Pattern {
                        id,
                        line,
                        kind: PatternKind::Float(if negative { -v } else { v }),
                    }),
                    _ => Err(self.unexpected("a numeric literal pattern")),
                }
            }
            Token::Char(c) => {
                self.bump();
                Ok(Pattern {
                    id,
                    line,
                    kind: PatternKind::Char(c),
                })
            }
            Token::True => {
                self.bump();
                Ok(Pattern {
                    id,
                    line,
                    kind: PatternKind::Bool(true),
                })
            }
            Token::False => {
                self.bump();
                Ok(Pattern {
                    id,
                    line,
                    kind: PatternKind::Bool(false),
                })
            }
            Token::Ident(name) => {
                self.bump();
                Ok(Pattern {
                    id,
                    line,
                    kind: PatternKind::Id(name),
                })
            }
            Token::CapIdent(name) => {
                self.bump();
                Ok(Pattern {
                    id,
                    line,
                    kind: PatternKind::Constr {
                        name,
                        args: Vec::new(),
                    },
                })
            }
            Token::LParen => {
                self.bump();
                let p = self.pattern()?;
                self.expect(Token::RParen, "`)` closing a pattern")?;
                Ok(p)
            }
            _ => Err(self.unexpected("a pattern")),
        }
    }
}

#[cfg(test)]
mod tests;
