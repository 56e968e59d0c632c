//! Recursive-descent parser producing a [`Program`].
use super::ast::*;
use super::lexer::{Keyword, Lexer, Punct, RawTemplatePart, Token, TokenKind};
use crate::compute::error::{EvalError, EvalResult};
use std::sync::Arc;

/// Deepest nesting of statements and expressions a formula may use.
const MAX_NESTING: usize = 128;

/// Parses a whole formula body.
pub fn parse_program(source: &str) -> EvalResult<Program> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser::new(tokens, 0);
    let mut body = Vec::new();
    while !parser.at_eof() {
        parser.statement(&mut body)?;
    }
    Ok(Program { body })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>, depth: usize) -> Self {
        Self { tokens, pos: 0, depth }
    }

    /// Runs one level of recursive descent, bounding the nesting depth.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> EvalResult<T>) -> EvalResult<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.error_here(format!("formula is nested more than {} levels deep", MAX_NESTING)));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    // --- Token cursor ---

    fn peek(&self) -> &Token {
        // The lexer always terminates the stream with `Eof`.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind_at(&self, offset: usize) -> &TokenKind {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn is_punct(&self, p: Punct) -> bool {
        self.peek().kind == TokenKind::Punct(p)
    }

    fn is_keyword(&self, k: Keyword) -> bool {
        self.peek().kind == TokenKind::Keyword(k)
    }

    fn eat_punct(&mut self, p: Punct) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error_here(&self, message: impl Into<String>) -> EvalError {
        let tok = self.peek();
        EvalError::syntax(message, tok.line, tok.column)
    }

    fn unexpected(&self, expected: &str) -> EvalError {
        let tok = self.peek();
        let found = match &tok.kind {
            TokenKind::Eof => "end of formula".to_string(),
            TokenKind::Reserved(word) => {
                return self.error_here(format!("'{}' is not supported in formulas", word))
            }
            other => format!("{:?}", other),
        };
        self.error_here(format!("expected {}, found {}", expected, found))
    }

    fn expect_punct(&mut self, p: Punct, what: &str) -> EvalResult<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_ident(&mut self) -> EvalResult<String> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    /// Accepts `;`, or a statement boundary the source leaves implicit.
    fn end_statement(&mut self) -> EvalResult<()> {
        if self.eat_punct(Punct::Semi) {
            return Ok(());
        }
        let tok = self.peek();
        if tok.newline_before || tok.kind == TokenKind::Eof || tok.kind == TokenKind::Punct(Punct::RBrace) {
            Ok(())
        } else {
            Err(self.unexpected("';'"))
        }
    }

    // --- Statements ---

    fn statement(&mut self, out: &mut Vec<Stmt>) -> EvalResult<()> {
        self.nested(|p| p.statement_inner(out))
    }

    fn statement_inner(&mut self, out: &mut Vec<Stmt>) -> EvalResult<()> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Punct(Punct::Semi) => {
                self.advance();
            }
            TokenKind::Punct(Punct::LBrace) => {
                let body = self.block()?;
                out.push(Stmt::Block(body));
            }
            TokenKind::Keyword(Keyword::Let | Keyword::Const | Keyword::Var) => {
                self.declaration(out)?;
                self.end_statement()?;
            }
            TokenKind::Keyword(Keyword::If) => out.push(self.if_statement()?),
            TokenKind::Keyword(Keyword::While) => {
                self.advance();
                let cond = self.paren_expr()?;
                let body = self.body()?;
                out.push(Stmt::While { cond, body });
            }
            TokenKind::Keyword(Keyword::Do) => {
                self.advance();
                let body = self.body()?;
                if !self.is_keyword(Keyword::While) {
                    return Err(self.unexpected("'while'"));
                }
                self.advance();
                let cond = self.paren_expr()?;
                self.end_statement()?;
                out.push(Stmt::DoWhile { body, cond });
            }
            TokenKind::Keyword(Keyword::For) => out.push(self.for_statement()?),
            TokenKind::Keyword(Keyword::Switch) => out.push(self.switch_statement()?),
            TokenKind::Keyword(Keyword::Function) => {
                self.advance();
                let name = self.expect_ident()?;
                let def = self.function_rest(Some(name))?;
                out.push(Stmt::Function(Arc::new(def)));
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                let next = self.peek();
                let bare = next.newline_before
                    || matches!(
                        next.kind,
                        TokenKind::Eof | TokenKind::Punct(Punct::Semi) | TokenKind::Punct(Punct::RBrace)
                    );
                let value = if bare { None } else { Some(self.expr()?) };
                self.end_statement()?;
                out.push(Stmt::Return(value));
            }
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                self.end_statement()?;
                out.push(Stmt::Break);
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                self.end_statement()?;
                out.push(Stmt::Continue);
            }
            _ => {
                let stmt = self.simple_statement()?;
                self.end_statement()?;
                out.push(stmt);
            }
        }
        Ok(())
    }

    fn block(&mut self) -> EvalResult<Vec<Stmt>> {
        self.expect_punct(Punct::LBrace, "'{'")?;
        let mut body = Vec::new();
        while !self.is_punct(Punct::RBrace) {
            if self.at_eof() {
                return Err(self.unexpected("'}'"));
            }
            self.statement(&mut body)?;
        }
        self.advance();
        Ok(body)
    }

    /// A braced block or a single statement.
    fn body(&mut self) -> EvalResult<Vec<Stmt>> {
        if self.is_punct(Punct::LBrace) {
            self.block()
        } else {
            let mut body = Vec::new();
            self.statement(&mut body)?;
            Ok(body)
        }
    }

    fn paren_expr(&mut self) -> EvalResult<Expr> {
        self.expect_punct(Punct::LParen, "'('")?;
        let e = self.expr()?;
        self.expect_punct(Punct::RParen, "')'")?;
        Ok(e)
    }

    fn decl_kind(&mut self) -> EvalResult<DeclKind> {
        let kind = match self.peek().kind {
            TokenKind::Keyword(Keyword::Let) => DeclKind::Let,
            TokenKind::Keyword(Keyword::Const) => DeclKind::Const,
            TokenKind::Keyword(Keyword::Var) => DeclKind::Var,
            _ => return Err(self.unexpected("declaration")),
        };
        self.advance();
        Ok(kind)
    }

    fn declaration(&mut self, out: &mut Vec<Stmt>) -> EvalResult<()> {
        let kind = self.decl_kind()?;
        loop {
            let pattern = self.pattern()?;
            let init = if self.eat_punct(Punct::Assign) { Some(self.expr()?) } else { None };
            if init.is_none() && (kind == DeclKind::Const || !matches!(pattern, Pattern::Name(_))) {
                return Err(self.error_here("declaration requires an initializer"));
            }
            out.push(Stmt::Let { kind, pattern, init });
            if !self.eat_punct(Punct::Comma) {
                return Ok(());
            }
        }
    }

    fn pattern(&mut self) -> EvalResult<Pattern> {
        if self.eat_punct(Punct::LBrace) {
            let mut pairs = Vec::new();
            while !self.eat_punct(Punct::RBrace) {
                let key = self.property_name()?;
                let binding = if self.eat_punct(Punct::Colon) { self.expect_ident()? } else { key.clone() };
                pairs.push((key, binding));
                if !self.eat_punct(Punct::Comma) {
                    self.expect_punct(Punct::RBrace, "'}'")?;
                    break;
                }
            }
            return Ok(Pattern::Object(pairs));
        }
        if self.eat_punct(Punct::LBracket) {
            let mut items = Vec::new();
            while !self.eat_punct(Punct::RBracket) {
                if self.eat_punct(Punct::Comma) {
                    items.push(None);
                    continue;
                }
                items.push(Some(self.expect_ident()?));
                if !self.eat_punct(Punct::Comma) {
                    self.expect_punct(Punct::RBracket, "']'")?;
                    break;
                }
            }
            return Ok(Pattern::Array(items));
        }
        Ok(Pattern::Name(self.expect_ident()?))
    }

    fn if_statement(&mut self) -> EvalResult<Stmt> {
        self.advance();
        let cond = self.paren_expr()?;
        let then = self.body()?;
        let otherwise = if self.is_keyword(Keyword::Else) {
            self.advance();
            if self.is_keyword(Keyword::If) {
                Some(vec![self.if_statement()?])
            } else {
                Some(self.body()?)
            }
        } else {
            None
        };
        Ok(Stmt::If { cond, then, otherwise })
    }

    fn for_statement(&mut self) -> EvalResult<Stmt> {
        self.advance();
        self.expect_punct(Punct::LParen, "'('")?;

        let decl_offset = match self.peek().kind {
            TokenKind::Keyword(Keyword::Let | Keyword::Const | Keyword::Var) => 1,
            _ => 0,
        };

        // for (const { a, b } of xs) / for (k in obj)
        let start = self.pos;
        let binding = if decl_offset == 1 {
            self.advance();
            self.pattern().ok()
        } else {
            self.expect_ident().ok().map(Pattern::Name)
        };
        let is_of = self.peek().kind == TokenKind::Ident("of".into());
        let is_in = self.is_keyword(Keyword::In);
        if let Some(binding) = binding.filter(|_| is_of || is_in) {
            self.advance();
            let source = self.expr()?;
            self.expect_punct(Punct::RParen, "')'")?;
            let body = self.body()?;
            return Ok(if is_of {
                Stmt::ForOf { binding, iterable: source, body }
            } else {
                Stmt::ForIn { binding, object: source, body }
            });
        }
        self.pos = start;

        let init = if self.is_punct(Punct::Semi) {
            None
        } else if decl_offset == 1 {
            let mut decls = Vec::new();
            self.declaration(&mut decls)?;
            if decls.len() == 1 {
                decls.pop().map(Box::new)
            } else {
                Some(Box::new(Stmt::Block(decls)))
            }
        } else {
            Some(Box::new(self.simple_statement()?))
        };
        self.expect_punct(Punct::Semi, "';'")?;
        let cond = if self.is_punct(Punct::Semi) { None } else { Some(self.expr()?) };
        self.expect_punct(Punct::Semi, "';'")?;
        let update = if self.is_punct(Punct::RParen) {
            None
        } else {
            Some(Box::new(self.simple_statement()?))
        };
        self.expect_punct(Punct::RParen, "')'")?;
        let body = self.body()?;
        Ok(Stmt::For { init, cond, update, body })
    }

    fn switch_statement(&mut self) -> EvalResult<Stmt> {
        self.advance();
        let discriminant = self.paren_expr()?;
        self.expect_punct(Punct::LBrace, "'{'")?;
        let mut cases = Vec::new();
        let mut seen_default = false;
        while !self.eat_punct(Punct::RBrace) {
            let test = if self.is_keyword(Keyword::Case) {
                self.advance();
                Some(self.expr()?)
            } else if self.is_keyword(Keyword::Default) {
                self.advance();
                if seen_default {
                    return Err(self.error_here("duplicate default clause"));
                }
                seen_default = true;
                None
            } else {
                return Err(self.unexpected("'case' or 'default'"));
            };
            self.expect_punct(Punct::Colon, "':'")?;
            let mut body = Vec::new();
            while !self.is_keyword(Keyword::Case)
                && !self.is_keyword(Keyword::Default)
                && !self.is_punct(Punct::RBrace)
            {
                if self.at_eof() {
                    return Err(self.unexpected("'}'"));
                }
                self.statement(&mut body)?;
            }
            cases.push(SwitchCase { test, body });
        }
        Ok(Stmt::Switch { discriminant, cases })
    }

    /// Expression statement, assignment, or increment/decrement.
    fn simple_statement(&mut self) -> EvalResult<Stmt> {
        if self.is_punct(Punct::PlusPlus) || self.is_punct(Punct::MinusMinus) {
            let op = if self.is_punct(Punct::PlusPlus) { AssignOp::Add } else { AssignOp::Sub };
            self.advance();
            let target = self.unary()?;
            return self.assignment(target, op, Expr::Number(1.0));
        }

        let expr = self.expr()?;
        let op = match self.peek().kind {
            TokenKind::Punct(Punct::Assign) => Some(AssignOp::Set),
            TokenKind::Punct(Punct::PlusAssign) => Some(AssignOp::Add),
            TokenKind::Punct(Punct::MinusAssign) => Some(AssignOp::Sub),
            TokenKind::Punct(Punct::StarAssign) => Some(AssignOp::Mul),
            TokenKind::Punct(Punct::SlashAssign) => Some(AssignOp::Div),
            TokenKind::Punct(Punct::PercentAssign) => Some(AssignOp::Rem),
            TokenKind::Punct(Punct::StarStarAssign) => Some(AssignOp::Pow),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let value = self.expr()?;
            return self.assignment(expr, op, value);
        }
        if !self.peek().newline_before && (self.is_punct(Punct::PlusPlus) || self.is_punct(Punct::MinusMinus)) {
            let op = if self.is_punct(Punct::PlusPlus) { AssignOp::Add } else { AssignOp::Sub };
            self.advance();
            return self.assignment(expr, op, Expr::Number(1.0));
        }
        Ok(Stmt::Expr(expr))
    }

    fn assignment(&self, target: Expr, op: AssignOp, value: Expr) -> EvalResult<Stmt> {
        if !target.is_place() {
            return Err(self.error_here("invalid assignment target"));
        }
        Ok(Stmt::Assign { target, op, value })
    }

    // --- Expressions ---

    fn expr(&mut self) -> EvalResult<Expr> {
        self.nested(Self::conditional)
    }

    fn conditional(&mut self) -> EvalResult<Expr> {
        if let Some(func) = self.try_arrow()? {
            return Ok(func);
        }
        let cond = self.binary(0)?;
        if self.eat_punct(Punct::Question) {
            let then = self.expr()?;
            self.expect_punct(Punct::Colon, "':'")?;
            let otherwise = self.expr()?;
            return Ok(Expr::Conditional {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(cond)
    }

    fn try_arrow(&mut self) -> EvalResult<Option<Expr>> {
        let params = match (&self.peek().kind, self.peek_kind_at(1)) {
            (TokenKind::Ident(name), TokenKind::Punct(Punct::Arrow)) => {
                let name = name.clone();
                self.advance();
                vec![name]
            }
            (TokenKind::Punct(Punct::LParen), _) if self.arrow_ahead() => {
                self.advance();
                let mut params = Vec::new();
                while !self.eat_punct(Punct::RParen) {
                    params.push(self.expect_ident()?);
                    if !self.eat_punct(Punct::Comma) {
                        self.expect_punct(Punct::RParen, "')'")?;
                        break;
                    }
                }
                params
            }
            _ => return Ok(None),
        };
        self.expect_punct(Punct::Arrow, "'=>'")?;
        let body = if self.is_punct(Punct::LBrace) {
            FunctionBody::Block(self.block()?)
        } else {
            FunctionBody::Expr(self.expr()?)
        };
        Ok(Some(Expr::Function(Arc::new(FunctionDef { name: None, params, body }))))
    }

    /// At `(`: does the matching `)` precede `=>`?
    fn arrow_ahead(&self) -> bool {
        let mut depth = 0usize;
        let mut i = self.pos;
        while i < self.tokens.len() {
            match self.tokens[i].kind {
                TokenKind::Punct(Punct::LParen) => depth += 1,
                TokenKind::Punct(Punct::RParen) => {
                    depth -= 1;
                    if depth == 0 {
                        return matches!(
                            self.tokens.get(i + 1).map(|t| &t.kind),
                            Some(TokenKind::Punct(Punct::Arrow))
                        );
                    }
                }
                TokenKind::Eof => return false,
                _ => {}
            }
            i += 1;
        }
        false
    }

    fn binary(&mut self, min_prec: u8) -> EvalResult<Expr> {
        let mut lhs = self.unary()?;
        while let Some((prec, op)) = self.binary_op() {
            if prec < min_prec {
                break;
            }
            self.advance();
            let rhs = self.binary(prec + 1)?;
            lhs = match op {
                Infix::Binary(op) => Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                Infix::Logical(op) => Expr::Logical { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
            };
        }
        Ok(lhs)
    }

    fn binary_op(&self) -> Option<(u8, Infix)> {
        let p = match &self.peek().kind {
            TokenKind::Punct(p) => *p,
            _ => return None,
        };
        Some(match p {
            Punct::Coalesce => (1, Infix::Logical(LogicalOp::Coalesce)),
            Punct::OrOr => (2, Infix::Logical(LogicalOp::Or)),
            Punct::AndAnd => (3, Infix::Logical(LogicalOp::And)),
            Punct::EqEq | Punct::EqEqEq => (4, Infix::Binary(BinaryOp::Eq)),
            Punct::NotEq | Punct::NotEqEq => (4, Infix::Binary(BinaryOp::NotEq)),
            Punct::Lt => (5, Infix::Binary(BinaryOp::Lt)),
            Punct::LtEq => (5, Infix::Binary(BinaryOp::LtEq)),
            Punct::Gt => (5, Infix::Binary(BinaryOp::Gt)),
            Punct::GtEq => (5, Infix::Binary(BinaryOp::GtEq)),
            Punct::Plus => (6, Infix::Binary(BinaryOp::Add)),
            Punct::Minus => (6, Infix::Binary(BinaryOp::Sub)),
            Punct::Star => (7, Infix::Binary(BinaryOp::Mul)),
            Punct::Slash => (7, Infix::Binary(BinaryOp::Div)),
            Punct::Percent => (7, Infix::Binary(BinaryOp::Rem)),
            _ => return None,
        })
    }

    fn unary(&mut self) -> EvalResult<Expr> {
        let op = match self.peek().kind {
            TokenKind::Punct(Punct::Minus) => Some(UnaryOp::Neg),
            TokenKind::Punct(Punct::Plus) => Some(UnaryOp::Plus),
            TokenKind::Punct(Punct::Bang) => Some(UnaryOp::Not),
            TokenKind::Keyword(Keyword::TypeOf) => Some(UnaryOp::TypeOf),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let expr = self.nested(Self::unary)?;
            return Ok(Expr::Unary { op, expr: Box::new(expr) });
        }
        let base = self.postfix()?;
        if self.eat_punct(Punct::StarStar) {
            // Right-associative: 2 ** 3 ** 2 == 2 ** 9
            let exponent = self.nested(Self::unary)?;
            return Ok(Expr::Binary { op: BinaryOp::Pow, lhs: Box::new(base), rhs: Box::new(exponent) });
        }
        Ok(base)
    }

    fn postfix(&mut self) -> EvalResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_punct(Punct::Dot) {
                let property = self.property_name()?;
                expr = Expr::Member { object: Box::new(expr), property };
            } else if self.is_punct(Punct::LBracket) {
                self.advance();
                let index = self.expr()?;
                self.expect_punct(Punct::RBracket, "']'")?;
                expr = Expr::Index { object: Box::new(expr), index: Box::new(index) };
            } else if self.is_punct(Punct::LParen) {
                self.advance();
                let args = self.list(Punct::RParen)?;
                expr = Expr::Call { callee: Box::new(expr), args };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Comma-separated expressions (with spreads) up to `close`.
    fn list(&mut self, close: Punct) -> EvalResult<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.eat_punct(close) {
            if self.eat_punct(Punct::Ellipsis) {
                items.push(Expr::Spread(Box::new(self.expr()?)));
            } else {
                items.push(self.expr()?);
            }
            if !self.eat_punct(Punct::Comma) {
                self.expect_punct(close, "closing delimiter")?;
                break;
            }
        }
        Ok(items)
    }

    fn property_name(&mut self) -> EvalResult<String> {
        let name = match &self.peek().kind {
            TokenKind::Ident(s) | TokenKind::Reserved(s) | TokenKind::Str(s) => s.clone(),
            TokenKind::Keyword(k) => format!("{:?}", k).to_lowercase(),
            TokenKind::Number(n) => format_key(*n),
            _ => return Err(self.unexpected("property name")),
        };
        self.advance();
        Ok(name)
    }

    fn primary(&mut self) -> EvalResult<Expr> {
        let tok = self.peek().clone();
        let expr = match tok.kind {
            TokenKind::Number(n) => Expr::Number(n),
            TokenKind::Str(s) => Expr::Str(s),
            TokenKind::Template(parts) => {
                self.advance();
                return Ok(Expr::Template(template_parts(parts, self.depth)?));
            }
            TokenKind::Keyword(Keyword::True) => Expr::Bool(true),
            TokenKind::Keyword(Keyword::False) => Expr::Bool(false),
            TokenKind::Keyword(Keyword::Null | Keyword::Undefined) => Expr::Null,
            TokenKind::Ident(name) => Expr::Ident(name),
            TokenKind::Punct(Punct::LParen) => {
                self.advance();
                let inner = self.expr()?;
                self.expect_punct(Punct::RParen, "')'")?;
                return Ok(inner);
            }
            TokenKind::Punct(Punct::LBracket) => {
                self.advance();
                return Ok(Expr::Array(self.list(Punct::RBracket)?));
            }
            TokenKind::Punct(Punct::LBrace) => {
                self.advance();
                return self.object_literal();
            }
            TokenKind::Keyword(Keyword::Function) => {
                self.advance();
                let name = match &self.peek().kind {
                    TokenKind::Ident(n) => {
                        let n = n.clone();
                        self.advance();
                        Some(n)
                    }
                    _ => None,
                };
                return Ok(Expr::Function(Arc::new(self.function_rest(name)?)));
            }
            _ => return Err(self.unexpected("expression")),
        };
        self.advance();
        Ok(expr)
    }

    fn object_literal(&mut self) -> EvalResult<Expr> {
        let mut entries = Vec::new();
        while !self.eat_punct(Punct::RBrace) {
            if self.eat_punct(Punct::Ellipsis) {
                entries.push(ObjectEntry::Spread(self.expr()?));
            } else {
                let shorthand = matches!(self.peek().kind, TokenKind::Ident(_));
                let key = self.property_name()?;
                if self.eat_punct(Punct::Colon) {
                    entries.push(ObjectEntry::Property(key, self.expr()?));
                } else if shorthand {
                    entries.push(ObjectEntry::Property(key.clone(), Expr::Ident(key)));
                } else {
                    return Err(self.unexpected("':'"));
                }
            }
            if !self.eat_punct(Punct::Comma) {
                self.expect_punct(Punct::RBrace, "'}'")?;
                break;
            }
        }
        Ok(Expr::Object(entries))
    }

    /// Parameter list and block body after `function [name]`.
    fn function_rest(&mut self, name: Option<String>) -> EvalResult<FunctionDef> {
        self.expect_punct(Punct::LParen, "'('")?;
        let mut params = Vec::new();
        while !self.eat_punct(Punct::RParen) {
            params.push(self.expect_ident()?);
            if !self.eat_punct(Punct::Comma) {
                self.expect_punct(Punct::RParen, "')'")?;
                break;
            }
        }
        let body = FunctionBody::Block(self.block()?);
        Ok(FunctionDef { name, params, body })
    }
}

enum Infix {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

fn format_key(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn template_parts(raw: Vec<RawTemplatePart>, depth: usize) -> EvalResult<Vec<TemplatePart>> {
    raw.into_iter()
        .map(|part| match part {
            RawTemplatePart::Text(t) => Ok(TemplatePart::Text(t)),
            RawTemplatePart::Expr { source, line, column } => {
                let tokens = Lexer::at(&source, line, column).tokenize()?;
                let mut parser = Parser::new(tokens, depth);
                let expr = parser.expr()?;
                if !parser.at_eof() {
                    return Err(parser.unexpected("'}'"));
                }
                Ok(TemplatePart::Expr(expr))
            }
        })
        .collect()
}
