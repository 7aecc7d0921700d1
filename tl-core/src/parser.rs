//! Recursive-descent parser with explicit precedence climbing (§4.2).
//!
//! Tensor-equation expressions use the full precedence ladder (`or` →
//! `and` → `not` → comparisons → `+ -` → `* / %` with implicit
//! juxtaposition → unary `-` → `^`, right-associative). Datalog rule
//! heads and body conditions use a separate, narrower arithmetic path
//! (`+ - * / %`, unary `-`, parens) that never sees tensor indices or
//! calls — it classifies the result into a variable, a ground constant,
//! or an arithmetic term as it goes.

use crate::ast::*;
use crate::error::TLError;
use crate::lexer::{Lexer, Token, TokenKind};
use crate::value::Value;
use crate::Result;

/// Parse a full program: statements separated by newlines or semicolons.
pub fn parse_program(source: &str) -> Result<Program> {
    let tokens = Lexer::new(source).tokenize();
    let mut parser = Parser::new(tokens);
    let mut program = Program::new();
    parser.skip_newlines();
    while !parser.at_eof() {
        program.statements.push(parser.parse_statement_inner()?);
        parser.end_statement()?;
    }
    Ok(program)
}

/// Parse exactly one statement, ignoring leading/trailing separators.
pub fn parse_statement(source: &str) -> Result<Statement> {
    let tokens = Lexer::new(source).tokenize();
    let mut parser = Parser::new(tokens);
    parser.skip_newlines();
    let stmt = parser.parse_statement_inner()?;
    parser.end_statement()?;
    if !parser.at_eof() {
        return Err(parser.error(format!("unexpected trailing input: {}", parser.peek().kind)));
    }
    Ok(stmt)
}

const MINIMIZE_MAXIMIZE_KEYS: &[&str] = &["lr", "learning_rate", "epochs", "verbose"];
const SAMPLE_KEYS: &[&str] = &["n", "samples"];

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.pos + offset)
            .unwrap_or_else(|| self.tokens.last().expect("token stream always ends in Eof"))
    }

    fn loc(&self) -> SourceLocation {
        self.peek().loc
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        self.pos = (self.pos + 1).min(self.tokens.len() - 1);
        tok
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    /// True if, skipping any run of newlines from the current position,
    /// the next token is `|` — i.e. a guarded-clause list continues on
    /// the following line rather than the statement having ended.
    fn at_pipe_continuation(&self) -> bool {
        let mut i = 0;
        while matches!(self.peek_at(i).kind, TokenKind::Newline) {
            i += 1;
        }
        matches!(self.peek_at(i).kind, TokenKind::Pipe)
    }

    fn eat(&mut self, expected: TokenKind) -> Result<()> {
        if self.check(&expected) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {expected}, found {}", self.peek().kind)))
        }
    }

    fn error(&self, message: impl Into<String>) -> TLError {
        TLError::parse(self.loc(), message)
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek().kind, TokenKind::Newline) {
            self.advance();
        }
    }

    fn end_statement(&mut self) -> Result<()> {
        if self.at_eof() {
            return Ok(());
        }
        if !matches!(self.peek().kind, TokenKind::Newline | TokenKind::Semicolon) {
            return Err(self.error(format!("expected end of statement, found {}", self.peek().kind)));
        }
        while matches!(self.peek().kind, TokenKind::Newline | TokenKind::Semicolon) {
            self.advance();
        }
        Ok(())
    }

    fn ident(&mut self) -> Result<Identifier> {
        let loc = self.loc();
        match self.advance().kind {
            TokenKind::Ident(s) => Ok(Identifier(s)),
            other => Err(TLError::parse(loc, format!("expected an identifier, found {other}"))),
        }
    }

    fn expect_int(&mut self) -> Result<i64> {
        let loc = self.loc();
        match self.advance().kind {
            TokenKind::Number(text) => text
                .parse::<i64>()
                .map_err(|_| TLError::parse(loc, format!("expected an integer, found '{text}'"))),
            other => Err(TLError::parse(loc, format!("expected an integer, found {other}"))),
        }
    }

    // ---- statement dispatch -------------------------------------------

    fn parse_statement_inner(&mut self) -> Result<Statement> {
        match self.peek().kind.clone() {
            TokenKind::Str(_) => self.parse_file_write_bare_string(),
            TokenKind::Ident(ref name) if name == "file" && matches!(self.peek_at(1).kind, TokenKind::LParen) => {
                self.parse_file_write_call()
            }
            TokenKind::Ident(ref name)
                if name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
                    && matches!(self.peek_at(1).kind, TokenKind::LParen) =>
            {
                self.parse_datalog_stmt()
            }
            _ => self.parse_tensor_led_statement(),
        }
    }

    fn parse_file_write_bare_string(&mut self) -> Result<Statement> {
        let loc = self.loc();
        let text = match self.advance().kind {
            TokenKind::Str(s) => s,
            other => return Err(TLError::parse(loc, format!("expected a string literal, found {other}"))),
        };
        self.eat(TokenKind::Eq)?;
        let source = self.parse_tensor_ref()?;
        Ok(Statement::FileOperation(FileOperation::Write {
            path: FileLiteral { path: StringLiteral::new(text), loc },
            source,
        }))
    }

    fn parse_file_write_call(&mut self) -> Result<Statement> {
        let loc = self.loc();
        self.advance(); // `file`
        self.eat(TokenKind::LParen)?;
        let path_loc = self.loc();
        let text = match self.advance().kind {
            TokenKind::Str(s) => s,
            other => {
                return Err(TLError::parse(
                    path_loc,
                    format!("expected a string literal inside file(...), found {other}"),
                ))
            }
        };
        self.eat(TokenKind::RParen)?;
        self.eat(TokenKind::Eq)?;
        let source = self.parse_tensor_ref()?;
        Ok(Statement::FileOperation(FileOperation::Write {
            path: FileLiteral { path: StringLiteral::new(text), loc },
            source,
        }))
    }

    fn parse_tensor_led_statement(&mut self) -> Result<Statement> {
        let tref = self.parse_tensor_ref()?;
        if self.check(&TokenKind::Question) {
            self.advance();
            let directive = self.parse_optional_directive()?;
            let loc = tref.loc;
            return Ok(Statement::Query(Query {
                target: QueryTarget::Tensor(tref),
                body: Vec::new(),
                directive,
                loc,
            }));
        }
        validate_normalized_indices(&tref)?;
        let projection = self.parse_projection()?;
        let mut clauses = vec![self.parse_clause()?];
        loop {
            while matches!(self.peek().kind, TokenKind::Newline) && self.at_pipe_continuation() {
                self.advance();
            }
            if !self.check(&TokenKind::Pipe) {
                break;
            }
            self.advance();
            clauses.push(self.parse_clause()?);
        }
        let loc = tref.loc;
        if projection == Projection::Assign && clauses.len() == 1 && clauses[0].guard.is_none() {
            if let Some(path) = extract_file_literal(&clauses[0].expr) {
                return Ok(Statement::FileOperation(FileOperation::Read { target: tref, path }));
            }
        }
        Ok(Statement::TensorEquation(TensorEquation {
            lhs: tref,
            projection,
            clauses,
            loc,
        }))
    }

    fn parse_projection(&mut self) -> Result<Projection> {
        match self.peek().kind.clone() {
            TokenKind::Eq => {
                self.advance();
                Ok(Projection::Assign)
            }
            TokenKind::PlusEq => {
                self.advance();
                Ok(Projection::Add)
            }
            TokenKind::Ident(name) if name == "avg" => {
                self.advance();
                self.eat(TokenKind::Eq)?;
                Ok(Projection::Avg)
            }
            TokenKind::Ident(name) if name == "max" => {
                self.advance();
                self.eat(TokenKind::Eq)?;
                Ok(Projection::Max)
            }
            TokenKind::Ident(name) if name == "min" => {
                self.advance();
                self.eat(TokenKind::Eq)?;
                Ok(Projection::Min)
            }
            other => Err(self.error(format!("expected a projection operator, found {other}"))),
        }
    }

    fn parse_clause(&mut self) -> Result<GuardedClause> {
        let expr = self.parse_expr()?;
        let guard = if self.check(&TokenKind::Colon) {
            self.advance();
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(GuardedClause { expr, guard })
    }

    // ---- Datalog --------------------------------------------------------

    fn parse_datalog_stmt(&mut self) -> Result<Statement> {
        let atom = self.parse_datalog_atom()?;
        if self.check(&TokenKind::LArrow) {
            self.advance();
            let body = self.parse_datalog_body()?;
            let loc = atom.loc;
            return Ok(Statement::DatalogRule(DatalogRule { head: atom, body, loc }));
        }
        if self.check(&TokenKind::Comma) || self.check(&TokenKind::Question) {
            let mut body = Vec::new();
            while self.check(&TokenKind::Comma) {
                self.advance();
                body.push(self.parse_body_element()?);
            }
            self.eat(TokenKind::Question)?;
            let directive = self.parse_optional_directive()?;
            let loc = atom.loc;
            return Ok(Statement::Query(Query {
                target: QueryTarget::Datalog(atom),
                body,
                directive,
                loc,
            }));
        }
        if !atom.is_ground() {
            return Err(TLError::parse(
                atom.loc,
                format!("fact '{atom}' must be ground: every term must be a constant"),
            ));
        }
        Ok(Statement::DatalogFact(atom))
    }

    fn parse_datalog_atom(&mut self) -> Result<DatalogAtom> {
        let loc = self.loc();
        let relation = self.ident()?;
        self.eat(TokenKind::LParen)?;
        let mut terms = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                terms.push(self.parse_datalog_term()?);
                if self.check(&TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.eat(TokenKind::RParen)?;
        Ok(DatalogAtom { relation, terms, loc })
    }

    fn parse_datalog_body(&mut self) -> Result<Vec<BodyElement>> {
        let mut body = vec![self.parse_body_element()?];
        while self.check(&TokenKind::Comma) {
            self.advance();
            body.push(self.parse_body_element()?);
        }
        Ok(body)
    }

    fn parse_body_element(&mut self) -> Result<BodyElement> {
        if self.check(&TokenKind::Not) || self.check(&TokenKind::Bang) {
            self.advance();
            return Ok(BodyElement::Negated(self.parse_datalog_atom()?));
        }
        let looks_like_atom = matches!(
            self.peek().kind,
            TokenKind::Ident(ref s) if s.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        ) && matches!(self.peek_at(1).kind, TokenKind::LParen);
        if looks_like_atom {
            return Ok(BodyElement::Atom(self.parse_datalog_atom()?));
        }
        let lhs = self.parse_arith_expr()?;
        let op = self.parse_cmp_op()?;
        let rhs = self.parse_arith_expr()?;
        Ok(BodyElement::Condition { lhs, op, rhs })
    }

    fn parse_cmp_op(&mut self) -> Result<CompareOp> {
        let loc = self.loc();
        let op = match self.peek().kind {
            TokenKind::Lt => CompareOp::Lt,
            TokenKind::Le => CompareOp::Le,
            TokenKind::Gt => CompareOp::Gt,
            TokenKind::Ge => CompareOp::Ge,
            TokenKind::EqEq => CompareOp::Eq,
            TokenKind::Ne => CompareOp::Ne,
            ref other => return Err(TLError::parse(loc, format!("expected a comparison operator, found {other}"))),
        };
        self.advance();
        Ok(op)
    }

    fn parse_datalog_term(&mut self) -> Result<DatalogTerm> {
        if self.check(&TokenKind::True) {
            self.advance();
            return Ok(DatalogTerm::Constant(Value::Bool(true)));
        }
        if self.check(&TokenKind::False) {
            self.advance();
            return Ok(DatalogTerm::Constant(Value::Bool(false)));
        }
        let expr = self.parse_arith_expr()?;
        Ok(expr_to_datalog_term(expr))
    }

    /// The restricted `+ - * / %` arithmetic grammar shared by Datalog
    /// rule heads and body conditions. No indices, no calls, no lists.
    fn parse_arith_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_arith_term()?;
        loop {
            let loc = self.loc();
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_arith_term()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), loc };
        }
        Ok(lhs)
    }

    fn parse_arith_term(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_arith_unary()?;
        loop {
            let loc = self.loc();
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_arith_unary()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), loc };
        }
        Ok(lhs)
    }

    fn parse_arith_unary(&mut self) -> Result<Expr> {
        if self.check(&TokenKind::Minus) {
            let loc = self.loc();
            self.advance();
            let expr = self.parse_arith_unary()?;
            return Ok(Expr::Unary { op: UnaryOp::Neg, expr: Box::new(expr), loc });
        }
        self.parse_arith_primary()
    }

    fn parse_arith_primary(&mut self) -> Result<Expr> {
        let loc = self.loc();
        match self.peek().kind.clone() {
            TokenKind::Number(text) => {
                self.advance();
                Ok(Expr::Number(NumberLiteral::new(text)))
            }
            TokenKind::Str(text) => {
                self.advance();
                Ok(Expr::Str(StringLiteral::new(text)))
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr::TensorRef(TensorRef::scalar(Identifier(name), loc)))
            }
            TokenKind::LParen => {
                self.advance();
                let e = self.parse_arith_expr()?;
                self.eat(TokenKind::RParen)?;
                Ok(e)
            }
            other => Err(self.error(format!("expected a Datalog term, found {other}"))),
        }
    }

    // ---- expressions ----------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while self.check(&TokenKind::Or) {
            let loc = self.loc();
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary { op: BinaryOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs), loc };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_not()?;
        while self.check(&TokenKind::And) {
            let loc = self.loc();
            self.advance();
            let rhs = self.parse_not()?;
            lhs = Expr::Binary { op: BinaryOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs), loc };
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.check(&TokenKind::Not) {
            let loc = self.loc();
            self.advance();
            let expr = self.parse_not()?;
            return Ok(Expr::Unary { op: UnaryOp::Not, expr: Box::new(expr), loc });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let loc = self.loc();
            let op = match self.peek().kind {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Ge => BinaryOp::Ge,
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::Ne => BinaryOp::Ne,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), loc };
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let loc = self.loc();
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), loc };
        }
        Ok(lhs)
    }

    /// `* / %`, plus implicit juxtaposition (`2 X[i]` means `2 * X[i]`):
    /// if no explicit operator follows but the next token can start a new
    /// primary, treat the gap as a multiplication without consuming it.
    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let loc = self.loc();
            let op = match self.peek().kind {
                TokenKind::Star => {
                    self.advance();
                    BinaryOp::Mul
                }
                TokenKind::Slash => {
                    self.advance();
                    BinaryOp::Div
                }
                TokenKind::Percent => {
                    self.advance();
                    BinaryOp::Mod
                }
                TokenKind::Ident(_) | TokenKind::Number(_) | TokenKind::Str(_) | TokenKind::LParen => BinaryOp::Mul,
                _ => break,
            };
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), loc };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.check(&TokenKind::Minus) {
            let loc = self.loc();
            self.advance();
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary { op: UnaryOp::Neg, expr: Box::new(expr), loc });
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_primary()?;
        if self.check(&TokenKind::Caret) {
            let loc = self.loc();
            self.advance();
            let exponent = self.parse_unary()?; // right-associative
            Ok(Expr::Binary { op: BinaryOp::Pow, lhs: Box::new(base), rhs: Box::new(exponent), loc })
        } else {
            Ok(base)
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let loc = self.loc();
        match self.peek().kind.clone() {
            TokenKind::Number(text) => {
                self.advance();
                Ok(Expr::Number(NumberLiteral::new(text)))
            }
            TokenKind::Str(text) => {
                self.advance();
                Ok(Expr::Str(StringLiteral::new(text)))
            }
            TokenKind::LParen => {
                self.advance();
                let e = self.parse_expr()?;
                self.eat(TokenKind::RParen)?;
                Ok(e)
            }
            TokenKind::LBracket => self.parse_list_literal(),
            TokenKind::Ident(name) => {
                self.advance();
                if self.check(&TokenKind::LParen) {
                    self.parse_call_args(Identifier(name), loc)
                } else {
                    Ok(Expr::TensorRef(self.parse_tensor_ref_tail(Identifier(name), loc)?))
                }
            }
            other => Err(self.error(format!("expected an expression, found {other}"))),
        }
    }

    fn parse_list_literal(&mut self) -> Result<Expr> {
        let loc = self.loc();
        self.eat(TokenKind::LBracket)?;
        let mut items = Vec::new();
        if !self.check(&TokenKind::RBracket) {
            loop {
                items.push(self.parse_expr()?);
                if self.check(&TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.eat(TokenKind::RBracket)?;
        Ok(Expr::List(items, loc))
    }

    fn parse_call_args(&mut self, name: Identifier, loc: SourceLocation) -> Result<Expr> {
        self.eat(TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                args.push(self.parse_expr()?);
                if self.check(&TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.eat(TokenKind::RParen)?;
        Ok(Expr::Call { name, args, loc })
    }

    // ---- tensor references ----------------------------------------------

    fn parse_tensor_ref(&mut self) -> Result<TensorRef> {
        let loc = self.loc();
        let name = self.ident()?;
        self.parse_tensor_ref_tail(name, loc)
    }

    fn parse_tensor_ref_tail(&mut self, name: Identifier, loc: SourceLocation) -> Result<TensorRef> {
        let mut indices = Vec::new();
        if self.check(&TokenKind::LBracket) {
            self.advance();
            if !self.check(&TokenKind::RBracket) {
                loop {
                    indices.push(self.parse_index_or_slice()?);
                    if self.check(&TokenKind::Comma) {
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
            self.eat(TokenKind::RBracket)?;
        }
        Ok(TensorRef { name, indices, loc })
    }

    fn parse_index_or_slice(&mut self) -> Result<IndexOrSlice> {
        let loc = self.loc();
        if self.check(&TokenKind::Colon) {
            return self.parse_slice_tail(None, loc);
        }
        if self.check(&TokenKind::Star) {
            self.advance();
            // `*0`, `*1`, ... names an explicit absolute slot rather than a
            // named time axis; queries over it are rewritten to that slot
            // by the preprocessor the same as any other virtual index.
            let name = if matches!(self.peek().kind, TokenKind::Number(_)) {
                Identifier(self.expect_int()?.to_string())
            } else {
                self.ident()?
            };
            let offset = match self.peek().kind {
                TokenKind::Plus => {
                    self.advance();
                    self.expect_int()?
                }
                TokenKind::Minus => {
                    self.advance();
                    -self.expect_int()?
                }
                _ => 0,
            };
            return Ok(IndexOrSlice::Index(Index { kind: IndexKind::Virtual { name, offset }, normalized: false, loc }));
        }
        if matches!(self.peek().kind, TokenKind::Number(_)) {
            let n = self.expect_int()?;
            if self.check(&TokenKind::Colon) {
                return self.parse_slice_tail(Some(n), loc);
            }
            return Ok(IndexOrSlice::Index(Index { kind: IndexKind::Numeric(n), normalized: false, loc }));
        }
        let name = self.ident()?;
        if self.check(&TokenKind::Slash) {
            self.advance();
            let divisor = self.expect_int()?;
            return Ok(IndexOrSlice::Index(Index {
                kind: IndexKind::Named { name, divisor: Some(divisor) },
                normalized: false,
                loc,
            }));
        }
        let normalized = if self.check(&TokenKind::Dot) {
            self.advance();
            true
        } else {
            false
        };
        Ok(IndexOrSlice::Index(Index { kind: IndexKind::Named { name, divisor: None }, normalized, loc }))
    }

    fn parse_slice_tail(&mut self, start: Option<i64>, loc: SourceLocation) -> Result<IndexOrSlice> {
        self.eat(TokenKind::Colon)?;
        let end = if matches!(self.peek().kind, TokenKind::Number(_)) {
            Some(self.expect_int()?)
        } else {
            None
        };
        let step = if self.check(&TokenKind::Colon) {
            self.advance();
            Some(self.expect_int()?)
        } else {
            None
        };
        Ok(IndexOrSlice::Slice(Slice { start, end, step, loc }))
    }

    // ---- directives -------------------------------------------------------

    fn parse_optional_directive(&mut self) -> Result<Option<LearningDirective>> {
        if !self.check(&TokenKind::At) {
            return Ok(None);
        }
        let loc = self.loc();
        self.advance();
        let name_loc = self.loc();
        let name_ident = self.ident()?;
        let name = match name_ident.as_str() {
            "minimize" => DirectiveName::Minimize,
            "maximize" => DirectiveName::Maximize,
            "sample" => DirectiveName::Sample,
            other => return Err(TLError::parse(name_loc, format!("unknown learning directive '@{other}'"))),
        };
        self.eat(TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let arg_loc = self.loc();
                let key = self.ident()?;
                self.eat(TokenKind::Eq)?;
                let value = self.parse_directive_arg(arg_loc)?;
                validate_directive_arg(name, key.as_str(), &value, arg_loc)?;
                args.push((key.0, value));
                if self.check(&TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.eat(TokenKind::RParen)?;
        Ok(Some(LearningDirective { name, args, loc }))
    }

    fn parse_directive_arg(&mut self, loc: SourceLocation) -> Result<DirectiveArg> {
        match self.peek().kind.clone() {
            TokenKind::Number(text) => {
                self.advance();
                if text.contains(['.', 'e', 'E']) {
                    text.parse::<f64>()
                        .map(DirectiveArg::Float)
                        .map_err(|_| TLError::parse(loc, format!("invalid float '{text}'")))
                } else {
                    text.parse::<i64>()
                        .map(DirectiveArg::Int)
                        .map_err(|_| TLError::parse(loc, format!("invalid integer '{text}'")))
                }
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(DirectiveArg::Str(s))
            }
            TokenKind::True => {
                self.advance();
                Ok(DirectiveArg::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(DirectiveArg::Bool(false))
            }
            other => Err(TLError::parse(loc, format!("expected a directive argument value, found {other}"))),
        }
    }
}

fn validate_directive_arg(name: DirectiveName, key: &str, value: &DirectiveArg, loc: SourceLocation) -> Result<()> {
    let ok = match (name, key, value) {
        (DirectiveName::Minimize | DirectiveName::Maximize, "lr", DirectiveArg::Float(_) | DirectiveArg::Int(_)) => true,
        (DirectiveName::Minimize | DirectiveName::Maximize, "epochs", DirectiveArg::Int(_)) => true,
        (DirectiveName::Minimize | DirectiveName::Maximize, "verbose", DirectiveArg::Bool(_)) => true,
        (DirectiveName::Sample, "n", DirectiveArg::Int(_)) => true,
        _ => false,
    };
    if ok {
        Ok(())
    } else if MINIMIZE_MAXIMIZE_KEYS.contains(&key) || SAMPLE_KEYS.contains(&key) {
        Err(TLError::parse(loc, format!("argument '{key}' has the wrong type for @{name}")))
    } else {
        Err(TLError::parse(loc, format!("unrecognized argument '{key}' for @{name}")))
    }
}

fn validate_normalized_indices(lhs: &TensorRef) -> Result<()> {
    let mut count = 0;
    for pos in &lhs.indices {
        if let IndexOrSlice::Index(idx) = pos {
            if idx.normalized {
                count += 1;
                let lowercase_named = matches!(&idx.kind, IndexKind::Named { name, .. } if !name.is_uppercase());
                if !lowercase_named {
                    return Err(TLError::parse(
                        idx.loc,
                        "a normalized index must be a lowercase named identifier".to_string(),
                    ));
                }
            }
        }
    }
    if count > 1 {
        return Err(TLError::parse(
            lhs.loc,
            "at most one normalized index is allowed per equation LHS".to_string(),
        ));
    }
    Ok(())
}

fn extract_file_literal(expr: &Expr) -> Option<FileLiteral> {
    match expr {
        Expr::Str(s) => Some(FileLiteral { path: s.clone(), loc: expr.loc() }),
        Expr::Call { name, args, loc } if name.as_str() == "file" && args.len() == 1 => match &args[0] {
            Expr::Str(s) => Some(FileLiteral { path: s.clone(), loc: *loc }),
            _ => None,
        },
        _ => None,
    }
}

fn expr_to_datalog_term(expr: Expr) -> DatalogTerm {
    match expr {
        Expr::TensorRef(tref) if tref.indices.is_empty() => {
            if tref.name.is_uppercase() {
                DatalogTerm::Constant(Value::string(tref.name.0))
            } else {
                DatalogTerm::Variable(tref.name)
            }
        }
        Expr::Number(n) => DatalogTerm::Constant(number_literal_to_value(&n)),
        Expr::Str(s) => DatalogTerm::Constant(Value::string(s.text)),
        Expr::Unary { op: UnaryOp::Neg, expr: inner, .. } => match *inner {
            Expr::Number(n) => DatalogTerm::Constant(negate_number_value(&n)),
            other => DatalogTerm::Arithmetic(Box::new(Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(other),
                loc: SourceLocation::default(),
            })),
        },
        other => DatalogTerm::Arithmetic(Box::new(other)),
    }
}

fn number_literal_to_value(n: &NumberLiteral) -> Value {
    if n.text.contains(['.', 'e', 'E']) {
        Value::Float(n.as_f64().unwrap_or_default())
    } else {
        Value::Integer(n.as_i64().unwrap_or_default())
    }
}

fn negate_number_value(n: &NumberLiteral) -> Value {
    match number_literal_to_value(n) {
        Value::Float(f) => Value::Float(-f),
        Value::Integer(i) => Value::Integer(-i),
        other => other,
    }
}
