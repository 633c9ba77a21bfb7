//! Recursive-descent parser.
//!
//! One method per precedence level, lowest first:
//! `test` → `or_test` → `and_test` → `not_test` → `comparison` → `arith`
//! → `term` → `factor` → `power` → `primary` → `atom`.

use std::rc::Rc;

use super::SyntaxError;
use super::ast::{
    BinOp, BoolOp, CmpOp, Expr, FStringPart, FormatSpec, FunctionDef, Line, Param, Stmt,
    StmtKind, Target, UnaryOp,
};
use super::lexer::{Lexer, Token, TokenKind};

/// Deepest expression nesting accepted before giving up.
const MAX_NESTING: usize = 100;

/// Python keywords the snippet language does not implement.
const UNSUPPORTED: &[&str] = &[
    "class", "lambda", "try", "except", "finally", "with", "yield", "global", "nonlocal", "del",
    "assert", "raise", "async", "await",
];

type ParseResult<T> = Result<T, SyntaxError>;

pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
    nesting: usize,
    loop_depth: usize,
    in_function: bool,
}

impl Parser {
    pub fn new(source: &str) -> ParseResult<Self> {
        let tokens = Lexer::new(source).tokenize()?;
        Ok(Self::from_tokens(tokens))
    }

    fn from_tokens(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
            nesting: 0,
            loop_depth: 0,
            in_function: false,
        }
    }

    /// Parses the body of an f-string replacement field.
    fn parse_expression(source: &str, line: Line) -> ParseResult<Expr> {
        let tokens = Lexer::for_expression(source, line).tokenize()?;
        let mut parser = Self::from_tokens(tokens);
        let expr = parser.testlist()?;
        if !parser.check(&TokenKind::Eof) {
            return Err(parser.unexpected());
        }
        Ok(expr)
    }

    pub fn parse_program(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut body = Vec::new();
        self.skip_newlines();
        while !self.check(&TokenKind::Eof) {
            body.extend(self.statement()?);
            self.skip_newlines();
        }
        Ok(body)
    }

    //
    // ─── TOKEN HELPERS ─────────────────────────────────────────────────────────
    //

    fn peek(&self) -> &TokenKind {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        self.tokens
            .get(self.position + offset)
            .or_else(|| self.tokens.last())
            .map_or(&TokenKind::Eof, |t| &t.kind)
    }

    fn line(&self) -> Line {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .map_or(1, |t| t.line)
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.position < self.tokens.len() {
            self.position += 1;
        }
        kind
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> ParseResult<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(SyntaxError::new(
                format!("expected {kind}, found {}", self.peek()),
                self.line(),
            ))
        }
    }

    fn expect_name(&mut self) -> ParseResult<String> {
        match self.advance() {
            TokenKind::Name(name) => Ok(name),
            other => Err(SyntaxError::new(
                format!("expected a name, found {other}"),
                self.line(),
            )),
        }
    }

    fn unexpected(&self) -> SyntaxError {
        match self.peek() {
            TokenKind::Indent => SyntaxError::new("unexpected indent", self.line()).indentation(),
            other => SyntaxError::new(format!("invalid syntax near {other}"), self.line()),
        }
    }

    fn skip_newlines(&mut self) {
        while self.eat(&TokenKind::Newline) {}
    }

    fn starts_expression(kind: &TokenKind) -> bool {
        matches!(
            kind,
            TokenKind::Name(_)
                | TokenKind::Int(_)
                | TokenKind::Float(_)
                | TokenKind::Str(_)
                | TokenKind::FStr(_)
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::LBrace
                | TokenKind::Minus
                | TokenKind::Plus
                | TokenKind::Not
                | TokenKind::True
                | TokenKind::False
                | TokenKind::None
        )
    }

    //
    // ─── STATEMENTS ────────────────────────────────────────────────────────────
    //

    fn statement(&mut self) -> ParseResult<Vec<Stmt>> {
        match self.peek() {
            TokenKind::If => Ok(vec![self.if_statement()?]),
            TokenKind::While => Ok(vec![self.while_statement()?]),
            TokenKind::For => Ok(vec![self.for_statement()?]),
            TokenKind::Def => Ok(vec![self.function_def()?]),
            TokenKind::Name(name)
                if UNSUPPORTED.contains(&name.as_str())
                    && (Self::starts_expression(self.peek_at(1))
                        || matches!(self.peek_at(1), TokenKind::Colon | TokenKind::Newline)) =>
            {
                Err(SyntaxError::new(
                    format!("'{name}' is not supported in this sandbox"),
                    self.line(),
                ))
            }
            _ => self.simple_statements(),
        }
    }

    fn simple_statements(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut statements = vec![self.small_statement()?];
        while self.eat(&TokenKind::Semicolon) {
            if matches!(self.peek(), TokenKind::Newline | TokenKind::Eof) {
                break;
            }
            statements.push(self.small_statement()?);
        }
        match self.peek() {
            TokenKind::Newline => {
                self.advance();
                Ok(statements)
            }
            TokenKind::Eof => Ok(statements),
            _ => Err(self.unexpected()),
        }
    }

    fn small_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.line();
        let kind = match self.peek() {
            TokenKind::Pass => {
                self.advance();
                StmtKind::Pass
            }
            TokenKind::Break | TokenKind::Continue if self.loop_depth == 0 => {
                return Err(SyntaxError::new(
                    format!("{} outside loop", self.peek()),
                    line,
                ));
            }
            TokenKind::Break => {
                self.advance();
                StmtKind::Break
            }
            TokenKind::Continue => {
                self.advance();
                StmtKind::Continue
            }
            TokenKind::Return if !self.in_function => {
                return Err(SyntaxError::new("'return' outside function", line));
            }
            TokenKind::Return => {
                self.advance();
                if Self::starts_expression(self.peek()) {
                    StmtKind::Return(Some(self.testlist()?))
                } else {
                    StmtKind::Return(None)
                }
            }
            TokenKind::Import => {
                self.advance();
                let module = self.dotted_name()?;
                loop {
                    if self.eat(&TokenKind::As) {
                        self.expect_name()?;
                    }
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                    self.dotted_name()?;
                }
                StmtKind::Import(module)
            }
            TokenKind::From => {
                self.advance();
                let module = self.dotted_name()?;
                self.expect(&TokenKind::Import)?;
                while !matches!(
                    self.peek(),
                    TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof
                ) {
                    self.advance();
                }
                StmtKind::Import(module)
            }
            _ => self.expression_statement(line)?,
        };
        Ok(Stmt { kind, line })
    }

    fn dotted_name(&mut self) -> ParseResult<String> {
        let mut name = self.expect_name()?;
        while self.eat(&TokenKind::Dot) {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn expression_statement(&mut self, line: Line) -> ParseResult<StmtKind> {
        let first = self.testlist()?;

        let aug = match self.peek() {
            TokenKind::PlusEq => Some(BinOp::Add),
            TokenKind::MinusEq => Some(BinOp::Sub),
            TokenKind::StarEq => Some(BinOp::Mul),
            TokenKind::SlashEq => Some(BinOp::Div),
            TokenKind::DoubleSlashEq => Some(BinOp::FloorDiv),
            TokenKind::PercentEq => Some(BinOp::Mod),
            TokenKind::DoubleStarEq => Some(BinOp::Pow),
            _ => None,
        };
        if let Some(op) = aug {
            self.advance();
            let target = to_target(first, line)?;
            if matches!(target, Target::Tuple(_)) {
                return Err(SyntaxError::new(
                    "illegal expression for augmented assignment",
                    line,
                ));
            }
            let value = self.testlist()?;
            return Ok(StmtKind::AugAssign { target, op, value });
        }

        if !self.check(&TokenKind::Assign) {
            return Ok(StmtKind::Expr(first));
        }

        let mut targets = vec![to_target(first, line)?];
        loop {
            self.expect(&TokenKind::Assign)?;
            let next = self.testlist()?;
            if self.check(&TokenKind::Assign) {
                targets.push(to_target(next, line)?);
            } else {
                return Ok(StmtKind::Assign {
                    targets,
                    value: next,
                });
            }
        }
    }

    /// `: simple_statement` or `: NEWLINE INDENT statement+ DEDENT`.
    fn block(&mut self, owner: &str, owner_line: Line) -> ParseResult<Vec<Stmt>> {
        self.expect(&TokenKind::Colon)?;
        if !self.eat(&TokenKind::Newline) {
            return self.simple_statements();
        }
        if !self.eat(&TokenKind::Indent) {
            return Err(SyntaxError::new(
                format!("expected an indented block after '{owner}' statement on line {owner_line}"),
                self.line(),
            )
            .indentation());
        }
        let mut body = Vec::new();
        while !matches!(self.peek(), TokenKind::Dedent | TokenKind::Eof) {
            body.extend(self.statement()?);
            self.skip_newlines();
        }
        self.eat(&TokenKind::Dedent);
        Ok(body)
    }

    fn if_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.line();
        self.advance();
        let cond = self.test()?;
        let body = self.block("if", line)?;
        let mut branches = vec![(cond, body)];

        let mut orelse = Vec::new();
        loop {
            let branch_line = self.line();
            if self.eat(&TokenKind::Elif) {
                let cond = self.test()?;
                let body = self.block("elif", branch_line)?;
                branches.push((cond, body));
            } else if self.eat(&TokenKind::Else) {
                orelse = self.block("else", branch_line)?;
                break;
            } else {
                break;
            }
        }

        Ok(Stmt {
            kind: StmtKind::If { branches, orelse },
            line,
        })
    }

    fn while_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.line();
        self.advance();
        let cond = self.test()?;
        let body = self.loop_body("while", line)?;
        Ok(Stmt {
            kind: StmtKind::While { cond, body },
            line,
        })
    }

    fn for_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.line();
        self.advance();
        let target = self.target_list(line)?;
        self.expect(&TokenKind::In)?;
        let iter = self.testlist()?;
        let body = self.loop_body("for", line)?;
        Ok(Stmt {
            kind: StmtKind::For { target, iter, body },
            line,
        })
    }

    fn loop_body(&mut self, owner: &str, owner_line: Line) -> ParseResult<Vec<Stmt>> {
        self.loop_depth += 1;
        let body = self.block(owner, owner_line);
        self.loop_depth -= 1;
        body
    }

    /// Loop targets stop below the comparison level so `in` is not consumed.
    fn target_list(&mut self, line: Line) -> ParseResult<Target> {
        let first = self.arith()?;
        if !self.check(&TokenKind::Comma) {
            return to_target(first, line);
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::In) {
                break;
            }
            items.push(self.arith()?);
        }
        to_target(Expr::Tuple(items), line)
    }

    fn function_def(&mut self) -> ParseResult<Stmt> {
        let line = self.line();
        self.advance();
        let name = self.expect_name()?;
        self.expect(&TokenKind::LParen)?;

        let mut params: Vec<Param> = Vec::new();
        while !self.eat(&TokenKind::RParen) {
            if matches!(self.peek(), TokenKind::Star | TokenKind::DoubleStar) {
                return Err(SyntaxError::new(
                    "variadic parameters are not supported",
                    self.line(),
                ));
            }
            let param = self.expect_name()?;
            if params.iter().any(|p| p.name == param) {
                return Err(SyntaxError::new(
                    format!("duplicate argument '{param}' in function definition"),
                    line,
                ));
            }
            let default = if self.eat(&TokenKind::Assign) {
                Some(self.test()?)
            } else {
                if params.iter().any(|p| p.default.is_some()) {
                    return Err(SyntaxError::new(
                        "non-default argument follows default argument",
                        line,
                    ));
                }
                None
            };
            params.push(Param {
                name: param,
                default,
            });
            if !self.eat(&TokenKind::Comma) {
                self.expect(&TokenKind::RParen)?;
                break;
            }
        }

        let saved = (self.loop_depth, self.in_function);
        self.loop_depth = 0;
        self.in_function = true;
        let body = self.block("def", line);
        (self.loop_depth, self.in_function) = saved;
        let body = body?;
        Ok(Stmt {
            kind: StmtKind::FunctionDef(Rc::new(FunctionDef { name, params, body })),
            line,
        })
    }

    //
    // ─── EXPRESSIONS ───────────────────────────────────────────────────────────
    //

    /// Comma-separated expressions; more than one (or a trailing comma) makes a tuple.
    fn testlist(&mut self) -> ParseResult<Expr> {
        let first = self.test()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if !Self::starts_expression(self.peek()) {
                break;
            }
            items.push(self.test()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn test(&mut self) -> ParseResult<Expr> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(SyntaxError::new(
                "too many nested expressions",
                self.line(),
            ));
        }
        let result = self.conditional();
        self.nesting -= 1;
        result
    }

    fn conditional(&mut self) -> ParseResult<Expr> {
        let then = self.or_test()?;
        if !self.eat(&TokenKind::If) {
            return Ok(then);
        }
        let cond = self.or_test()?;
        self.expect(&TokenKind::Else)?;
        let otherwise = self.test()?;
        Ok(Expr::IfExp {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn or_test(&mut self) -> ParseResult<Expr> {
        let mut left = self.and_test()?;
        while self.eat(&TokenKind::Or) {
            let right = self.and_test()?;
            left = Expr::BoolOp {
                op: BoolOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and_test(&mut self) -> ParseResult<Expr> {
        let mut left = self.not_test()?;
        while self.eat(&TokenKind::And) {
            let right = self.not_test()?;
            left = Expr::BoolOp {
                op: BoolOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn not_test(&mut self) -> ParseResult<Expr> {
        if self.eat(&TokenKind::Not) {
            let operand = self.not_test()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        let first = self.arith()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                TokenKind::EqEq => CmpOp::Eq,
                TokenKind::NotEq => CmpOp::NotEq,
                TokenKind::Lt => CmpOp::Lt,
                TokenKind::Le => CmpOp::Le,
                TokenKind::Gt => CmpOp::Gt,
                TokenKind::Ge => CmpOp::Ge,
                TokenKind::In => CmpOp::In,
                TokenKind::Not if self.peek_at(1) == &TokenKind::In => {
                    self.advance();
                    CmpOp::NotIn
                }
                TokenKind::Is if self.peek_at(1) == &TokenKind::Not => {
                    self.advance();
                    CmpOp::IsNot
                }
                TokenKind::Is => CmpOp::Is,
                _ => break,
            };
            self.advance();
            rest.push((op, self.arith()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare {
                first: Box::new(first),
                rest,
            })
        }
    }

    fn arith(&mut self) -> ParseResult<Expr> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.term()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn term(&mut self) -> ParseResult<Expr> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::DoubleSlash => BinOp::FloorDiv,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.factor()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn factor(&mut self) -> ParseResult<Expr> {
        let op = match self.peek() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Pos,
            _ => return self.power(),
        };
        self.advance();
        let operand = self.factor()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn power(&mut self) -> ParseResult<Expr> {
        let base = self.primary()?;
        if self.eat(&TokenKind::DoubleStar) {
            let exponent = self.factor()?;
            return Ok(binary(BinOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let mut expr = self.atom()?;
        loop {
            match self.peek() {
                TokenKind::LParen => {
                    self.advance();
                    expr = self.call(expr)?;
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.subscript()?;
                    self.expect(&TokenKind::RBracket)?;
                    expr = Expr::Subscript {
                        object: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                TokenKind::Dot => {
                    self.advance();
                    let name = self.expect_name()?;
                    expr = Expr::Attribute {
                        object: Box::new(expr),
                        name,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Arguments after the opening parenthesis.
    fn call(&mut self, func: Expr) -> ParseResult<Expr> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.eat(&TokenKind::RParen) {
            if let (TokenKind::Name(name), TokenKind::Assign) = (self.peek(), self.peek_at(1)) {
                let name = name.clone();
                self.advance();
                self.advance();
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(SyntaxError::new(
                        format!("keyword argument repeated: {name}"),
                        self.line(),
                    ));
                }
                kwargs.push((name, self.test()?));
            } else {
                if matches!(self.peek(), TokenKind::Star | TokenKind::DoubleStar) {
                    return Err(SyntaxError::new(
                        "argument unpacking is not supported",
                        self.line(),
                    ));
                }
                if !kwargs.is_empty() {
                    return Err(SyntaxError::new(
                        "positional argument follows keyword argument",
                        self.line(),
                    ));
                }
                let mut arg = self.test()?;
                if self.check(&TokenKind::For) {
                    arg = self.comprehension(arg)?;
                }
                args.push(arg);
            }
            if !self.eat(&TokenKind::Comma) {
                self.expect(&TokenKind::RParen)?;
                break;
            }
        }
        Ok(Expr::Call {
            func: Box::new(func),
            args,
            kwargs,
        })
    }

    fn subscript(&mut self) -> ParseResult<Expr> {
        let lower = if self.check(&TokenKind::Colon) {
            None
        } else {
            Some(self.test()?)
        };
        if !self.eat(&TokenKind::Colon) {
            return lower.ok_or_else(|| self.unexpected());
        }
        let upper = if matches!(self.peek(), TokenKind::Colon | TokenKind::RBracket) {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        let step = if self.eat(&TokenKind::Colon) && !self.check(&TokenKind::RBracket) {
            Some(Box::new(self.test()?))
        } else {
            None
        };
        Ok(Expr::Slice {
            lower: lower.map(Box::new),
            upper,
            step,
        })
    }

    /// `for target in iter [if cond]` following an already parsed element.
    fn comprehension(&mut self, element: Expr) -> ParseResult<Expr> {
        let line = self.line();
        self.expect(&TokenKind::For)?;
        let target = self.target_list(line)?;
        self.expect(&TokenKind::In)?;
        let iter = self.or_test()?;
        let cond = if self.eat(&TokenKind::If) {
            Some(Box::new(self.or_test()?))
        } else {
            None
        };
        if matches!(self.peek(), TokenKind::For | TokenKind::If) {
            return Err(SyntaxError::new(
                "nested comprehensions are not supported",
                self.line(),
            ));
        }
        Ok(Expr::ListComp {
            element: Box::new(element),
            target,
            iter: Box::new(iter),
            cond,
        })
    }

    fn atom(&mut self) -> ParseResult<Expr> {
        let line = self.line();
        match self.peek().clone() {
            TokenKind::Name(name) => {
                if UNSUPPORTED.contains(&name.as_str()) {
                    return Err(SyntaxError::new(
                        format!("'{name}' is not supported in this sandbox"),
                        line,
                    ));
                }
                self.advance();
                Ok(Expr::Name(name))
            }
            TokenKind::Int(n) => {
                self.advance();
                Ok(Expr::Int(n))
            }
            TokenKind::Float(n) => {
                self.advance();
                Ok(Expr::Float(n))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            TokenKind::None => {
                self.advance();
                Ok(Expr::None)
            }
            TokenKind::Str(_) | TokenKind::FStr(_) => self.strings(),
            TokenKind::LParen => {
                self.advance();
                self.parenthesized()
            }
            TokenKind::LBracket => {
                self.advance();
                self.list_display()
            }
            TokenKind::LBrace => {
                self.advance();
                self.brace_display()
            }
            _ => Err(self.unexpected()),
        }
    }

    /// Adjacent string literals concatenate; any f-string part makes the whole an f-string.
    fn strings(&mut self) -> ParseResult<Expr> {
        let line = self.line();
        let mut parts = Vec::new();
        let mut formatted = false;
        loop {
            match self.peek().clone() {
                TokenKind::Str(text) => {
                    self.advance();
                    parts.push(FStringPart::Literal(text));
                }
                TokenKind::FStr(raw) => {
                    self.advance();
                    formatted = true;
                    parts.extend(fstring_parts(&raw, line)?);
                }
                _ => break,
            }
        }

        if formatted {
            return Ok(Expr::FString(parts));
        }
        let text = parts
            .into_iter()
            .map(|p| match p {
                FStringPart::Literal(s) => s,
                FStringPart::Field { .. } => String::new(),
            })
            .collect();
        Ok(Expr::Str(text))
    }

    fn parenthesized(&mut self) -> ParseResult<Expr> {
        if self.eat(&TokenKind::RParen) {
            return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.test()?;
        if self.check(&TokenKind::For) {
            let comp = self.comprehension(first)?;
            self.expect(&TokenKind::RParen)?;
            return Ok(comp);
        }
        if !self.check(&TokenKind::Comma) {
            self.expect(&TokenKind::RParen)?;
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RParen) {
                break;
            }
            items.push(self.test()?);
        }
        self.expect(&TokenKind::RParen)?;
        Ok(Expr::Tuple(items))
    }

    fn list_display(&mut self) -> ParseResult<Expr> {
        if self.eat(&TokenKind::RBracket) {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.test()?;
        if self.check(&TokenKind::For) {
            let comp = self.comprehension(first)?;
            self.expect(&TokenKind::RBracket)?;
            return Ok(comp);
        }
        let items = self.items_after(first, &TokenKind::RBracket)?;
        Ok(Expr::List(items))
    }

    fn brace_display(&mut self) -> ParseResult<Expr> {
        if self.eat(&TokenKind::RBrace) {
            return Ok(Expr::Dict(Vec::new()));
        }
        let first = self.test()?;
        if self.check(&TokenKind::For) {
            return Err(SyntaxError::new(
                "set comprehensions are not supported",
                self.line(),
            ));
        }
        if !self.eat(&TokenKind::Colon) {
            let items = self.items_after(first, &TokenKind::RBrace)?;
            return Ok(Expr::Set(items));
        }

        let value = self.test()?;
        if self.check(&TokenKind::For) {
            return Err(SyntaxError::new(
                "dict comprehensions are not supported",
                self.line(),
            ));
        }
        let mut pairs = vec![(first, value)];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RBrace) {
                break;
            }
            let key = self.test()?;
            self.expect(&TokenKind::Colon)?;
            pairs.push((key, self.test()?));
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(Expr::Dict(pairs))
    }

    fn items_after(&mut self, first: Expr, close: &TokenKind) -> ParseResult<Vec<Expr>> {
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(close) {
                break;
            }
            items.push(self.test()?);
        }
        self.expect(close)?;
        Ok(items)
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn to_target(expr: Expr, line: Line) -> ParseResult<Target> {
    match expr {
        Expr::Name(name) => Ok(Target::Name(name)),
        Expr::Subscript { object, index } => Ok(Target::Subscript { object, index }),
        Expr::Tuple(items) | Expr::List(items) => items
            .into_iter()
            .map(|item| to_target(item, line))
            .collect::<ParseResult<Vec<_>>>()
            .map(Target::Tuple),
        Expr::Attribute { .. } => Err(SyntaxError::new(
            "attribute assignment is not supported",
            line,
        )),
        _ => Err(SyntaxError::new("cannot assign to expression", line)),
    }
}

/// Splits an f-string body into literal text and `{expr[:spec]}` fields.
fn fstring_parts(raw: &str, line: Line) -> ParseResult<Vec<FStringPart>> {
    let chars: Vec<char> = raw.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                literal.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                literal.push('}');
                i += 2;
            }
            '}' => {
                return Err(SyntaxError::new(
                    "f-string: single '}' is not allowed",
                    line,
                ));
            }
            '{' => {
                if !literal.is_empty() {
                    parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
                }
                let (field, end) = fstring_field(&chars, i + 1, line)?;
                parts.push(field);
                i = end + 1;
            }
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }
    if !literal.is_empty() {
        parts.push(FStringPart::Literal(literal));
    }
    Ok(parts)
}

/// Parses one replacement field starting after `{`; returns it with the index of its `}`.
fn fstring_field(chars: &[char], start: usize, line: Line) -> ParseResult<(FStringPart, usize)> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut spec_at = None;
    let mut end = None;

    for (j, &c) in chars.iter().enumerate().skip(start) {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' if depth > 0 => depth -= 1,
            '}' => {
                end = Some(j);
                break;
            }
            ':' if depth == 0 && spec_at.is_none() => spec_at = Some(j),
            _ => {}
        }
    }

    let end = end.ok_or_else(|| SyntaxError::new("f-string: expecting '}'", line))?;
    let expr_end = spec_at.unwrap_or(end);
    let expr_text: String = chars[start..expr_end].iter().collect();
    if expr_text.trim().is_empty() {
        return Err(SyntaxError::new(
            "f-string: empty expression not allowed",
            line,
        ));
    }
    let expr = Parser::parse_expression(&expr_text, line)?;

    let spec = match spec_at {
        Some(at) => {
            let text: String = chars[at + 1..end].iter().collect();
            parse_format_spec(&text, line)?
        }
        None => None,
    };

    Ok((
        FStringPart::Field {
            expr: Box::new(expr),
            spec,
        },
        end,
    ))
}

fn parse_format_spec(text: &str, line: Line) -> ParseResult<Option<FormatSpec>> {
    if text.is_empty() {
        return Ok(None);
    }
    FormatSpec::parse(text)
        .map(Some)
        .ok_or_else(|| SyntaxError::new(format!("f-string: unsupported format spec '{text}'"), line))
}
