//! Fragment lexer, expression AST, parser, and evaluator.
//!
//! The expression grammar is a small C-like subset: literals, variables,
//! assignment, ternary, logical, equality/relational, additive,
//! multiplicative, unary and call expressions.
//!
//! Operator precedence (lowest → highest):
//!   assign  →  ternary  →  or  →  and  →  equality  →  relational  →
//!   additive  →  multiplicative  →  unary  →  primary

use std::cmp::Ordering;

use super::value::Value;

// ── EvalContext ───────────────────────────────────────────────────────────────

/// Variable and function access for the expression evaluator.
///
/// The interpreter implements this over its global scope and the native
/// function dispatcher of the current request.
pub trait EvalContext {
    fn get_var(&self, name: &str) -> Option<Value>;

    fn set_var(&mut self, name: &str, value: Value);

    /// Invoke a function by name.  Unknown names are an error, not a panic.
    fn call_fn(&mut self, name: &str, args: Vec<Value>) -> Result<Value, String>;
}

// ── Token ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,

    Eq, // ==
    Ne, // !=
    Lt,
    Le,
    Gt,
    Ge,
    And, // &&
    Or,  // ||

    Assign,        // =
    PlusAssign,    // +=
    MinusAssign,   // -=
    StarAssign,    // *=
    SlashAssign,   // /=
    PercentAssign, // %=

    Question,
    Colon,
    Comma,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Semi,
    Newline,
    /// Unrecognised input character, reported by the parser.
    Unknown(char),
    Eof,
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Lexer { src, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek2(&self) -> Option<char> {
        let mut it = self.src[self.pos..].chars();
        it.next();
        it.next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn eat(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.pos += ch.len_utf8();
            true
        } else {
            false
        }
    }

    fn skip_ws_and_comments(&mut self) -> Result<(), String> {
        loop {
            match (self.peek(), self.peek2()) {
                (Some(' ' | '\t' | '\r'), _) => {
                    self.pos += 1;
                }
                (Some('/'), Some('/')) => {
                    while !matches!(self.peek(), None | Some('\n')) {
                        self.advance();
                    }
                }
                (Some('/'), Some('*')) => {
                    self.pos += 2;
                    match self.src[self.pos..].find("*/") {
                        Some(end) => self.pos += end + 2,
                        None => return Err("unterminated comment".into()),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn read_number(&mut self, start: usize) -> Result<Token, String> {
        if self.src[start..].starts_with('0') && matches!(self.peek(), Some('x' | 'X')) {
            self.advance();
            let digits_start = self.pos;
            while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
                self.advance();
            }
            let digits = &self.src[digits_start..self.pos];
            return i64::from_str_radix(digits, 16)
                .map(Token::Int)
                .map_err(|_| format!("bad hex literal 0x{digits}"));
        }

        let mut is_float = false;
        while matches!(self.peek(), Some('0'..='9')) {
            self.advance();
        }
        if self.peek() == Some('.') && matches!(self.peek2(), Some('0'..='9')) {
            is_float = true;
            self.advance();
            while matches!(self.peek(), Some('0'..='9')) {
                self.advance();
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            is_float = true;
            self.advance();
            if matches!(self.peek(), Some('+' | '-')) {
                self.advance();
            }
            while matches!(self.peek(), Some('0'..='9')) {
                self.advance();
            }
        }

        let text = &self.src[start..self.pos];
        if is_float {
            text.parse().map(Token::Float).map_err(|_| format!("bad number {text}"))
        } else {
            // Integers too large for i64 fall back to reals.
            Ok(text
                .parse()
                .map(Token::Int)
                .unwrap_or_else(|_| Token::Float(text.parse().unwrap_or(f64::INFINITY))))
        }
    }

    fn read_string(&mut self, quote: char) -> Result<Token, String> {
        let mut s = String::new();
        loop {
            match self.advance() {
                None | Some('\n') => return Err("unterminated string".into()),
                Some('\\') => match self.advance() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('r') => s.push('\r'),
                    Some('0') => s.push('\0'),
                    Some(c) => s.push(c),
                    None => return Err("unterminated string".into()),
                },
                Some(c) if c == quote => return Ok(Token::Str(s)),
                Some(c) => s.push(c),
            }
        }
    }

    fn read_ident(&mut self, start: usize) -> Token {
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_' || c == '$') {
            self.advance();
        }
        Token::Ident(self.src[start..self.pos].to_owned())
    }

    fn next_token(&mut self) -> Result<Token, String> {
        self.skip_ws_and_comments()?;
        let start = self.pos;
        let Some(ch) = self.advance() else {
            return Ok(Token::Eof);
        };

        Ok(match ch {
            '0'..='9' => return self.read_number(start),
            '"' | '\'' => return self.read_string(ch),
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => self.read_ident(start),
            '\n' => Token::Newline,
            '+' if self.eat('=') => Token::PlusAssign,
            '+' => Token::Plus,
            '-' if self.eat('=') => Token::MinusAssign,
            '-' => Token::Minus,
            '*' if self.eat('=') => Token::StarAssign,
            '*' => Token::Star,
            '/' if self.eat('=') => Token::SlashAssign,
            '/' => Token::Slash,
            '%' if self.eat('=') => Token::PercentAssign,
            '%' => Token::Percent,
            '!' if self.eat('=') => Token::Ne,
            '!' => Token::Bang,
            '=' if self.eat('=') => Token::Eq,
            '=' => Token::Assign,
            '<' if self.eat('=') => Token::Le,
            '<' => Token::Lt,
            '>' if self.eat('=') => Token::Ge,
            '>' => Token::Gt,
            '&' if self.eat('&') => Token::And,
            '|' if self.eat('|') => Token::Or,
            '?' => Token::Question,
            ':' => Token::Colon,
            ',' => Token::Comma,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            ';' => Token::Semi,
            c => Token::Unknown(c),
        })
    }
}

/// Split fragment text into tokens, ending with [`Token::Eof`].
pub fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let mut lexer = Lexer::new(src);
    let mut tokens = Vec::new();
    loop {
        let t = lexer.next_token()?;
        let done = t == Token::Eof;
        tokens.push(t);
        if done {
            return Ok(tokens);
        }
    }
}

// ── AST ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Assign(String, AssignOp, Box<Expr>),
    Call(String, Vec<Expr>),
}

// ── Parser ────────────────────────────────────────────────────────────────────

/// Deepest nesting of statements, parentheses, calls and operators.
const MAX_DEPTH: usize = 128;

/// Token cursor shared by the expression and statement parsers.
pub(super) struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    pub(super) fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0, depth: 0 }
    }

    pub(super) fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    pub(super) fn peek_at(&self, offset: usize) -> &Token {
        self.tokens.get(self.pos + offset).unwrap_or(&Token::Eof)
    }

    pub(super) fn advance(&mut self) -> Token {
        let t = self.peek().clone();
        self.pos += 1;
        t
    }

    pub(super) fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub(super) fn expect(&mut self, expected: &Token, what: &str) -> Result<(), String> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(format!("expected {what}, found {}", describe(self.peek())))
        }
    }

    pub(super) fn mark(&self) -> usize {
        self.pos
    }

    pub(super) fn reset(&mut self, mark: usize) {
        self.pos = mark;
    }

    fn descend(&mut self, what: &str) -> Result<(), String> {
        if self.depth >= MAX_DEPTH {
            return Err(format!("{what} nested too deeply"));
        }
        self.depth += 1;
        Ok(())
    }

    /// Run `parse` one level deeper.  Bounds the recursion of both the parser
    /// and the evaluator walking the tree it builds.
    pub(super) fn nested<T>(
        &mut self,
        what: &str,
        parse: impl FnOnce(&mut Parser) -> Result<T, String>,
    ) -> Result<T, String> {
        let entry = self.depth;
        self.descend(what)?;
        let result = parse(self);
        self.depth = entry;
        result
    }

    /// Newlines are insignificant inside parentheses and after operators.
    fn skip_newlines(&mut self) {
        while self.peek() == &Token::Newline {
            self.pos += 1;
        }
    }

    // ── Grammar ───────────────────────────────────────────────────────────────

    pub(super) fn parse_expr(&mut self) -> Result<Expr, String> {
        self.parse_assign()
    }

    fn parse_assign(&mut self) -> Result<Expr, String> {
        self.nested("expression", Parser::parse_assign_level)
    }

    fn parse_assign_level(&mut self) -> Result<Expr, String> {
        if let Token::Ident(name) = self.peek() {
            let op = match self.peek_at(1) {
                Token::Assign => Some(AssignOp::Set),
                Token::PlusAssign => Some(AssignOp::Add),
                Token::MinusAssign => Some(AssignOp::Sub),
                Token::StarAssign => Some(AssignOp::Mul),
                Token::SlashAssign => Some(AssignOp::Div),
                Token::PercentAssign => Some(AssignOp::Rem),
                _ => None,
            };
            if let Some(op) = op {
                let name = name.clone();
                self.pos += 2;
                self.skip_newlines();
                let rhs = self.parse_assign()?;
                return Ok(Expr::Assign(name, op, Box::new(rhs)));
            }
        }
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Result<Expr, String> {
        let cond = self.parse_or()?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        self.skip_newlines();
        let then = self.parse_assign()?;
        self.skip_newlines();
        self.expect(&Token::Colon, "':' in conditional expression")?;
        self.skip_newlines();
        let else_ = self.parse_assign()?;
        Ok(Expr::Ternary(Box::new(cond), Box::new(then), Box::new(else_)))
    }

    fn parse_binary_level(
        &mut self,
        ops: &[(Token, BinOp)],
        next: fn(&mut Parser) -> Result<Expr, String>,
    ) -> Result<Expr, String> {
        let entry = self.depth;
        let mut lhs = next(self)?;
        'outer: loop {
            for (tok, op) in ops {
                if self.eat(tok) {
                    // Each operator in a chain deepens the left operand.
                    self.descend("expression")?;
                    self.skip_newlines();
                    let rhs = next(self)?;
                    lhs = Expr::Binary(*op, Box::new(lhs), Box::new(rhs));
                    continue 'outer;
                }
            }
            self.depth = entry;
            return Ok(lhs);
        }
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        self.parse_binary_level(&[(Token::Or, BinOp::Or)], Parser::parse_and)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        self.parse_binary_level(&[(Token::And, BinOp::And)], Parser::parse_equality)
    }

    fn parse_equality(&mut self) -> Result<Expr, String> {
        self.parse_binary_level(
            &[(Token::Eq, BinOp::Eq), (Token::Ne, BinOp::Ne)],
            Parser::parse_relational,
        )
    }

    fn parse_relational(&mut self) -> Result<Expr, String> {
        self.parse_binary_level(
            &[
                (Token::Le, BinOp::Le),
                (Token::Ge, BinOp::Ge),
                (Token::Lt, BinOp::Lt),
                (Token::Gt, BinOp::Gt),
            ],
            Parser::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        self.parse_binary_level(
            &[(Token::Plus, BinOp::Add), (Token::Minus, BinOp::Sub)],
            Parser::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, String> {
        self.parse_binary_level(
            &[
                (Token::Star, BinOp::Mul),
                (Token::Slash, BinOp::Div),
                (Token::Percent, BinOp::Rem),
            ],
            Parser::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        let op = match self.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Bang => UnaryOp::Not,
            Token::Plus => {
                self.pos += 1;
                return self.nested("expression", Parser::parse_unary);
            }
            _ => return self.parse_primary(),
        };
        self.pos += 1;
        let operand = self.nested("expression", Parser::parse_unary)?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Token::Int(n) => Ok(Expr::Literal(Value::Int(n))),
            Token::Float(x) => Ok(Expr::Literal(Value::Float(x))),
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::Ident(name) if name == "true" => Ok(Expr::Literal(Value::Int(1))),
            Token::Ident(name) if name == "false" => Ok(Expr::Literal(Value::Int(0))),
            Token::Ident(name) => {
                if !self.eat(&Token::LParen) {
                    return Ok(Expr::Var(name));
                }
                let mut args = Vec::new();
                self.skip_newlines();
                if !self.eat(&Token::RParen) {
                    loop {
                        self.skip_newlines();
                        args.push(self.parse_assign()?);
                        self.skip_newlines();
                        if self.eat(&Token::RParen) {
                            break;
                        }
                        self.expect(&Token::Comma, &format!("',' or ')' in call to {name}"))?;
                    }
                }
                Ok(Expr::Call(name, args))
            }
            Token::LParen => {
                self.skip_newlines();
                let inner = self.parse_expr()?;
                self.skip_newlines();
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            other => Err(format!("syntax error: unexpected {}", describe(&other))),
        }
    }
}

/// Human-readable token name for diagnostics.
pub(super) fn describe(tok: &Token) -> String {
    match tok {
        Token::Int(n) => n.to_string(),
        Token::Float(x) => x.to_string(),
        Token::Str(s) => format!("string \"{s}\""),
        Token::Ident(name) => format!("'{name}'"),
        Token::Newline => "end of line".into(),
        Token::Eof => "end of script".into(),
        Token::Unknown(c) => format!("character '{c}'"),
        other => format!("{other:?}"),
    }
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

pub fn eval_expr(expr: &Expr, ctx: &mut dyn EvalContext) -> Result<Value, String> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),

        Expr::Var(name) => ctx
            .get_var(name)
            .ok_or_else(|| format!("undefined variable '{name}'")),

        Expr::Unary(op, inner) => {
            let v = eval_expr(inner, ctx)?;
            Ok(match op {
                UnaryOp::Neg => v.neg(),
                UnaryOp::Not => Value::from(!v.as_bool()),
            })
        }

        Expr::Binary(BinOp::And, lhs, rhs) => {
            let l = eval_expr(lhs, ctx)?;
            if !l.as_bool() {
                return Ok(Value::Int(0));
            }
            Ok(Value::from(eval_expr(rhs, ctx)?.as_bool()))
        }

        Expr::Binary(BinOp::Or, lhs, rhs) => {
            let l = eval_expr(lhs, ctx)?;
            if l.as_bool() {
                return Ok(Value::Int(1));
            }
            Ok(Value::from(eval_expr(rhs, ctx)?.as_bool()))
        }

        Expr::Binary(op, lhs, rhs) => {
            let l = eval_expr(lhs, ctx)?;
            let r = eval_expr(rhs, ctx)?;
            eval_binop(*op, &l, &r)
        }

        Expr::Ternary(cond, then, else_) => {
            if eval_expr(cond, ctx)?.as_bool() {
                eval_expr(then, ctx)
            } else {
                eval_expr(else_, ctx)
            }
        }

        Expr::Assign(name, op, rhs) => {
            let rval = eval_expr(rhs, ctx)?;
            let new_val = match op {
                AssignOp::Set => rval,
                _ => {
                    let cur = ctx
                        .get_var(name)
                        .ok_or_else(|| format!("undefined variable '{name}'"))?;
                    match op {
                        AssignOp::Add => cur.add(&rval),
                        AssignOp::Sub => cur.sub(&rval),
                        AssignOp::Mul => cur.mul(&rval),
                        AssignOp::Div => cur.div(&rval)?,
                        AssignOp::Rem => cur.rem(&rval)?,
                        AssignOp::Set => unreachable!("handled above"),
                    }
                }
            };
            ctx.set_var(name, new_val.clone());
            Ok(new_val)
        }

        Expr::Call(name, arg_exprs) => {
            let args = arg_exprs
                .iter()
                .map(|ae| eval_expr(ae, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            ctx.call_fn(name, args)
        }
    }
}

fn eval_binop(op: BinOp, l: &Value, r: &Value) -> Result<Value, String> {
    Ok(match op {
        BinOp::Add => l.add(r),
        BinOp::Sub => l.sub(r),
        BinOp::Mul => l.mul(r),
        BinOp::Div => l.div(r)?,
        BinOp::Rem => l.rem(r)?,
        BinOp::Eq => Value::from(l.compare(r) == Ordering::Equal),
        BinOp::Ne => Value::from(l.compare(r) != Ordering::Equal),
        BinOp::Lt => Value::from(l.compare(r) == Ordering::Less),
        BinOp::Le => Value::from(l.compare(r) != Ordering::Greater),
        BinOp::Gt => Value::from(l.compare(r) == Ordering::Greater),
        BinOp::Ge => Value::from(l.compare(r) != Ordering::Less),
        BinOp::And | BinOp::Or => unreachable!("short-circuit operators handled by eval_expr"),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
