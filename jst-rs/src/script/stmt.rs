//! Statement AST and fragment-level parser.
//!
//! A fragment is a sequence of statements separated by `;` or line breaks.
//! Braced blocks, `if`/`else` and `for` bodies need no separator after the
//! closing brace.

use super::expr::{describe, tokenize, Expr, Parser, Token};

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// An expression evaluated for its side effects.
    Expr(Expr),
    /// `var name [= init]`
    Var { name: String, init: Option<Expr> },
    /// `if (cond) then [else else_]`
    If {
        cond: Expr,
        then: Box<Stmt>,
        else_: Option<Box<Stmt>>,
    },
    /// `for (init; cond; step) body`
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
    },
    /// `{ … }`
    Block(Vec<Stmt>),
    /// A lone `;`.
    Empty,
}

impl Stmt {
    /// Statements that end with a block and so need no trailing separator.
    fn ends_with_block(&self) -> bool {
        match self {
            Stmt::Block(_) => true,
            Stmt::If { then, else_, .. } => else_.as_ref().unwrap_or(then).ends_with_block(),
            Stmt::For { body, .. } => body.ends_with_block(),
            _ => false,
        }
    }
}

/// Parse fragment text into a list of statements.
pub fn parse_fragment(src: &str) -> Result<Vec<Stmt>, String> {
    let mut parser = Parser::new(tokenize(src)?);
    let stmts = parser.parse_stmt_list()?;
    if parser.peek() != &Token::Eof {
        return Err(format!("syntax error: unexpected {}", describe(parser.peek())));
    }
    Ok(stmts)
}

impl Parser {
    fn skip_separators(&mut self) -> bool {
        let mut any = false;
        while matches!(self.peek(), Token::Semi | Token::Newline) {
            self.advance();
            any = true;
        }
        any
    }

    /// Statements up to `}` or end of input (neither is consumed).
    fn parse_stmt_list(&mut self) -> Result<Vec<Stmt>, String> {
        let mut stmts = Vec::new();
        self.skip_separators();
        while !matches!(self.peek(), Token::Eof | Token::RBrace) {
            let stmt = self.parse_stmt()?;
            let separated = self.skip_separators();
            let at_end = matches!(self.peek(), Token::Eof | Token::RBrace);
            if !separated && !at_end && !stmt.ends_with_block() {
                return Err(format!("syntax error: unexpected {}", describe(self.peek())));
            }
            stmts.push(stmt);
        }
        Ok(stmts)
    }

    fn skip_newlines_only(&mut self) {
        while self.peek() == &Token::Newline {
            self.advance();
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt, String> {
        self.nested("statement", Parser::parse_stmt_level)
    }

    fn parse_stmt_level(&mut self) -> Result<Stmt, String> {
        match self.peek() {
            Token::Semi => {
                self.advance();
                Ok(Stmt::Empty)
            }
            Token::LBrace => {
                self.advance();
                let body = self.parse_stmt_list()?;
                self.expect(&Token::RBrace, "'}'")?;
                Ok(Stmt::Block(body))
            }
            Token::Ident(kw) if kw == "var" => {
                self.advance();
                self.parse_var()
            }
            Token::Ident(kw) if kw == "if" => {
                self.advance();
                self.parse_if()
            }
            Token::Ident(kw) if kw == "for" => {
                self.advance();
                self.parse_for()
            }
            _ => Ok(Stmt::Expr(self.parse_expr()?)),
        }
    }

    fn parse_var(&mut self) -> Result<Stmt, String> {
        let name = match self.advance() {
            Token::Ident(name) => name,
            other => {
                let found = describe(&other);
                return Err(format!("expected variable name after 'var', found {found}"));
            }
        };
        let init = if self.eat(&Token::Assign) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(Stmt::Var { name, init })
    }

    fn parse_if(&mut self) -> Result<Stmt, String> {
        self.expect(&Token::LParen, "'(' after 'if'")?;
        let cond = self.parse_expr()?;
        self.expect(&Token::RParen, "')' after if condition")?;
        self.skip_newlines_only();
        let then = Box::new(self.parse_stmt()?);

        // `else` may follow after separators: `if (a) x(); else y();`
        let mark = self.mark();
        self.skip_separators();
        if matches!(self.peek(), Token::Ident(kw) if kw == "else") {
            self.advance();
            self.skip_newlines_only();
            let else_ = Box::new(self.parse_stmt()?);
            return Ok(Stmt::If { cond, then, else_: Some(else_) });
        }
        self.reset(mark);
        Ok(Stmt::If { cond, then, else_: None })
    }

    fn parse_for(&mut self) -> Result<Stmt, String> {
        self.expect(&Token::LParen, "'(' after 'for'")?;
        let init = if self.peek() == &Token::Semi {
            None
        } else {
            Some(Box::new(self.parse_stmt()?))
        };
        self.expect(&Token::Semi, "';' after for initializer")?;
        let cond = if self.peek() == &Token::Semi {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&Token::Semi, "';' after for condition")?;
        let step = if self.peek() == &Token::RParen {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&Token::RParen, "')' after for clauses")?;
        self.skip_newlines_only();
        let body = Box::new(self.parse_stmt()?);
        Ok(Stmt::For { init, cond, step, body })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::expr::{AssignOp, BinOp};
    use crate::script::value::Value;

    fn call(name: &str, args: Vec<Expr>) -> Stmt {
        Stmt::Expr(Expr::Call(name.into(), args))
    }

    #[test]
    fn separators() {
        let stmts = parse_fragment("a = 1; write(a)\nwrite(2);;").unwrap();
        assert_eq!(stmts.len(), 3);
        assert_eq!(
            stmts[0],
            Stmt::Expr(Expr::Assign(
                "a".into(),
                AssignOp::Set,
                Box::new(Expr::Literal(Value::Int(1)))
            ))
        );
        assert_eq!(stmts[1], call("write", vec![Expr::Var("a".into())]));
    }

    #[test]
    fn empty_if_body() {
        let stmts = parse_fragment("if (x) ;").unwrap();
        assert!(matches!(&stmts[0], Stmt::If { then, .. } if **then == Stmt::Empty));
    }

    #[test]
    fn missing_separator_is_error() {
        assert!(parse_fragment("write(1) write(2)").is_err());
    }

    #[test]
    fn var_declaration() {
        assert_eq!(
            parse_fragment("var t").unwrap(),
            vec![Stmt::Var { name: "t".into(), init: None }]
        );
        assert!(parse_fragment("var 1").is_err());
    }

    #[test]
    fn if_else_across_separator() {
        let stmts = parse_fragment("if (x) write(1); else write(2);").unwrap();
        assert_eq!(stmts.len(), 1);
        let Stmt::If { else_, .. } = &stmts[0] else { panic!("not an if: {stmts:?}") };
        assert_eq!(else_.as_deref(), Some(&call("write", vec![Expr::Literal(Value::Int(2))])));
    }

    #[test]
    fn block_needs_no_separator() {
        let stmts = parse_fragment("if (a < 2) { write('x') } write('y')").unwrap();
        assert_eq!(stmts.len(), 2);
        let Stmt::If { cond, .. } = &stmts[0] else { panic!() };
        assert!(matches!(cond, Expr::Binary(BinOp::Lt, _, _)));
    }

    #[test]
    fn for_loop() {
        let stmts = parse_fragment("for (var i = 0; i < 3; i += 1) {\n write(i)\n}").unwrap();
        let Stmt::For { init, cond, step, body } = &stmts[0] else { panic!() };
        assert!(matches!(init.as_deref(), Some(Stmt::Var { .. })));
        assert!(cond.is_some());
        assert!(step.is_some());
        assert!(matches!(body.as_ref(), Stmt::Block(b) if b.len() == 1));
    }

    #[test]
    fn for_with_empty_clauses() {
        let stmts = parse_fragment("for (;;) {}").unwrap();
        assert_eq!(
            stmts,
            vec![Stmt::For {
                init: None,
                cond: None,
                step: None,
                body: Box::new(Stmt::Block(vec![])),
            }]
        );
    }

    #[test]
    fn unbalanced_braces() {
        assert!(parse_fragment("{ write(1)").is_err());
        assert!(parse_fragment("write(1) }").is_err());
    }

    #[test]
    fn deep_blocks_are_an_error() {
        let blocks = format!("{}write(1){}", "{".repeat(5000), "}".repeat(5000));
        assert_eq!(parse_fragment(&blocks), Err("statement nested too deeply".into()));
        let ifs = format!("{}write(1)", "if (1) ".repeat(5000));
        assert!(parse_fragment(&ifs).unwrap_err().contains("nested too deeply"));
        assert!(parse_fragment(&format!("{}{}", "{".repeat(20), "}".repeat(20))).is_ok());
    }
}
