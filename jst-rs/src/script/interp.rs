//! Fragment interpreter.
//!
//! An [`Interpreter`] holds the global scope of one page render.  Fragments
//! executed on the same interpreter share variables, so a value assigned in
//! one `<% %>` block is visible in the next.  Function calls are routed to a
//! [`NativeDispatch`] supplied per call; the interpreter has no functions of
//! its own.

use std::collections::HashMap;

use super::{
    expr::{eval_expr, EvalContext},
    stmt::{parse_fragment, Stmt},
    value::Value,
};

/// Default cap on `for` iterations per loop.
pub const DEFAULT_LOOP_LIMIT: u64 = 100_000;

/// Receiver for function calls made by a fragment.
pub trait NativeDispatch {
    /// Call `name` with stringified arguments.
    ///
    /// Returns the call's value, or a diagnostic that fails the fragment.
    fn call_native(&mut self, name: &str, args: &[String]) -> Result<Value, String>;
}

#[derive(Debug, Clone)]
pub struct Interpreter {
    globals: HashMap<String, Value>,
    loop_limit: u64,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_loop_limit(DEFAULT_LOOP_LIMIT)
    }

    pub fn with_loop_limit(loop_limit: u64) -> Self {
        Interpreter {
            globals: HashMap::new(),
            loop_limit,
        }
    }

    pub fn set_global_var(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    /// Parse and run one fragment.  Returns the value of the last statement.
    pub fn exec_fragment(
        &mut self,
        src: &str,
        natives: &mut dyn NativeDispatch,
    ) -> Result<Value, String> {
        let stmts = parse_fragment(src)?;
        let mut scope = Scope {
            globals: &mut self.globals,
            natives,
            loop_limit: self.loop_limit,
        };
        let mut last = Value::default();
        for stmt in &stmts {
            last = scope.exec_stmt(stmt)?;
        }
        Ok(last)
    }
}

// ── Execution ─────────────────────────────────────────────────────────────────

struct Scope<'a> {
    globals: &'a mut HashMap<String, Value>,
    natives: &'a mut dyn NativeDispatch,
    loop_limit: u64,
}

impl Scope<'_> {
    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Value, String> {
        match stmt {
            Stmt::Expr(expr) => eval_expr(expr, self),

            Stmt::Var { name, init } => {
                let value = match init {
                    Some(e) => eval_expr(e, self)?,
                    None => Value::default(),
                };
                self.globals.insert(name.clone(), value);
                Ok(Value::default())
            }

            Stmt::If { cond, then, else_ } => {
                if eval_expr(cond, self)?.as_bool() {
                    self.exec_stmt(then)
                } else if let Some(else_) = else_ {
                    self.exec_stmt(else_)
                } else {
                    Ok(Value::default())
                }
            }

            Stmt::For { init, cond, step, body } => {
                if let Some(init) = init {
                    self.exec_stmt(init)?;
                }
                let mut iterations: u64 = 0;
                loop {
                    if let Some(cond) = cond {
                        if !eval_expr(cond, self)?.as_bool() {
                            break;
                        }
                    }
                    if iterations >= self.loop_limit {
                        return Err(format!("loop exceeded {} iterations", self.loop_limit));
                    }
                    iterations += 1;
                    self.exec_stmt(body)?;
                    if let Some(step) = step {
                        eval_expr(step, self)?;
                    }
                }
                Ok(Value::default())
            }

            Stmt::Block(stmts) => {
                let mut last = Value::default();
                for s in stmts {
                    last = self.exec_stmt(s)?;
                }
                Ok(last)
            }

            Stmt::Empty => Ok(Value::default()),
        }
    }
}

impl EvalContext for Scope<'_> {
    fn get_var(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    fn set_var(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_owned(), value);
    }

    fn call_fn(&mut self, name: &str, args: Vec<Value>) -> Result<Value, String> {
        let args: Vec<String> = args.iter().map(Value::to_string).collect();
        self.natives.call_native(name, &args)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Records `write` output; `fail` fails with its first argument.
    #[derive(Default)]
    struct Recorder {
        out: String,
    }

    impl NativeDispatch for Recorder {
        fn call_native(&mut self, name: &str, args: &[String]) -> Result<Value, String> {
            match name {
                "write" => {
                    self.out.push_str(&args.join(" "));
                    Ok(Value::default())
                }
                "fail" => Err(args.first().cloned().unwrap_or_default()),
                "twice" => Ok(Value::Int(args.first().map_or(0, |a| a.parse().unwrap_or(0)) * 2)),
                _ => Err(format!("undefined function '{name}'")),
            }
        }
    }

    fn run(src: &str) -> Result<String, String> {
        let mut interp = Interpreter::new();
        let mut rec = Recorder::default();
        interp.exec_fragment(src, &mut rec)?;
        Ok(rec.out)
    }

    #[test]
    fn write_joins_args() {
        assert_eq!(run(r#"write("a", 1, 2.5)"#).unwrap(), "a 1 2.5");
    }

    #[test]
    fn globals_persist_between_fragments() {
        let mut interp = Interpreter::new();
        let mut rec = Recorder::default();
        interp.exec_fragment("var total = 40", &mut rec).unwrap();
        interp.exec_fragment("total += 2; write(total)", &mut rec).unwrap();
        interp.exec_fragment("write(total * 2)", &mut rec).unwrap();
        assert_eq!(rec.out, "4284");
    }

    #[test]
    fn preset_globals_are_visible() {
        let mut interp = Interpreter::new();
        interp.set_global_var("user", Value::from("ops"));
        let mut rec = Recorder::default();
        interp.exec_fragment("write('hi ' + user)", &mut rec).unwrap();
        assert_eq!(rec.out, "hi ops");
    }

    #[test]
    fn if_else() {
        assert_eq!(run("t = 75; if (t > 70) write('hot'); else write('ok')").unwrap(), "hot");
        assert_eq!(run("t = 20; if (t > 70) { write('hot') } else { write('ok') }").unwrap(), "ok");
    }

    #[test]
    fn for_loop() {
        assert_eq!(run("for (i = 0; i < 4; i += 1) write(i)").unwrap(), "0123");
    }

    #[test]
    fn runaway_loop_hits_limit() {
        let mut interp = Interpreter::with_loop_limit(10);
        let err = interp.exec_fragment("for (;;) {}", &mut Recorder::default()).unwrap_err();
        assert_eq!(err, "loop exceeded 10 iterations");
    }

    #[test]
    fn native_result_is_a_value() {
        assert_eq!(run("write(twice(21) + 1)").unwrap(), "43");
    }

    #[test]
    fn native_failure_stops_fragment() {
        let mut interp = Interpreter::new();
        let mut rec = Recorder::default();
        let err = interp
            .exec_fragment("write('a'); fail('boom'); write('b')", &mut rec)
            .unwrap_err();
        assert_eq!(err, "boom");
        assert_eq!(rec.out, "a");
    }

    #[test]
    fn unknown_function_is_an_error() {
        assert_eq!(run("nope()").unwrap_err(), "undefined function 'nope'");
    }
}
