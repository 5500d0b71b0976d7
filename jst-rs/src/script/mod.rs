//! Fragment scripting language.
//!
//! A small tree-walking interpreter for the code inside `<% … %>`:
//!
//! - Statements separated by `;` or line breaks, `{ … }` blocks
//! - `var`, `if` / `else`, `for (init; cond; step)`
//! - Integer, real and string values; `+` concatenates strings
//! - Calls to native functions through [`NativeDispatch`]
//!
//! # Quick start
//!
//! ```rust
//! use jst::script::{Interpreter, NativeDispatch, Value};
//!
//! struct Out(String);
//! impl NativeDispatch for Out {
//!     fn call_native(&mut self, _name: &str, args: &[String]) -> Result<Value, String> {
//!         self.0.push_str(&args.join(" "));
//!         Ok(Value::default())
//!     }
//! }
//!
//! let mut interp = Interpreter::new();
//! let mut out = Out(String::new());
//! interp.exec_fragment("x = 6; write(x * 7)", &mut out).unwrap();
//! assert_eq!(out.0, "42");
//! ```

pub mod expr;
pub mod interp;
pub mod stmt;
pub mod value;

pub use expr::EvalContext;
pub use interp::{Interpreter, NativeDispatch};
pub use value::Value;
