//! Native function registry.
//!
//! Pages call into the host through functions registered here.  The table is
//! built once at startup, shared read-only by every render, and torn down at
//! shutdown.  Registration and teardown take `&mut self`, so the borrow
//! checker guarantees no entry changes while a render holds the registry.
//!
//! # Writing a native
//!
//! Any `Fn(&mut NativeContext, &[String]) -> Result<(), String>` that is
//! `Send + Sync` is a [`NativeFunction`]:
//!
//! ```rust
//! use jst::FunctionRegistry;
//!
//! let mut registry = FunctionRegistry::with_builtins();
//! registry.register(
//!     "greet",
//!     |ctx: &mut jst::NativeContext<'_>, args: &[String]| -> Result<(), String> {
//!         let who = args.first().map(String::as_str).unwrap_or("world");
//!         ctx.write(&format!("hello {who}"))
//!     },
//! );
//! assert!(registry.contains("greet"));
//! assert!(registry.contains("write"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::sink::ResponseSink;
use crate::var::VarStore;

// ── NativeFunction ────────────────────────────────────────────────────────────

/// A host function callable from page script.
pub trait NativeFunction: Send + Sync {
    /// Run the function.  `Err` aborts the calling fragment with the given
    /// diagnostic.
    fn call(&self, ctx: &mut NativeContext<'_>, args: &[String]) -> Result<(), String>;
}

impl<F> NativeFunction for F
where
    F: Fn(&mut NativeContext<'_>, &[String]) -> Result<(), String> + Send + Sync,
{
    fn call(&self, ctx: &mut NativeContext<'_>, args: &[String]) -> Result<(), String> {
        self(ctx, args)
    }
}

// ── NativeContext ─────────────────────────────────────────────────────────────

/// Per-request handle passed to every native call.
pub struct NativeContext<'a> {
    sink: Option<&'a mut dyn ResponseSink>,
    vars: &'a VarStore,
    result: Option<String>,
}

impl<'a> NativeContext<'a> {
    pub fn new(sink: Option<&'a mut dyn ResponseSink>, vars: &'a VarStore) -> Self {
        NativeContext { sink, vars, result: None }
    }

    /// Append text to the response body.
    pub fn write(&mut self, text: &str) -> Result<(), String> {
        let sink = self
            .sink
            .as_deref_mut()
            .ok_or_else(|| "no response is bound to this engine".to_owned())?;
        sink.write_all(text.as_bytes())
            .map_err(|e| format!("write failed: {e}"))
    }

    /// The response sink, when one is bound.
    pub fn sink(&mut self) -> Option<&mut (dyn ResponseSink + 'a)> {
        self.sink.as_deref_mut()
    }

    pub fn vars(&self) -> &VarStore {
        self.vars
    }

    /// A request context variable.
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name)
    }

    /// Value the call evaluates to in script.  Without one it evaluates to
    /// the empty string.
    pub fn set_result(&mut self, value: impl Into<String>) {
        self.result = Some(value.into());
    }

    pub(crate) fn into_result(self) -> Option<String> {
        self.result
    }
}

// ── Built-ins ─────────────────────────────────────────────────────────────────

/// `write(args…)`: arguments joined by single spaces, appended to the body.
fn builtin_write(ctx: &mut NativeContext<'_>, args: &[String]) -> Result<(), String> {
    ctx.write(&args.join(" "))
}

// ── FunctionRegistry ──────────────────────────────────────────────────────────

/// Name → native function table.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn NativeFunction>>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

impl FunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in `write`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("write", builtin_write);
        registry
    }

    /// Add `function` under `name`, replacing any earlier registration.
    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: NativeFunction + 'static,
    {
        let name = name.into();
        let replaced = self.functions.insert(name.clone(), Arc::new(function)).is_some();
        debug!(name = %name, replaced, "registered native function");
    }

    pub fn lookup(&self, name: &str) -> Option<&dyn NativeFunction> {
        self.functions.get(name).map(|f| f.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Drop every entry.  Safe to call repeatedly.
    pub fn teardown(&mut self) {
        if self.functions.is_empty() {
            return;
        }
        debug!(count = self.functions.len(), "tearing down function registry");
        self.functions.clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
