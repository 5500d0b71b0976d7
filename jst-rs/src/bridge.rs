//! Evaluation bridge: one script engine per render.
//!
//! [`Engine::open`] claims an engine slot, creates a fresh evaluator and
//! pre-binds the request's context variables.  After [`Engine::bind_context`]
//! attaches the response, [`Engine::evaluate`] runs fragments, routing their
//! function calls to the [`FunctionRegistry`].  The slot is released when the
//! engine is closed or dropped, whichever comes first.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::error::JstError;
use crate::registry::{FunctionRegistry, NativeContext};
use crate::script::{Interpreter, NativeDispatch, Value};
use crate::sink::ResponseSink;
use crate::var::VarStore;

/// Default number of engines that may be open at once.
pub const DEFAULT_MAX_ENGINES: usize = 64;

// ── ScriptEngine ──────────────────────────────────────────────────────────────

/// An evaluator the bridge can drive.
pub trait ScriptEngine {
    /// Define a string global visible to every later fragment.
    fn bind_var(&mut self, name: &str, value: &str);

    /// Run one fragment.  `Err` carries the evaluator's diagnostic, which may
    /// be empty.
    fn run(&mut self, fragment: &str, natives: &mut dyn NativeDispatch) -> Result<(), String>;
}

impl ScriptEngine for Interpreter {
    fn bind_var(&mut self, name: &str, value: &str) {
        self.set_global_var(name, Value::from(value));
    }

    fn run(&mut self, fragment: &str, natives: &mut dyn NativeDispatch) -> Result<(), String> {
        self.exec_fragment(fragment, natives).map(drop)
    }
}

// ── Engine slots ──────────────────────────────────────────────────────────────

/// Counter bounding how many engines may be open at once.
#[derive(Debug)]
pub struct EngineSlots {
    in_use: AtomicUsize,
    max: usize,
}

impl Default for EngineSlots {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENGINES)
    }
}

impl EngineSlots {
    pub fn new(max: usize) -> Self {
        EngineSlots { in_use: AtomicUsize::new(0), max }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Claim a slot, or `None` when all are taken.
    pub fn acquire(&self) -> Option<SlotGuard<'_>> {
        self.in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < self.max).then_some(n + 1))
            .ok()
            .map(|_| SlotGuard { slots: self })
    }
}

/// A claimed slot; released on drop.
#[derive(Debug)]
pub struct SlotGuard<'a> {
    slots: &'a EngineSlots,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.slots.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

// ── Evaluation ────────────────────────────────────────────────────────────────

/// Outcome of one fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub success: bool,
    /// On failure, the evaluator's diagnostic when it supplied a non-empty one.
    pub result: Option<String>,
}

impl Evaluation {
    fn ok() -> Self {
        Evaluation { success: true, result: None }
    }

    fn failed(diagnostic: String) -> Self {
        Evaluation {
            success: false,
            result: (!diagnostic.is_empty()).then_some(diagnostic),
        }
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// A script engine bound to one render.
///
/// `'a` covers the registry, context variables and slot counter; `'s` the
/// response sink.
pub struct Engine<'a, 's> {
    registry: &'a FunctionRegistry,
    vars: &'a VarStore,
    script: Box<dyn ScriptEngine + 'a>,
    request: Option<&'s mut dyn ResponseSink>,
    _slot: SlotGuard<'a>,
}

impl<'a, 's> Engine<'a, 's> {
    /// Open an engine running the built-in interpreter.
    pub fn open(
        registry: &'a FunctionRegistry,
        vars: &'a VarStore,
        slots: &'a EngineSlots,
    ) -> Result<Self, JstError> {
        Self::open_with(registry, vars, slots, Box::new(Interpreter::new()))
    }

    /// Open an engine around a caller-supplied evaluator.
    pub fn open_with(
        registry: &'a FunctionRegistry,
        vars: &'a VarStore,
        slots: &'a EngineSlots,
        mut script: Box<dyn ScriptEngine + 'a>,
    ) -> Result<Self, JstError> {
        let slot = slots.acquire().ok_or_else(|| {
            JstError::EngineOpen(format!("all {} engine slots are in use", slots.max()))
        })?;
        for (name, value) in vars.iter() {
            script.bind_var(name, value);
        }
        debug!(in_use = slots.in_use(), vars = vars.len(), "script engine opened");
        Ok(Engine {
            registry,
            vars,
            script,
            request: None,
            _slot: slot,
        })
    }

    /// Attach the response that natives write to.
    pub fn bind_context(&mut self, sink: &'s mut dyn ResponseSink) {
        self.request = Some(sink);
    }

    /// The bound response, if any.
    pub fn request(&mut self) -> Option<&mut dyn ResponseSink> {
        reborrow(&mut self.request)
    }

    /// Run one fragment.
    pub fn evaluate(&mut self, fragment: &str) -> Evaluation {
        let mut natives = RegistryDispatch {
            registry: self.registry,
            vars: self.vars,
            sink: reborrow(&mut self.request),
        };
        match self.script.run(fragment, &mut natives) {
            Ok(()) => Evaluation::ok(),
            Err(diagnostic) => {
                debug!(%diagnostic, "fragment failed");
                Evaluation::failed(diagnostic)
            }
        }
    }

    /// Release the engine and its slot.
    pub fn close(self) {
        debug!("script engine closed");
    }
}

fn reborrow<'m>(sink: &'m mut Option<&mut dyn ResponseSink>) -> Option<&'m mut dyn ResponseSink> {
    match sink {
        Some(sink) => {
            let sink: &'m mut dyn ResponseSink = &mut **sink;
            Some(sink)
        }
        None => None,
    }
}

// ── Native dispatch ───────────────────────────────────────────────────────────

/// Routes evaluator calls to registered natives.
struct RegistryDispatch<'e> {
    registry: &'e FunctionRegistry,
    vars: &'e VarStore,
    sink: Option<&'e mut dyn ResponseSink>,
}

impl NativeDispatch for RegistryDispatch<'_> {
    fn call_native(&mut self, name: &str, args: &[String]) -> Result<Value, String> {
        let function = self
            .registry
            .lookup(name)
            .ok_or_else(|| format!("undefined function '{name}'"))?;
        let mut ctx = NativeContext::new(reborrow(&mut self.sink), self.vars);
        function.call(&mut ctx, args)?;
        Ok(ctx.into_result().map(Value::Str).unwrap_or_default())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::BufferSink;

    fn registry() -> FunctionRegistry {
        let mut registry = FunctionRegistry::with_builtins();
        registry.register(
            "fail",
            |_: &mut NativeContext<'_>, args: &[String]| -> Result<(), String> {
                Err(args.join(" "))
            },
        );
        registry.register(
            "upper",
            |ctx: &mut NativeContext<'_>, args: &[String]| -> Result<(), String> {
                ctx.set_result(args.concat().to_uppercase());
                Ok(())
            },
        );
        registry
    }

    #[test]
    fn evaluate_writes_through_bound_sink() {
        let registry = registry();
        let vars = VarStore::from_iter([("name", "ops")]);
        let slots = EngineSlots::default();
        let mut sink = BufferSink::new();
        {
            let mut engine = Engine::open(&registry, &vars, &slots).unwrap();
            engine.bind_context(&mut sink);
            assert!(engine.evaluate("write('hi', upper(name))").success);
            engine.close();
        }
        assert_eq!(sink.body_string(), "hi OPS");
    }

    #[test]
    fn globals_persist_within_one_engine() {
        let registry = registry();
        let vars = VarStore::new();
        let slots = EngineSlots::default();
        let mut sink = BufferSink::new();
        {
            let mut engine = Engine::open(&registry, &vars, &slots).unwrap();
            engine.bind_context(&mut sink);
            assert!(engine.evaluate("a = 1").success);
            assert!(engine.evaluate("write(a + 1)").success);
        }
        assert_eq!(sink.body_string(), "2");
    }

    #[test]
    fn native_failure_reports_diagnostic() {
        let registry = registry();
        let vars = VarStore::new();
        let slots = EngineSlots::default();
        let mut engine = Engine::open(&registry, &vars, &slots).unwrap();
        let eval = engine.evaluate("fail('boom')");
        assert_eq!(eval, Evaluation { success: false, result: Some("boom".into()) });
    }

    #[test]
    fn unregistered_function_is_an_evaluator_error() {
        let registry = FunctionRegistry::new();
        let vars = VarStore::new();
        let slots = EngineSlots::default();
        let mut engine = Engine::open(&registry, &vars, &slots).unwrap();
        let eval = engine.evaluate("write('x')");
        assert!(!eval.success);
        assert_eq!(eval.result.as_deref(), Some("undefined function 'write'"));
    }

    #[test]
    fn empty_diagnostic_becomes_none() {
        let registry = registry();
        let vars = VarStore::new();
        let slots = EngineSlots::default();
        let mut engine = Engine::open(&registry, &vars, &slots).unwrap();
        assert_eq!(engine.evaluate("fail()").result, None);
    }

    #[test]
    fn slots_are_bounded_and_released() {
        let registry = registry();
        let vars = VarStore::new();
        let slots = EngineSlots::new(1);

        let first = Engine::open(&registry, &vars, &slots).unwrap();
        assert_eq!(slots.in_use(), 1);
        let err = Engine::open(&registry, &vars, &slots).err().unwrap();
        assert!(matches!(err, JstError::EngineOpen(_)), "{err:?}");

        first.close();
        assert_eq!(slots.in_use(), 0);
        let second = Engine::open(&registry, &vars, &slots).unwrap();
        drop(second);
        assert_eq!(slots.in_use(), 0);
    }

    /// Evaluator that fails every fragment without a message.
    struct Mute;

    impl ScriptEngine for Mute {
        fn bind_var(&mut self, _name: &str, _value: &str) {}
        fn run(
            &mut self,
            _fragment: &str,
            _natives: &mut dyn NativeDispatch,
        ) -> Result<(), String> {
            Err(String::new())
        }
    }

    #[test]
    fn custom_script_engine() {
        let registry = registry();
        let vars = VarStore::new();
        let slots = EngineSlots::default();
        let mut engine = Engine::open_with(&registry, &vars, &slots, Box::new(Mute)).unwrap();
        assert_eq!(engine.evaluate("anything"), Evaluation { success: false, result: None });
    }
}
