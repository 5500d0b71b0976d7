//! Render driver and the `Jst` page service.
//!
//! A render walks the page once, front to back:
//!
//! ```text
//! SCANNING ──directive──▶ EXECUTING ──ok──▶ SCANNING
//!    │                        │
//!    └──no more──▶ DONE       └──script error──▶ DONE (truncated)
//! ```
//!
//! Literal text between directives is copied to the response unchanged.
//! A fragment that fails ends the page with a diagnostic block; everything
//! already written stays.  An open marker with no close marker aborts the
//! render with an error response.

use std::fmt;
use std::io;

use tracing::{debug, warn};

use crate::bridge::{Engine, EngineSlots};
use crate::config::{Config, Options};
use crate::error::{JstError, ScriptFailure, HTTP_INTERNAL_SERVER_ERROR};
use crate::registry::FunctionRegistry;
use crate::scan::{extract_literal, Scanner, Unterminated};
use crate::script::Interpreter;
use crate::sink::{escape_html, ResponseSink};
use crate::source::{read_document, DocumentBuffer, DocumentSource};
use crate::var::VarStore;

const HTTP_OK: u16 = 200;

/// How a render ended.
#[derive(Debug)]
pub enum RenderOutcome {
    /// Every byte of the page was emitted.
    Completed,
    /// A fragment failed; the page ends with its diagnostic block.
    Truncated(ScriptFailure),
    /// Processing stopped on a fatal error.  Bytes already sent stay sent.
    Aborted(JstError),
}

impl RenderOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RenderOutcome::Completed)
    }

    pub fn script_failure(&self) -> Option<&ScriptFailure> {
        match self {
            RenderOutcome::Truncated(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&JstError> {
        match self {
            RenderOutcome::Aborted(err) => Some(err),
            _ => None,
        }
    }
}

// ── Jst ───────────────────────────────────────────────────────────────────────

/// The page service: function registry, marker scanner, limits and the
/// engine slot budget.  Build one at startup and share it by reference;
/// renders on different threads do not interact.
pub struct Jst {
    registry: FunctionRegistry,
    scanner: Scanner,
    options: Options,
    defaults: VarStore,
    slots: EngineSlots,
}

impl fmt::Debug for Jst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jst")
            .field("registry", &self.registry)
            .field("options", &self.options)
            .field("engines_in_use", &self.slots.in_use())
            .finish()
    }
}

impl Default for Jst {
    fn default() -> Self {
        Self::new()
    }
}

impl Jst {
    /// A service with default limits and the built-in functions.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        debug!(
            max_engines = config.options.max_engines,
            max_document_size = config.options.max_document_size,
            defaults = config.vars.len(),
            "page service configured"
        );
        Jst {
            registry: FunctionRegistry::with_builtins(),
            scanner: Scanner::new(),
            slots: EngineSlots::new(config.options.max_engines),
            options: config.options,
            defaults: config.vars,
        }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Mutable registry access for startup registration.
    pub fn registry_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.registry
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn engines_in_use(&self) -> usize {
        self.slots.in_use()
    }

    /// Shut the service down.  Safe to call more than once.
    pub fn close(&mut self) {
        self.registry.teardown();
    }

    /// Load `path` from `source` and render it into `sink`.
    ///
    /// `vars` are layered over the configured defaults and bound as string
    /// globals.  The sink is always finished before this returns.
    pub fn serve(
        &self,
        source: &dyn DocumentSource,
        path: &str,
        vars: &VarStore,
        sink: &mut dyn ResponseSink,
    ) -> RenderOutcome {
        let vars = self.context_vars(vars);
        let script = self.interpreter();
        let outcome = match Engine::open_with(&self.registry, &vars, &self.slots, script) {
            Err(err) => abort(sink, err),
            Ok(mut engine) => match read_document(source, path, self.options.max_document_size) {
                Err(err) => {
                    engine.close();
                    abort(sink, err)
                }
                Ok(document) => {
                    engine.bind_context(&mut *sink);
                    self.drive(engine, document)
                }
            },
        };
        sink.finish();
        outcome
    }

    /// Render an already loaded page into `sink`.
    pub fn render(
        &self,
        document: DocumentBuffer,
        vars: &VarStore,
        sink: &mut dyn ResponseSink,
    ) -> RenderOutcome {
        let vars = self.context_vars(vars);
        let script = self.interpreter();
        let outcome = match Engine::open_with(&self.registry, &vars, &self.slots, script) {
            Err(err) => abort(sink, err),
            Ok(mut engine) => {
                engine.bind_context(&mut *sink);
                self.drive(engine, document)
            }
        };
        sink.finish();
        outcome
    }

    fn context_vars(&self, request: &VarStore) -> VarStore {
        let mut vars = self.defaults.clone();
        vars.overlay(request);
        vars
    }

    fn interpreter(&self) -> Box<Interpreter> {
        Box::new(Interpreter::with_loop_limit(self.options.loop_limit))
    }

    // ── Driver ────────────────────────────────────────────────────────────────

    fn drive(&self, mut engine: Engine<'_, '_>, mut document: DocumentBuffer) -> RenderOutcome {
        let outcome = match self.stream(&mut engine, &mut document) {
            Ok(None) => RenderOutcome::Completed,
            Ok(Some(failure)) => RenderOutcome::Truncated(failure),
            Err(err) => {
                warn!(path = document.path(), error = %err, "page render aborted");
                RenderOutcome::Aborted(err)
            }
        };
        engine.close();
        outcome
    }

    /// Emit headers then alternate literal copy and fragment execution.
    /// `Ok(Some(_))` is a script failure that ended the page early.  A sink
    /// invalidated between fragments stops the page with `Ok(None)`.
    fn stream(
        &self,
        engine: &mut Engine<'_, '_>,
        document: &mut DocumentBuffer,
    ) -> Result<Option<ScriptFailure>, JstError> {
        write_page_headers(bound(engine)?).map_err(JstError::Write)?;

        let mut cursor = 0;
        loop {
            // A native that sent its own response ends the page quietly.
            if !bound(engine)?.is_valid() {
                debug!(path = document.path(), offset = cursor, "response closed by native");
                return Ok(None);
            }

            let span = match self.scanner.find_next_directive(document.as_bytes(), cursor) {
                Ok(Some(span)) => span,
                Ok(None) => break,
                Err(Unterminated { offset }) => {
                    emit(engine, &document.as_bytes()[cursor..offset])?;
                    let path = document.path().to_owned();
                    bound(engine)?.error(
                        HTTP_INTERNAL_SERVER_ERROR,
                        &format!("Unterminated script in {path}"),
                    );
                    return Err(JstError::Malformed { path, offset });
                }
            };

            let literal = extract_literal(cursor, span);
            emit(engine, &document.as_bytes()[literal])?;

            let fragment_range = self.scanner.prepare_fragment(document.as_mut_bytes(), span);
            cursor = span.end;
            if fragment_range.is_empty() {
                continue;
            }

            let fragment = String::from_utf8_lossy(&document.as_bytes()[fragment_range]);
            let evaluation = engine.evaluate(&fragment);
            if !evaluation.success {
                let failure = ScriptFailure {
                    diagnostic: evaluation.result,
                    fragment: fragment.into_owned(),
                };
                debug!(path = document.path(), error = %failure, "page truncated");
                write_failure_block(engine, &failure);
                return Ok(Some(failure));
            }
        }

        emit(engine, &document.as_bytes()[cursor..])?;
        Ok(None)
    }
}

// ── Output helpers ────────────────────────────────────────────────────────────

fn bound<'m>(engine: &'m mut Engine<'_, '_>) -> Result<&'m mut dyn ResponseSink, JstError> {
    engine.request().ok_or_else(|| {
        JstError::Write(io::Error::new(io::ErrorKind::NotConnected, "no response bound to engine"))
    })
}

fn emit(engine: &mut Engine<'_, '_>, bytes: &[u8]) -> Result<(), JstError> {
    if bytes.is_empty() {
        return Ok(());
    }
    bound(engine)?.write_all(bytes).map_err(JstError::Write)
}

/// Status line and cache headers.  Content length is unknown until the
/// page has run.
fn write_page_headers(sink: &mut dyn ResponseSink) -> io::Result<()> {
    sink.write_headers(HTTP_OK, None)?;
    sink.write_header("Pragma", "no-cache")?;
    sink.write_header("Cache-Control", "no-cache")?;
    sink.end_headers()
}

/// HTML block that closes a page whose fragment failed.
pub fn failure_block(failure: &ScriptFailure) -> String {
    let fragment = escape_html(&failure.fragment);
    match &failure.diagnostic {
        Some(diagnostic) => format!(
            "<h2><b>Javascript Error: {}</b></h2>\n<pre>{fragment}</pre></body></html>\n",
            escape_html(diagnostic)
        ),
        None => format!("<h2><b>Javascript Error</b></h2>\n{fragment}\n</body></html>\n"),
    }
}

/// Best effort: the page is already over, so a failed write only gets logged.
fn write_failure_block(engine: &mut Engine<'_, '_>, failure: &ScriptFailure) {
    let Some(sink) = engine.request() else { return };
    if !sink.is_valid() {
        return;
    }
    if let Err(err) = sink.write_all(failure_block(failure).as_bytes()) {
        warn!(error = %err, "could not write script error block");
    }
}

/// Report a failure that happened before any output.
fn abort(sink: &mut dyn ResponseSink, err: JstError) -> RenderOutcome {
    warn!(error = %err, status = err.status(), "page not served");
    sink.error(err.status(), &err.to_string());
    RenderOutcome::Aborted(err)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NativeContext;
    use crate::sink::BufferSink;
    use crate::source::MemorySource;

    fn service() -> Jst {
        let mut jst = Jst::new();
        jst.registry_mut().register(
            "fail",
            |_: &mut NativeContext<'_>, args: &[String]| -> Result<(), String> {
                Err(args.join(" "))
            },
        );
        jst
    }

    fn render(jst: &Jst, page: &str) -> (RenderOutcome, BufferSink) {
        let mut sink = BufferSink::new();
        let document = DocumentBuffer::new("/page.jst", page);
        let outcome = jst.render(document, &VarStore::new(), &mut sink);
        (outcome, sink)
    }

    #[test]
    fn plain_page_passes_through() {
        let (outcome, sink) = render(&service(), "<html><body>Hello</body></html>");
        assert!(outcome.is_completed());
        assert_eq!(sink.body_string(), "<html><body>Hello</body></html>");
        assert_eq!(sink.status(), Some(200));
        assert_eq!(sink.content_length(), None);
        assert_eq!(sink.header("Pragma"), Some("no-cache"));
        assert_eq!(sink.header("Cache-Control"), Some("no-cache"));
        assert!(sink.is_finished());
    }

    #[test]
    fn fragments_interleave_with_literals() {
        let (outcome, sink) = render(&service(), r#"<p><% write("a") %>-<% write('b', 1) %></p>"#);
        assert!(outcome.is_completed());
        assert_eq!(sink.body_string(), "<p>a-b 1</p>");
    }

    #[test]
    fn empty_directive_is_skipped() {
        let (outcome, sink) = render(&service(), "a<%   %>b<%%>c");
        assert!(outcome.is_completed());
        assert_eq!(sink.body_string(), "abc");
    }

    #[test]
    fn failure_truncates_with_diagnostic() {
        let (outcome, sink) = render(&service(), "<p>before</p><% fail('boom') %><p>after</p>");
        let failure = outcome.script_failure().unwrap();
        assert_eq!(failure.diagnostic.as_deref(), Some("boom"));
        assert_eq!(failure.fragment, "fail('boom')");
        assert_eq!(
            sink.body_string(),
            "<p>before</p><h2><b>Javascript Error: boom</b></h2>\n\
             <pre>fail(&#39;boom&#39;)</pre></body></html>\n"
        );
        assert!(sink.is_finished());
    }

    #[test]
    fn failure_block_without_diagnostic() {
        let failure = ScriptFailure { diagnostic: None, fragment: "a < b".into() };
        assert_eq!(
            failure_block(&failure),
            "<h2><b>Javascript Error</b></h2>\na &lt; b\n</body></html>\n"
        );
    }

    #[test]
    fn unterminated_directive_aborts() {
        let (outcome, sink) = render(&service(), "<p>x</p><% write(1) <p>tail</p>");
        match outcome.error() {
            Some(JstError::Malformed { path, offset }) => {
                assert_eq!(path, "/page.jst");
                assert_eq!(*offset, 8);
            }
            other => panic!("expected malformed, got {other:?}"),
        }
        assert_eq!(sink.error_sent(), Some((500, "Unterminated script in /page.jst")));
        assert_eq!(sink.body_string(), "<p>x</p><p>Unterminated script in /page.jst</p>\n");
    }

    #[test]
    fn context_vars_layer_over_defaults() {
        let (config, errs) = Config::load_str("/set site=plant\n/set units=C");
        assert!(errs.is_empty());
        let jst = Jst::with_config(config);
        let mut sink = BufferSink::new();
        let vars = VarStore::from_iter([("units", "F")]);
        let document = DocumentBuffer::new("/t.jst", "<% write(site, units) %>");
        let outcome = jst.render(document, &vars, &mut sink);
        assert!(outcome.is_completed());
        assert_eq!(sink.body_string(), "plant F");
    }

    #[test]
    fn serve_missing_page_is_404() {
        let jst = service();
        let mut sink = BufferSink::new();
        let outcome = jst.serve(&MemorySource::new(), "/gone.jst", &VarStore::new(), &mut sink);
        assert_eq!(outcome.error().map(JstError::status), Some(404));
        assert_eq!(sink.status(), Some(404));
        assert!(sink.is_finished());
        assert_eq!(jst.engines_in_use(), 0);
    }

    #[test]
    fn slot_exhaustion_is_500_without_body() {
        let (config, _) = Config::load_str("/option max_engines=1");
        let jst = Jst::with_config(config);
        let vars = VarStore::new();
        let _held = Engine::open(jst.registry(), &vars, &jst.slots).unwrap();

        let (outcome, sink) = render(&jst, "<p>never</p>");
        assert!(matches!(outcome, RenderOutcome::Aborted(JstError::EngineOpen(_))));
        assert_eq!(sink.status(), Some(500));
        assert!(!sink.body_string().contains("never"));
    }

    #[test]
    fn disconnect_mid_page_aborts_with_write_error() {
        let jst = service();
        let mut sink = BufferSink::with_write_limit(3);
        let document = DocumentBuffer::new("/p.jst", "abcdef<% write(1) %>");
        let outcome = jst.render(document, &VarStore::new(), &mut sink);
        assert!(matches!(outcome, RenderOutcome::Aborted(JstError::Write(_))), "{outcome:?}");
        assert_eq!(sink.body(), b"abc");
        assert_eq!(jst.engines_in_use(), 0);
    }

    #[test]
    fn close_is_idempotent() {
        let mut jst = service();
        jst.close();
        jst.close();
        assert!(jst.registry().is_empty());
    }
}
