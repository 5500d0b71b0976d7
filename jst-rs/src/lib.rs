//! Inline-script page templates.
//!
//! A page is ordinary markup with script fragments between `<%` and `%>`.
//! Rendering copies the markup to the response and runs each fragment in a
//! per-request script engine whose function calls go to natives registered
//! on the [`Jst`] service.
//!
//! ```rust
//! use jst::{BufferSink, Jst, MemorySource, VarStore};
//!
//! let jst = Jst::new();
//! let mut pages = MemorySource::new();
//! pages.insert("/hello.jst", r#"<p><% write("Hello,", who) %></p>"#);
//!
//! let vars = VarStore::from_iter([("who", "world")]);
//! let mut sink = BufferSink::new();
//! let outcome = jst.serve(&pages, "/hello.jst", &vars, &mut sink);
//!
//! assert!(outcome.is_completed());
//! assert_eq!(sink.body_string(), "<p>Hello, world</p>");
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod registry;
pub mod render;
pub mod scan;
pub mod script;
pub mod sink;
pub mod source;
pub mod var;

pub use bridge::{Engine, EngineSlots, Evaluation, ScriptEngine};
pub use config::{Config, ConfigError, Options};
pub use error::{JstError, ScriptFailure};
pub use registry::{FunctionRegistry, NativeContext, NativeFunction};
pub use render::{Jst, RenderOutcome};
pub use scan::{DirectiveSpan, Scanner};
pub use sink::{BufferSink, ResponseSink};
pub use source::{DocumentBuffer, DocumentSource, FsSource, MemorySource};
pub use var::VarStore;
