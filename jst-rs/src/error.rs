//! Error taxonomy for page rendering.
//!
//! Fatal failures are [`JstError`]s.  A fragment that runs and reports
//! failure is not fatal to the response; it is a [`ScriptFailure`] and ends
//! the page with a diagnostic block instead.

use std::io;

use thiserror::Error;

pub const HTTP_NOT_FOUND: u16 = 404;
pub const HTTP_INTERNAL_SERVER_ERROR: u16 = 500;

/// A failure that aborts the render.
#[derive(Debug, Error)]
pub enum JstError {
    /// No evaluator instance could be created.
    #[error("cannot create script engine: {0}")]
    EngineOpen(String),

    /// The document could not be stat'ed, opened or read.
    #[error("cannot {op} {path}: {source}")]
    DocumentIo {
        op: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },

    /// The document buffer could not be obtained.
    #[error("cannot get memory for {size} byte document")]
    Allocation { size: u64 },

    /// An open marker has no matching close marker.
    #[error("unterminated script in {path} at byte {offset}")]
    Malformed { path: String, offset: usize },

    /// The response sink refused body bytes mid-stream.
    #[error("response write failed: {0}")]
    Write(#[source] io::Error),
}

impl JstError {
    /// HTTP status code this failure is reported with.
    pub fn status(&self) -> u16 {
        match self {
            JstError::DocumentIo { source, .. } if source.kind() == io::ErrorKind::NotFound => {
                HTTP_NOT_FOUND
            }
            _ => HTTP_INTERNAL_SERVER_ERROR,
        }
    }
}

/// A fragment that was executed and reported failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFailure {
    /// Evaluator-supplied message, if it produced one.
    pub diagnostic: Option<String>,
    /// The fragment text as it was submitted.
    pub fragment: String,
}

impl ScriptFailure {
    /// Best available description: the diagnostic, or else the fragment.
    pub fn message(&self) -> &str {
        self.diagnostic.as_deref().unwrap_or(&self.fragment)
    }
}

impl std::fmt::Display for ScriptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "script error: {}", self.message())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err = JstError::DocumentIo {
            op: "stat",
            path: "/missing.jst".into(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        };
        assert_eq!(err.status(), 404);
        assert_eq!(err.to_string(), "cannot stat /missing.jst: no such file");
    }

    #[test]
    fn other_failures_map_to_500() {
        let denied = JstError::DocumentIo {
            op: "open",
            path: "/secret.jst".into(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(denied.status(), 500);
        assert_eq!(JstError::EngineOpen("all slots busy".into()).status(), 500);
        assert_eq!(JstError::Allocation { size: 10 }.status(), 500);
    }

    #[test]
    fn script_failure_falls_back_to_fragment() {
        let f = ScriptFailure { diagnostic: None, fragment: "explode()".into() };
        assert_eq!(f.message(), "explode()");
        let f = ScriptFailure { diagnostic: Some("boom".into()), fragment: "fail()".into() };
        assert_eq!(f.to_string(), "script error: boom");
    }
}
