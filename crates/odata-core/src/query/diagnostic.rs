//! Non-fatal findings recorded while planning and projecting.

use serde::Serialize;
use std::fmt;

/// What went wrong with part of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// An expansion was nested deeper than the configured limit.
    DepthExceeded,
    /// A selected field, ordering key or expanded relation does not exist.
    UnknownField,
    /// An expansion would re-enter a relation already on its path.
    CycleDetected,
    /// A computed field could not be evaluated.
    ComputedFieldFailed,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::DepthExceeded => "depth_exceeded",
            DiagnosticKind::UnknownField => "unknown_field",
            DiagnosticKind::CycleDetected => "cycle_detected",
            DiagnosticKind::ComputedFieldFailed => "computed_field_failed",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dropped part of the request, reported to the caller as a warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Relation path from the root, `/`-separated, ending in the offending
    /// name.
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.path, self.message)
    }
}

/// Join a relation path and a trailing name into a diagnostic path.
pub(crate) fn join_path<S: AsRef<str>>(prefix: &[S], name: &str) -> String {
    let mut path = String::new();
    for segment in prefix {
        path.push_str(segment.as_ref());
        path.push('/');
    }
    path.push_str(name);
    path
}
