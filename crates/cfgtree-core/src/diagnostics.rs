//! Content diagnostics produced while parsing, building and validating

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::Location;

/// Severity of a diagnostic, ordered from least (`Help`) to most severe.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum Severity {
    Help,
    Note,
    Warning,
    Error,
}

impl Severity {
    pub fn is_error(self) -> bool {
        self == Severity::Error
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Help => write!(f, "help"),
            Severity::Note => write!(f, "note"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// What a diagnostic is about.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum DiagnosticKind {
    ParseError,
    DuplicateClass,
    DuplicateProperty,
    Cycle,
    UnresolvedParent,
    MissingProperty,
    Directive,
    SkippedFile,
    MergeConflict,
}

impl DiagnosticKind {
    /// Short kebab-case code shown in rendered diagnostics.
    pub fn code(self) -> &'static str {
        match self {
            DiagnosticKind::ParseError => "parse-error",
            DiagnosticKind::DuplicateClass => "duplicate-class",
            DiagnosticKind::DuplicateProperty => "duplicate-property",
            DiagnosticKind::Cycle => "cycle",
            DiagnosticKind::UnresolvedParent => "unresolved-parent",
            DiagnosticKind::MissingProperty => "missing-property",
            DiagnosticKind::Directive => "directive",
            DiagnosticKind::SkippedFile => "skipped-file",
            DiagnosticKind::MergeConflict => "merge-conflict",
        }
    }
}

/// A content problem found in a source. Never fatal to a scan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    /// Class the diagnostic is about, when there is one.
    pub class_name: Option<String>,
    pub location: Option<Location>,
    /// Other places involved (earlier duplicate, other cycle members).
    pub related: Vec<Location>,
    /// Candidate fixes, e.g. similarly named classes.
    pub suggestions: Vec<String>,
}

impl Diagnostic {
    pub fn new(severity: Severity, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            class_name: None,
            location: None,
            related: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn error(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, kind, message)
    }

    pub fn warning(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, kind, message)
    }

    pub fn note(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self::new(Severity::Note, kind, message)
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_class(mut self, name: impl Into<String>) -> Self {
        self.class_name = Some(name.into());
        self
    }

    pub fn with_related(mut self, location: Location) -> Self {
        self.related.push(location);
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity.is_error()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.severity, self.kind.code(), self.message)?;
        if let Some(location) = &self.location {
            write!(f, " at {location}")?;
        }
        if !self.suggestions.is_empty() {
            write!(f, " (did you mean: {}?)", self.suggestions.join(", "))?;
        }
        Ok(())
    }
}
