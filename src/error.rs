//! Compiler diagnostics with fix suggestions
//!
//! Every diagnostic renders as `<file>:1:1: <severity>: <message>` so that
//! editors and CI annotations can jump to the offending workflow file. The
//! line:column is a fixed placeholder; we do not thread YAML positions
//! through the phases.

use thiserror::Error;

/// Severity of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// Which phase of the pipeline produced the diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// YAML/Markdown syntax
    Parse,
    /// Missing file, cycle, URL not permitted in a context
    Import,
    /// Shape, type, bounds, exclusivity
    Validation,
    /// Missing required scope for a declared toolset
    Permission,
    /// Unresolved download, path not covered by redaction
    Artifact,
    /// Duplicate job, missing dep, cycle, duplicate step within job
    Graph,
    /// YAML marshal failure
    Emit,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Parse => write!(f, "parse"),
            Category::Import => write!(f, "import"),
            Category::Validation => write!(f, "validation"),
            Category::Permission => write!(f, "permission"),
            Category::Artifact => write!(f, "artifact"),
            Category::Graph => write!(f, "graph"),
            Category::Emit => write!(f, "emit"),
        }
    }
}

/// Warnings that strict mode escalates to errors.
///
/// The upgradeable set is fixed; anything not listed here stays a warning
/// under `--strict`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningCode {
    FirewallDisabledWithAllowlist,
    PermissionMissing,
    DeprecatedOption,
}

/// A single compiler diagnostic
#[derive(Debug, Error)]
#[error("{path}:1:1: {severity}: {message}")]
pub struct CompilerError {
    pub path: String,
    pub severity: Severity,
    pub category: Category,
    pub message: String,
    /// Strict-mode escalation marker (warnings only)
    pub code: Option<WarningCode>,
    /// How to fix it, shown under the diagnostic in CLI output
    pub suggestion: Option<String>,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

pub type Result<T> = std::result::Result<T, CompilerError>;

impl CompilerError {
    pub fn new(category: Category, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            severity: Severity::Error,
            category,
            message: message.into(),
            code: None,
            suggestion: None,
            cause: None,
        }
    }

    pub fn parse(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Category::Parse, path, message)
    }

    pub fn import(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Category::Import, path, message)
    }

    pub fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Category::Validation, path, message)
    }

    pub fn permission(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Category::Permission, path, message)
    }

    pub fn artifact(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Category::Artifact, path, message)
    }

    pub fn graph(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Category::Graph, path, message)
    }

    pub fn emit(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Category::Emit, path, message)
    }

    pub fn warning(
        category: Category,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut err = Self::new(category, path, message);
        err.severity = Severity::Warning;
        err
    }

    pub fn with_code(mut self, code: WarningCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Upgrade this diagnostic to an error if strict mode covers its code.
    pub fn escalate_for_strict(&mut self) {
        if self.severity == Severity::Warning && self.code.is_some() {
            self.severity = Severity::Error;
        }
    }

    pub fn fix_suggestion(&self) -> Option<&str> {
        self.suggestion.as_deref()
    }
}

/// Accumulated diagnostics for a phase that reports everything at once
/// (permission inference, event-filter validation, artifact validation).
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub items: Vec<CompilerError>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: CompilerError) {
        self.items.push(err);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|e| e.is_error())
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Apply strict-mode escalation to every upgradeable warning.
    pub fn escalate_for_strict(&mut self) {
        for item in &mut self.items {
            item.escalate_for_strict();
        }
    }

    /// First error, consuming the list. Phases that abort on accumulated
    /// diagnostics hand the whole list to the CLI and return the first.
    pub fn into_first_error(self) -> Option<CompilerError> {
        self.items.into_iter().find(|e| e.is_error())
    }
}
