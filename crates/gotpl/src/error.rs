//! Error types for template compilation and rendering.
//!
//! This module provides [`Error`], the single error type returned by every
//! public operation. Errors fall into three families:
//!
//! - syntax errors, raised while compiling a template;
//! - render errors, raised while a compiled template runs;
//! - resolution errors, raised when a template file cannot be read.
//!
//! Render errors produced with the `debug` option carry the failing template
//! line in [`Error::line`] and a source excerpt appended to their message.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// The class of a render-time failure, named after the scripting errors
/// template authors already know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A value thrown by template code with `throw`.
    Error,
    /// An operation on a value of the wrong type, such as calling `undefined`.
    TypeError,
    /// A reference to a name that is not declared anywhere.
    ReferenceError,
    /// A value outside its allowed range, including runaway recursion.
    RangeError,
    /// Malformed input discovered at runtime, such as bad `JSON.parse` input.
    SyntaxError,
}

impl ErrorKind {
    /// The conventional name of this error class.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::SyntaxError => "SyntaxError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error type for all template operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The template's logic could not be parsed.
    #[error("SyntaxError: {message}")]
    Syntax {
        /// Description of the problem, possibly followed by a source excerpt.
        message: String,
        /// Template line where the offending logic span starts.
        line: Option<usize>,
    },

    /// The compiled template failed while rendering.
    #[error("{kind}: {message}")]
    Render {
        /// Error class.
        kind: ErrorKind,
        /// Description of the problem, possibly followed by a source excerpt.
        message: String,
        /// Failing template line; only tracked with the `debug` option.
        line: Option<usize>,
    },

    /// A template file could not be read.
    #[error("failed to read template \"{}\": {source}", path.display())]
    Resolution {
        /// Resolved path of the template.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// Options were invalid or could not be parsed.
    #[error("invalid options: {0}")]
    Options(String),

    /// The data context could not be converted to a template value.
    #[error("failed to serialize template data: {0}")]
    Data(#[from] serde_json::Error),
}

/// Result type for template operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn syntax(message: impl Into<String>, line: usize) -> Self {
        Error::Syntax {
            message: message.into(),
            line: Some(line),
        }
    }

    /// Creates a render error without line information.
    ///
    /// Native functions registered in a [`Scope`](crate::Scope) use this to
    /// report failures to the template.
    pub fn render(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error::Render {
            kind,
            message: message.into(),
            line: None,
        }
    }

    /// The template line the error points at, if known.
    pub fn line(&self) -> Option<usize> {
        match self {
            Error::Syntax { line, .. } | Error::Render { line, .. } => *line,
            _ => None,
        }
    }

    /// Appends a source excerpt to the message and records `line` unless a
    /// line is already known. Other variants are returned unchanged.
    pub(crate) fn with_context(mut self, excerpt: &str, at: usize) -> Self {
        if let Error::Syntax { message, line } | Error::Render { message, line, .. } = &mut self {
            message.push_str("\n\n");
            message.push_str(excerpt);
            message.push('\n');
            line.get_or_insert(at);
        }
        self
    }

    /// The render error class, if this is a render error.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Render { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns `true` for errors raised while compiling.
    pub fn is_syntax(&self) -> bool {
        matches!(self, Error::Syntax { .. })
    }

    /// Returns `true` if a template file could not be read.
    pub fn is_resolution(&self) -> bool {
        matches!(self, Error::Resolution { .. })
    }
}
