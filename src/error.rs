// ActionVM Error Handling Module
// Host-facing errors (loading, configuration) and the in-band diagnostics
// the interpreter logs while it keeps running

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned to the embedding host.
#[derive(Debug, Error)]
pub enum AvmError {
    #[error("cannot read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("action buffer truncated at offset {offset}: needed {needed} bytes, {available} available")]
    TruncatedBuffer {
        offset: usize,
        needed: usize,
        available: usize,
    },
}

pub type AvmResult<T> = Result<T, AvmError>;

/// Kinds of problems the interpreter tolerates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    MalformedBytecode,
    MissingBinding,
    Unimplemented,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::MalformedBytecode => write!(f, "MalformedBytecode"),
            DiagnosticKind::MissingBinding => write!(f, "MissingBinding"),
            DiagnosticKind::Unimplemented => write!(f, "Unimplemented"),
        }
    }
}

/// A logged, non-fatal problem found while executing actions.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub pc: Option<usize>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            pc: None,
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::MalformedBytecode, message)
    }

    pub fn missing(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::MissingBinding, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Unimplemented, message)
    }

    pub fn at(mut self, pc: usize) -> Self {
        self.pc = Some(pc);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pc {
            Some(pc) => write!(f, "{}: {} (pc {})", self.kind, self.message, pc),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}
