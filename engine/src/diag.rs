// diag.rs — Unified diagnostics model and error taxonomy
//
// Provides the shared diagnostic types used across all engine phases, plus
// the typed error enum surfaced by phase entry points. There is no source
// text, so diagnostics carry a *subject* path (`actor.port`) instead of a
// span.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::model::TokenType;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0300`, `W0200`).
///
/// Codes are `&'static str` constants defined in the `codes` module. Once
/// assigned, a code must never be reassigned to a different semantic
/// meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    /// Port declared both input and output (or neither).
    pub const E0100: DiagCode = DiagCode("E0100");
    /// Port rate is zero or negative.
    pub const E0101: DiagCode = DiagCode("E0101");
    /// Second relation linked to a non-multiport port.
    pub const E0102: DiagCode = DiagCode("E0102");
    /// Duplicate port name on one actor.
    pub const E0103: DiagCode = DiagCode("E0103");
    /// Actor kind not present in the registry.
    pub const E0104: DiagCode = DiagCode("E0104");
    /// Boundary pass-through could not be resolved.
    pub const E0200: DiagCode = DiagCode("E0200");
    /// Balance equations have no positive integer solution.
    pub const E0300: DiagCode = DiagCode("E0300");
    /// No static firing order exists.
    pub const E0301: DiagCode = DiagCode("E0301");
    /// No marshalling entry registered for a port type.
    pub const E0400: DiagCode = DiagCode("E0400");
    /// Stage certificate obligation failed.
    pub const E0500: DiagCode = DiagCode("E0500");
    /// Multiple writers feed one input channel (fan-in).
    pub const W0200: DiagCode = DiagCode("W0200");
    /// Error during best-effort wrapup (demoted, never re-raised).
    pub const W0500: DiagCode = DiagCode("W0500");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Cause record ─────────────────────────────────────────────────────────

/// One link in a cause chain explaining a propagated failure.
#[derive(Debug, Clone)]
pub struct CauseRecord {
    pub message: String,
    pub subject: Option<String>,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by any engine phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    /// Path of the model element this diagnostic is about (`actor.port`).
    pub subject: Option<String>,
    pub message: String,
    pub hint: Option<String>,
    pub cause_chain: Vec<CauseRecord>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, subject, hint, or causes.
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            subject: None,
            message: message.into(),
            hint: None,
            cause_chain: Vec::new(),
        }
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach the model element path the diagnostic refers to.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a cause record to the chain.
    pub fn with_cause(mut self, message: impl Into<String>, subject: Option<String>) -> Self {
        self.cause_chain.push(CauseRecord {
            message: message.into(),
            subject,
        });
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(subject) = &self.subject {
            write!(f, "\n  at: {}", subject)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

// ── Error taxonomy ───────────────────────────────────────────────────────

/// Typed errors surfaced by phase entry points. All variants name the
/// offending model element; no partial artifact is returned alongside one.
#[derive(Debug, Clone, PartialEq)]
pub enum SdfError {
    /// A port is declared both input and output, or neither.
    PortDirectionConflict { actor: String, port: String },
    /// A declared token rate is zero or negative.
    RateConfigurationError { actor: String, port: String, rate: i64 },
    /// An inside/outside boundary pass-through cannot be resolved.
    UnresolvedPortError { subject: String, detail: String },
    /// The balance equations have no positive integer solution.
    InconsistentRateError { relation: String, detail: String },
    /// No static firing order satisfies the data dependencies.
    SchedulingDeadlockError { actors: Vec<String> },
    /// No marshalling entry is registered for a resolved port type.
    UnsupportedTypeError {
        actor: String,
        port: String,
        ty: TokenType,
    },
    /// An actor references a kind absent from the registry.
    UnknownActorKind { actor: String, kind: String },
    /// Two ports on one actor share a name.
    DuplicatePort { actor: String, port: String },
    /// A second relation was linked to a non-multiport port.
    PortWidthConflict { actor: String, port: String },
}

impl SdfError {
    pub fn code(&self) -> DiagCode {
        match self {
            SdfError::PortDirectionConflict { .. } => codes::E0100,
            SdfError::RateConfigurationError { .. } => codes::E0101,
            SdfError::PortWidthConflict { .. } => codes::E0102,
            SdfError::DuplicatePort { .. } => codes::E0103,
            SdfError::UnknownActorKind { .. } => codes::E0104,
            SdfError::UnresolvedPortError { .. } => codes::E0200,
            SdfError::InconsistentRateError { .. } => codes::E0300,
            SdfError::SchedulingDeadlockError { .. } => codes::E0301,
            SdfError::UnsupportedTypeError { .. } => codes::E0400,
        }
    }

    /// Render this error as an error-level diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let d = Diagnostic::new(DiagLevel::Error, self.to_string()).with_code(self.code());
        match self {
            SdfError::PortDirectionConflict { actor, port }
            | SdfError::RateConfigurationError { actor, port, .. }
            | SdfError::DuplicatePort { actor, port }
            | SdfError::PortWidthConflict { actor, port }
            | SdfError::UnsupportedTypeError { actor, port, .. } => {
                d.with_subject(format!("{actor}.{port}"))
            }
            SdfError::UnresolvedPortError { subject, .. } => d.with_subject(subject.clone()),
            SdfError::InconsistentRateError { relation, .. } => d.with_subject(relation.clone()),
            SdfError::UnknownActorKind { actor, .. } => d.with_subject(actor.clone()),
            SdfError::SchedulingDeadlockError { actors } => match actors.first() {
                Some(a) => d.with_subject(a.clone()),
                None => d,
            },
        }
    }
}

impl fmt::Display for SdfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdfError::PortDirectionConflict { actor, port } => {
                write!(
                    f,
                    "port '{}' of actor '{}' must be exactly one of input or output",
                    port, actor
                )
            }
            SdfError::RateConfigurationError { actor, port, rate } => {
                write!(
                    f,
                    "port '{}' of actor '{}' declares rate {}; rates must be positive",
                    port, actor, rate
                )
            }
            SdfError::UnresolvedPortError { subject, detail } => {
                write!(f, "cannot resolve boundary port '{}': {}", subject, detail)
            }
            SdfError::InconsistentRateError { relation, detail } => {
                write!(
                    f,
                    "balance equations unsolvable at relation '{}': {}",
                    relation, detail
                )
            }
            SdfError::SchedulingDeadlockError { actors } => {
                write!(
                    f,
                    "no static firing order exists; {} actor(s) stuck in a dependency cycle: {}",
                    actors.len(),
                    actors.join(", ")
                )
            }
            SdfError::UnsupportedTypeError { actor, port, ty } => {
                write!(
                    f,
                    "no marshalling entry registered for type '{}' on port '{}' of actor '{}'",
                    ty, port, actor
                )
            }
            SdfError::UnknownActorKind { actor, kind } => {
                write!(f, "actor '{}' references unknown kind '{}'", actor, kind)
            }
            SdfError::DuplicatePort { actor, port } => {
                write!(f, "actor '{}' declares port '{}' more than once", actor, port)
            }
            SdfError::PortWidthConflict { actor, port } => {
                write!(
                    f,
                    "port '{}' of actor '{}' is not a multiport; it admits exactly one relation",
                    port, actor
                )
            }
        }
    }
}

impl std::error::Error for SdfError {}
