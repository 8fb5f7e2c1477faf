//! Structured error types shared across vex crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`VexError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (variable names, arguments, paths).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for the vex engine.
///
/// `AlreadyCompleted` is a control-flow signal rather than a failure: a
/// before-hook raises it to short-circuit a run whose output already exists,
/// and the runner converts it into a skipped outcome at the hook boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum VexError {
    /// The referenced variable name was never registered.
    #[error("variable not registered: {0}")]
    NotRegistered(ErrorInfo),
    /// The variable is registered but carries no assignment.
    #[error("variable value not set: {0}")]
    ValueNotSet(ErrorInfo),
    /// A choice argument matched none of the registered patterns.
    #[error("argument mismatch: {0}")]
    ArgumentMismatch(ErrorInfo),
    /// A value assignment had the wrong primitive type.
    #[error("type mismatch: {0}")]
    TypeMismatch(ErrorInfo),
    /// The same variable class was registered twice into one engine.
    #[error("duplicate registration: {0}")]
    DuplicateRegistration(ErrorInfo),
    /// A declared prerequisite variable could not be resolved.
    #[error("missing requirement: {0}")]
    MissingRequirement(ErrorInfo),
    /// The value store was mutated while a run held it read-only.
    #[error("store locked: {0}")]
    StoreLocked(ErrorInfo),
    /// Before-hook signal: the run's output already exists.
    #[error("already completed: {0}")]
    AlreadyCompleted(ErrorInfo),
    /// A before- or after-hook failed.
    #[error("hook error: {0}")]
    Hook(ErrorInfo),
    /// Serialization and schema errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
    /// Filesystem and subprocess errors.
    #[error("io error: {0}")]
    Io(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl VexError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            VexError::NotRegistered(info)
            | VexError::ValueNotSet(info)
            | VexError::ArgumentMismatch(info)
            | VexError::TypeMismatch(info)
            | VexError::DuplicateRegistration(info)
            | VexError::MissingRequirement(info)
            | VexError::StoreLocked(info)
            | VexError::AlreadyCompleted(info)
            | VexError::Hook(info)
            | VexError::Serde(info)
            | VexError::Io(info) => info,
        }
    }

    /// True when the error is the already-completed short-circuit signal.
    pub fn is_already_completed(&self) -> bool {
        matches!(self, VexError::AlreadyCompleted(_))
    }
}
