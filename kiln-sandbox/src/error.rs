//! Error types for the execution engine

use crate::admission::AdmissionRejection;
use crate::policy::PolicyCategory;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage a failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Compile,
    Run,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Compile => write!(f, "compile"),
            Stage::Run => write!(f, "run"),
        }
    }
}

/// Terminal failure of a submission. Returned inside `ExecutionResult`,
/// never raised to the caller.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExecutionFailure {
    /// Empty source or source above the size limit
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// An unsupported language identifier was requested explicitly
    #[error("unknown language: {requested}")]
    UnknownLanguage { requested: String },

    /// Blocked by the policy engine before anything was spawned
    #[error("blocked by policy: {category}")]
    PolicyViolation { category: PolicyCategory },

    /// Admission controller refused the request
    #[error("admission rejected: {rejection}")]
    AdmissionRejected { rejection: AdmissionRejection },

    /// Compiler exited non-zero; diagnostics are in the result output
    #[error("compilation failed")]
    CompileFailure { exit_code: Option<i32> },

    /// Program exited non-zero
    #[error("program exited with code {exit_code:?}")]
    RuntimeFailure { exit_code: Option<i32> },

    /// A stage was killed at its deadline
    #[error("{stage} stage timed out after {timeout_ms}ms")]
    Timeout { stage: Stage, timeout_ms: u64 },

    /// Spawn or filesystem failure inside the engine
    #[error("internal error: {message}")]
    InternalError {
        stage: Option<Stage>,
        message: String,
    },
}

impl ExecutionFailure {
    pub(crate) fn internal(stage: Option<Stage>, message: impl Into<String>) -> Self {
        ExecutionFailure::InternalError {
            stage,
            message: message.into(),
        }
    }

    /// Outcome label for this failure
    pub fn kind(&self) -> OutcomeKind {
        match self {
            ExecutionFailure::InvalidRequest { .. } => OutcomeKind::InvalidRequest,
            ExecutionFailure::UnknownLanguage { .. } => OutcomeKind::UnknownLanguage,
            ExecutionFailure::PolicyViolation { .. } => OutcomeKind::PolicyViolation,
            ExecutionFailure::AdmissionRejected { .. } => OutcomeKind::AdmissionRejected,
            ExecutionFailure::CompileFailure { .. } => OutcomeKind::CompileFailure,
            ExecutionFailure::RuntimeFailure { .. } => OutcomeKind::RuntimeFailure,
            ExecutionFailure::Timeout { .. } => OutcomeKind::Timeout,
            ExecutionFailure::InternalError { .. } => OutcomeKind::InternalError,
        }
    }

    /// Stage the failure happened in, if any process stage was involved
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ExecutionFailure::CompileFailure { .. } => Some(Stage::Compile),
            ExecutionFailure::RuntimeFailure { .. } => Some(Stage::Run),
            ExecutionFailure::Timeout { stage, .. } => Some(*stage),
            ExecutionFailure::InternalError { stage, .. } => *stage,
            _ => None,
        }
    }
}

/// Flat outcome label, recorded in the history ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Completed,
    InvalidRequest,
    UnknownLanguage,
    PolicyViolation,
    AdmissionRejected,
    CompileFailure,
    RuntimeFailure,
    Timeout,
    InternalError,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OutcomeKind::Completed => "completed",
            OutcomeKind::InvalidRequest => "invalid_request",
            OutcomeKind::UnknownLanguage => "unknown_language",
            OutcomeKind::PolicyViolation => "policy_violation",
            OutcomeKind::AdmissionRejected => "admission_rejected",
            OutcomeKind::CompileFailure => "compile_failure",
            OutcomeKind::RuntimeFailure => "runtime_failure",
            OutcomeKind::Timeout => "timeout",
            OutcomeKind::InternalError => "internal_error",
        };
        f.write_str(label)
    }
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Errors while constructing an engine instance
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to prepare workspace root {path}: {source}")]
    WorkspaceRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid pattern for {name}: {source}")]
    Pattern {
        name: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("Unknown default language: {0}")]
    DefaultLanguage(String),
}
