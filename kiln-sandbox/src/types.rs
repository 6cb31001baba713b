//! Core types for sandbox execution

use crate::error::{ExecutionFailure, OutcomeKind, Stage};
use crate::execution::ExecutionId;
use crate::history::HistoryEntry;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Language identifier meaning "classify the source for me"
pub const AUTO_LANGUAGE: &str = "auto";

/// Request to execute a source snippet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// The source text to execute
    pub source: String,

    /// Declared language, `None` or `"auto"` for classification
    #[serde(default)]
    pub language: Option<String>,

    /// Optional run-stage timeout override
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl ExecutionRequest {
    /// Create a request whose language is detected from the source
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            language: None,
            timeout: None,
        }
    }

    /// Declare the language explicitly
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Override the run timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The declared language, or `None` when classification is requested
    pub fn declared_language(&self) -> Option<&str> {
        match self.language.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(lang) if lang.eq_ignore_ascii_case(AUTO_LANGUAGE) => None,
            Some(lang) => Some(lang),
        }
    }
}

/// Result of one submission. Every submission resolves to one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Execution identifier (also names the workspace, if one was created)
    pub id: ExecutionId,

    /// Zero exit code and no forced kill
    pub ok: bool,

    /// Combined stdout/stderr, capped, or compiler diagnostics
    pub output: String,

    /// Whether `output` was cut at the cap (a marker is appended too)
    #[serde(default)]
    pub truncated: bool,

    /// Process exit code of the last stage that ran
    pub exit_code: Option<i32>,

    /// Wall-clock duration of the whole submission in milliseconds
    pub duration_ms: u64,

    /// Whether a stage was killed at its deadline
    pub killed: bool,

    /// Resolved language (the requested identifier if it was unknown)
    pub language: Option<String>,

    /// Failure reason, `None` on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ExecutionFailure>,
}

impl ExecutionResult {
    /// Build a result for a submission that ended before any process ran
    pub(crate) fn rejected(
        id: ExecutionId,
        language: Option<String>,
        failure: ExecutionFailure,
        elapsed: Duration,
    ) -> Self {
        Self {
            id,
            ok: false,
            output: failure.to_string(),
            truncated: false,
            exit_code: None,
            duration_ms: elapsed.as_millis() as u64,
            killed: false,
            language,
            failure: Some(failure),
        }
    }

    /// Check if execution succeeded
    pub fn success(&self) -> bool {
        self.ok && self.failure.is_none()
    }

    /// Outcome label used by the history ledger
    pub fn outcome(&self) -> OutcomeKind {
        self.failure
            .as_ref()
            .map(ExecutionFailure::kind)
            .unwrap_or(OutcomeKind::Completed)
    }

    /// Stage that failed, when the failure is tied to one
    pub fn stage(&self) -> Option<Stage> {
        self.failure.as_ref().and_then(ExecutionFailure::stage)
    }
}

/// Engine snapshot returned by `SandboxService::status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Executions admitted and not yet cleaned up
    pub in_flight: usize,

    /// Concurrency budget
    pub capacity: usize,

    /// Entries held by the ledger, and how many it keeps at most
    pub history_len: usize,
    pub history_capacity: usize,

    /// Most recent ledger entries, oldest first
    pub recent_history: Vec<HistoryEntry>,
}
