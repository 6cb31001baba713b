//! Execution identity and the per-request state machine

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique execution identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub uuid::Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Directory-safe rendering (hex, no dashes)
    pub fn simple(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Phases a request moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Received,
    Classified,
    Allowed,
    Blocked,
    Admitted,
    Rejected,
    WorkspaceCreated,
    Compiling,
    CompileFailed,
    CompileOk,
    Running,
    Completed,
    TimedOut,
    RuntimeError,
    Failed,
    CleanedUp,
}

impl ExecutionPhase {
    /// Whether the request ends in this phase
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionPhase::Blocked | ExecutionPhase::Rejected | ExecutionPhase::CleanedUp
        )
    }

    /// Legal transitions. `Failed` covers internal errors after admission.
    pub fn can_transition_to(self, next: ExecutionPhase) -> bool {
        use ExecutionPhase::*;
        match (self, next) {
            (Received, Classified) => true,
            (Classified, Allowed | Blocked) => true,
            (Allowed, Admitted | Rejected) => true,
            (Admitted, WorkspaceCreated | Failed) => true,
            (WorkspaceCreated, Compiling | Running | Failed) => true,
            (Compiling, CompileFailed | CompileOk | TimedOut | Failed) => true,
            (CompileOk, Running) => true,
            (Running, Completed | TimedOut | RuntimeError | Failed) => true,
            (CompileFailed | Completed | TimedOut | RuntimeError | Failed, CleanedUp) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Tracks the phase of one request and traces every transition
#[derive(Debug)]
pub struct PhaseTracker {
    id: ExecutionId,
    phase: ExecutionPhase,
}

impl PhaseTracker {
    pub fn new(id: ExecutionId) -> Self {
        Self {
            id,
            phase: ExecutionPhase::Received,
        }
    }

    pub fn id(&self) -> ExecutionId {
        self.id
    }

    pub fn phase(&self) -> ExecutionPhase {
        self.phase
    }

    /// Move to `next`. An illegal transition is logged and still applied,
    /// the tracker is observability, not control flow.
    pub fn advance(&mut self, next: ExecutionPhase) {
        if !self.phase.can_transition_to(next) {
            tracing::warn!(
                execution_id = %self.id,
                from = %self.phase,
                to = %next,
                "unexpected phase transition"
            );
        } else {
            tracing::debug!(
                execution_id = %self.id,
                from = %self.phase,
                to = %next,
                "phase transition"
            );
        }
        self.phase = next;
    }
}
