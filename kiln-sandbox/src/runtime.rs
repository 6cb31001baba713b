//! Process runner abstraction

mod process;

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub use process::ProcessRunner;

/// Appended to output that hit the cap
pub const TRUNCATION_MARKER: &str = "\n[truncated]";

/// One process invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Bare name resolved against the search path, or an absolute path
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub timeout: Duration,
    /// Bytes of combined stdout/stderr kept
    pub output_cap: usize,
    pub niceness: Option<i32>,
}

/// What a finished (or killed) process left behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Combined stdout/stderr, lossily decoded and trimmed
    pub output: String,
    pub truncated: bool,
    /// `None` when the process died from a signal
    pub exit_code: Option<i32>,
    /// Killed at the deadline
    pub killed: bool,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.killed && self.exit_code == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("program not found on search path: {0}")]
    NotFound(String),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),
}

/// Executes one process to completion or deadline
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, spec: ProcessSpec) -> Result<ProcessOutput, RunnerError>;

    /// Runner name, for logs
    fn name(&self) -> &str;
}
