//! Compile-then-run orchestration inside a workspace

use crate::error::{ExecutionFailure, Stage};
use crate::execution::{ExecutionPhase, PhaseTracker};
use crate::language::LanguageProfile;
use crate::limits::ExecutionLimits;
use crate::runtime::{ProcessOutput, ProcessSpec, Runner};
use crate::workspace::Workspace;
use std::time::Duration;

/// Result of the process stages, before it is folded into an
/// `ExecutionResult`
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PipelineOutcome {
    pub output: String,
    pub truncated: bool,
    pub exit_code: Option<i32>,
    pub killed: bool,
    pub failure: Option<ExecutionFailure>,
}

impl PipelineOutcome {
    fn from_process(out: ProcessOutput, failure: Option<ExecutionFailure>) -> Self {
        Self {
            output: out.output,
            truncated: out.truncated,
            exit_code: out.exit_code,
            killed: out.killed,
            failure,
        }
    }

    fn internal(stage: Stage, message: String) -> Self {
        Self {
            output: String::new(),
            truncated: false,
            exit_code: None,
            killed: false,
            failure: Some(ExecutionFailure::internal(Some(stage), message)),
        }
    }
}

pub(crate) struct Pipeline<'a> {
    pub runner: &'a dyn Runner,
    pub limits: &'a ExecutionLimits,
    pub niceness: Option<i32>,
}

impl Pipeline<'_> {
    /// Run the compile stage (if any) and then the run stage. The run
    /// stage never starts unless compilation succeeded.
    pub async fn execute(
        &self,
        tracker: &mut PhaseTracker,
        profile: &LanguageProfile,
        workspace: &Workspace,
        requested_timeout: Option<Duration>,
    ) -> PipelineOutcome {
        if let Some(compile) = profile.compile {
            tracker.advance(ExecutionPhase::Compiling);
            let timeout = self.limits.timeout_for(profile, Stage::Compile, None);
            let (program, args) = compile.render(workspace.source_path(), workspace.artifact_path());

            let out = match self.spawn(workspace, program, args, timeout, None).await {
                Ok(out) => out,
                Err(message) => {
                    tracker.advance(ExecutionPhase::Failed);
                    return PipelineOutcome::internal(Stage::Compile, message);
                }
            };

            if out.killed {
                tracker.advance(ExecutionPhase::TimedOut);
                let failure = timeout_failure(Stage::Compile, timeout);
                return PipelineOutcome::from_process(out, Some(failure));
            }
            if out.exit_code != Some(0) {
                tracker.advance(ExecutionPhase::CompileFailed);
                let failure = ExecutionFailure::CompileFailure {
                    exit_code: out.exit_code,
                };
                return PipelineOutcome::from_process(out, Some(failure));
            }
            if !workspace.artifact_path().is_file() {
                tracker.advance(ExecutionPhase::Failed);
                return PipelineOutcome::internal(
                    Stage::Compile,
                    "compiler exited cleanly but produced no artifact".to_string(),
                );
            }
            tracker.advance(ExecutionPhase::CompileOk);
        }

        tracker.advance(ExecutionPhase::Running);
        let timeout = self
            .limits
            .timeout_for(profile, Stage::Run, requested_timeout);
        let (program, args) = profile
            .run
            .render(workspace.source_path(), workspace.artifact_path());

        let out = match self
            .spawn(workspace, program, args, timeout, self.niceness)
            .await
        {
            Ok(out) => out,
            Err(message) => {
                tracker.advance(ExecutionPhase::Failed);
                return PipelineOutcome::internal(Stage::Run, message);
            }
        };

        let failure = if out.killed {
            tracker.advance(ExecutionPhase::TimedOut);
            Some(timeout_failure(Stage::Run, timeout))
        } else if out.exit_code != Some(0) {
            tracker.advance(ExecutionPhase::RuntimeError);
            Some(ExecutionFailure::RuntimeFailure {
                exit_code: out.exit_code,
            })
        } else {
            tracker.advance(ExecutionPhase::Completed);
            None
        };
        PipelineOutcome::from_process(out, failure)
    }

    async fn spawn(
        &self,
        workspace: &Workspace,
        program: String,
        args: Vec<String>,
        timeout: Duration,
        niceness: Option<i32>,
    ) -> Result<ProcessOutput, String> {
        let spec = ProcessSpec {
            program,
            args,
            cwd: workspace.dir().to_path_buf(),
            timeout,
            output_cap: self.limits.output_cap_bytes,
            niceness,
        };
        self.runner.run(spec).await.map_err(|e| {
            tracing::error!(runner = self.runner.name(), error = %e, "Process stage failed");
            e.to_string()
        })
    }
}

fn timeout_failure(stage: Stage, timeout: Duration) -> ExecutionFailure {
    ExecutionFailure::Timeout {
        stage,
        timeout_ms: timeout.as_millis() as u64,
    }
}
