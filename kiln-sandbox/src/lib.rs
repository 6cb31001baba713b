//! Kiln sandbox - on-demand execution of untrusted source snippets
//!
//! A submission flows through language resolution, policy screening,
//! admission control and a per-execution workspace, then one or two
//! process stages (compile, run). Every submission resolves to an
//! [`ExecutionResult`] and is recorded in a bounded history ledger.
//!
//! ```no_run
//! use kiln_sandbox::{ExecutionRequest, SandboxConfig, SandboxService};
//!
//! # async fn demo() -> Result<(), kiln_sandbox::ServiceError> {
//! let sandbox = SandboxService::new(SandboxConfig::default())?;
//! let result = sandbox
//!     .submit(ExecutionRequest::new("print(6 * 7)").with_language("python"))
//!     .await;
//! println!("{}", result.output);
//! # Ok(())
//! # }
//! ```

mod admission;
mod classifier;
mod config;
mod error;
mod execution;
mod history;
mod language;
mod limits;
mod pipeline;
mod policy;
mod runtime;
mod service;
mod types;
mod workspace;

pub use admission::{
    AdmissionController, AdmissionPermit, AdmissionRejection, FixedProbe, HostProbe, HostSnapshot,
    SysinfoProbe,
};
pub use classifier::LanguageClassifier;
pub use config::{
    AdmissionConfig, HistoryConfig, PolicyConfig, ProcessConfig, SandboxConfig, WorkspaceConfig,
};
pub use error::{ConfigError, ExecutionFailure, OutcomeKind, ServiceError, Stage};
pub use execution::{ExecutionId, ExecutionPhase, PhaseTracker};
pub use history::{HistoryEntry, HistoryLedger};
pub use language::{lookup as lookup_language, profiles, CommandTemplate, LanguageInfo, LanguageProfile};
pub use limits::ExecutionLimits;
pub use policy::{PolicyBlock, PolicyCategory, PolicyEngine, PolicyVerdict, RULESET_VERSION};
pub use runtime::{
    ProcessOutput, ProcessRunner, ProcessSpec, Runner, RunnerError, TRUNCATION_MARKER,
};
pub use service::SandboxService;
pub use types::{EngineStatus, ExecutionRequest, ExecutionResult, AUTO_LANGUAGE};
pub use workspace::{Workspace, WorkspaceManager};
