//! Sandbox service - main entry point
//!
//! One `SandboxService` is one engine: its own slots, history and
//! workspace root. Nothing is process-global, so several engines can live
//! side by side.

use crate::admission::{AdmissionController, HostProbe, SysinfoProbe};
use crate::classifier::LanguageClassifier;
use crate::config::SandboxConfig;
use crate::error::{ExecutionFailure, ServiceError};
use crate::execution::{ExecutionId, ExecutionPhase, PhaseTracker};
use crate::history::{HistoryEntry, HistoryLedger};
use crate::language::{self, LanguageInfo, LanguageProfile};
use crate::pipeline::Pipeline;
use crate::policy::{PolicyEngine, PolicyVerdict};
use crate::runtime::{ProcessRunner, Runner};
use crate::types::{EngineStatus, ExecutionRequest, ExecutionResult};
use crate::workspace::WorkspaceManager;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::Instrument;

/// Execution engine instance
#[derive(Clone)]
pub struct SandboxService {
    engine: Arc<Engine>,
}

struct Engine {
    config: SandboxConfig,
    classifier: LanguageClassifier,
    policy: PolicyEngine,
    admission: AdmissionController,
    workspaces: WorkspaceManager,
    runner: Arc<dyn Runner>,
    history: RwLock<HistoryLedger>,
}

impl SandboxService {
    /// Engine spawning real processes and probing the real host
    pub fn new(config: SandboxConfig) -> Result<Self, ServiceError> {
        let runner = Arc::new(ProcessRunner::new(&config.process));
        Self::with_components(config, runner, Arc::new(SysinfoProbe::new()))
    }

    /// Engine with an injected runner and host probe
    pub fn with_components(
        config: SandboxConfig,
        runner: Arc<dyn Runner>,
        probe: Arc<dyn HostProbe>,
    ) -> Result<Self, ServiceError> {
        config.validate()?;

        let default = language::lookup(&config.default_language)
            .ok_or_else(|| ServiceError::DefaultLanguage(config.default_language.clone()))?;
        let classifier = LanguageClassifier::new(default)?;
        let policy = PolicyEngine::new(config.policy.home.clone())?;
        let admission = AdmissionController::new(&config.admission, probe);
        let workspaces = WorkspaceManager::new(&config.workspace)?;

        tracing::info!(
            capacity = admission.capacity(),
            default_language = classifier.default_profile().id,
            ruleset = policy.version(),
            rules = policy.rule_count(),
            home = ?policy.home(),
            runner = runner.name(),
            workspace_root = %workspaces.root().display(),
            workspace_dir = %workspaces.dir().display(),
            "Sandbox engine ready"
        );

        Ok(Self {
            engine: Arc::new(Engine {
                history: RwLock::new(HistoryLedger::new(config.history.capacity)),
                config,
                classifier,
                policy,
                admission,
                workspaces,
                runner,
            }),
        })
    }

    /// Submit one snippet. Always resolves to a result; failures are
    /// carried inside it.
    pub async fn submit(&self, request: ExecutionRequest) -> ExecutionResult {
        let id = ExecutionId::new();
        let submitted_at = Utc::now();
        let span = tracing::info_span!("execution", execution_id = %id);
        let result = Arc::clone(&self.engine)
            .process(id, request)
            .instrument(span)
            .await;

        self.engine
            .history
            .write()
            .await
            .record(HistoryEntry::from_result(&result, submitted_at));
        result
    }

    pub async fn status(&self) -> EngineStatus {
        let history = self.engine.history.read().await;
        EngineStatus {
            in_flight: self.engine.admission.in_flight(),
            capacity: self.engine.admission.capacity(),
            history_len: history.len(),
            history_capacity: history.capacity(),
            recent_history: history.recent(self.engine.config.history.status_window),
        }
    }

    /// Full ledger, oldest first
    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.engine.history.read().await.entries()
    }

    pub fn languages(&self) -> Vec<LanguageInfo> {
        language::profiles().iter().map(LanguageProfile::info).collect()
    }

    /// Language the classifier would pick for `source`
    pub fn detect(&self, source: &str) -> &'static LanguageProfile {
        self.engine.classifier.classify(source)
    }

    /// Check a snippet without executing it: request validation, language
    /// resolution and policy, nothing else.
    pub fn validate(
        &self,
        source: &str,
        language: Option<&str>,
    ) -> Result<&'static LanguageProfile, ExecutionFailure> {
        let request = ExecutionRequest {
            source: source.to_string(),
            language: language.map(str::to_string),
            timeout: None,
        };
        self.engine.check_request(&request)?;
        let profile = self.engine.resolve_language(&request)?;
        match self.engine.policy.evaluate(source, profile.id) {
            PolicyVerdict::Allowed => Ok(profile),
            PolicyVerdict::Blocked(block) => Err(ExecutionFailure::PolicyViolation {
                category: block.category,
            }),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.engine.config
    }
}

impl Engine {
    async fn process(self: Arc<Self>, id: ExecutionId, request: ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();

        if let Err(failure) = self.check_request(&request) {
            tracing::info!(reason = %failure, "Request refused");
            return ExecutionResult::rejected(id, None, failure, started.elapsed());
        }

        let mut tracker = PhaseTracker::new(id);
        let profile = match self.resolve_language(&request) {
            Ok(profile) => profile,
            Err(failure) => {
                tracing::info!(reason = %failure, "Request refused");
                let requested = request.declared_language().map(str::to_string);
                return ExecutionResult::rejected(id, requested, failure, started.elapsed());
            }
        };
        tracker.advance(ExecutionPhase::Classified);
        let language = Some(profile.id.to_string());

        if let PolicyVerdict::Blocked(block) = self.policy.evaluate(&request.source, profile.id) {
            tracker.advance(ExecutionPhase::Blocked);
            tracing::warn!(
                language = profile.id,
                category = %block.category,
                rule = block.rule_id,
                matched = %block.matched,
                "Blocked by policy"
            );
            let failure = ExecutionFailure::PolicyViolation {
                category: block.category,
            };
            return ExecutionResult::rejected(id, language, failure, started.elapsed());
        }
        tracker.advance(ExecutionPhase::Allowed);

        let permit = match self.admission.admit().await {
            Ok(permit) => permit,
            Err(rejection) => {
                tracker.advance(ExecutionPhase::Rejected);
                tracing::info!(language = profile.id, %rejection, "Admission rejected");
                let failure = ExecutionFailure::AdmissionRejected { rejection };
                return ExecutionResult::rejected(id, language, failure, started.elapsed());
            }
        };
        tracker.advance(ExecutionPhase::Admitted);

        // The permit and workspace guard move into the task, so a panic
        // still frees the slot and removes the directory.
        let engine = self;
        let task = tokio::spawn(
            async move {
                let _permit = permit;
                engine
                    .run_admitted(&mut tracker, profile, &request.source, request.timeout)
                    .await
            }
            .in_current_span(),
        );

        let mut result = match task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "Execution task failed");
                let failure = ExecutionFailure::internal(None, "execution task aborted");
                ExecutionResult::rejected(id, language.clone(), failure, started.elapsed())
            }
        };
        result.id = id;
        result.language = language;
        result.duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            language = profile.id,
            ok = result.ok,
            outcome = %result.outcome(),
            duration_ms = result.duration_ms,
            "Execution finished"
        );
        result
    }

    async fn run_admitted(
        &self,
        tracker: &mut PhaseTracker,
        profile: &'static LanguageProfile,
        source: &str,
        requested_timeout: Option<Duration>,
    ) -> ExecutionResult {
        let id = tracker.id();
        let workspace = match self.workspaces.create(&id, profile, source).await {
            Ok(workspace) => workspace,
            Err(e) => {
                tracker.advance(ExecutionPhase::Failed);
                tracing::error!(error = %e, "Failed to create workspace");
                let failure =
                    ExecutionFailure::internal(None, format!("workspace setup failed: {e}"));
                tracker.advance(ExecutionPhase::CleanedUp);
                return ExecutionResult::rejected(id, None, failure, Duration::ZERO);
            }
        };
        tracker.advance(ExecutionPhase::WorkspaceCreated);

        let pipeline = Pipeline {
            runner: self.runner.as_ref(),
            limits: &self.config.limits,
            niceness: self.config.process.niceness,
        };
        let outcome = pipeline
            .execute(tracker, profile, &workspace, requested_timeout)
            .await;

        workspace.close();
        tracker.advance(ExecutionPhase::CleanedUp);

        if let Some(failure) = &outcome.failure {
            let stage = failure.stage().map(|stage| stage.to_string());
            tracing::info!(stage = stage.as_deref(), reason = %failure, "Stage failed");
        }

        ExecutionResult {
            id,
            ok: outcome.failure.is_none(),
            output: outcome.output,
            truncated: outcome.truncated,
            exit_code: outcome.exit_code,
            duration_ms: 0,
            killed: outcome.killed,
            language: None,
            failure: outcome.failure,
        }
    }

    fn check_request(&self, request: &ExecutionRequest) -> Result<(), ExecutionFailure> {
        let max = self.config.limits.max_source_bytes;
        if request.source.trim().is_empty() {
            return Err(ExecutionFailure::InvalidRequest {
                message: "source is empty".to_string(),
            });
        }
        if request.source.len() > max {
            return Err(ExecutionFailure::InvalidRequest {
                message: format!(
                    "source is {} bytes, limit is {max}",
                    request.source.len()
                ),
            });
        }
        Ok(())
    }

    fn resolve_language(
        &self,
        request: &ExecutionRequest,
    ) -> Result<&'static LanguageProfile, ExecutionFailure> {
        match request.declared_language() {
            Some(name) => language::lookup(name).ok_or_else(|| ExecutionFailure::UnknownLanguage {
                requested: name.to_string(),
            }),
            None => Ok(self.classifier.classify(&request.source)),
        }
    }
}
