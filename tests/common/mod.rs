//! Common test utilities shared across integration and E2E tests

pub mod runners;

pub use runners::*;

use kiln_sandbox::{
    FixedProbe, HostProbe, HostSnapshot, ProcessRunner, Runner, SandboxConfig, SandboxService,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Setup logging for tests
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("kiln_sandbox=debug")
        .with_test_writer()
        .try_init();
}

/// Engine plus the temp directory backing its workspace root
pub struct TestEngine {
    pub sandbox: SandboxService,
    pub root: TempDir,
}

impl TestEngine {
    /// Execution directories left under the workspace root, across every
    /// engine directory in it
    pub fn workspace_entries(&self) -> usize {
        count_workspaces(self.root.path())
    }
}

pub fn count_workspaces(root: &Path) -> usize {
    let Ok(engines) = std::fs::read_dir(root) else {
        return 0;
    };
    engines
        .flatten()
        .filter_map(|engine| std::fs::read_dir(engine.path()).ok())
        .map(|entries| entries.count())
        .sum()
}

/// Config rooted in `root`, with a fixed capacity
pub fn test_config(root: &Path, capacity: usize) -> SandboxConfig {
    let mut config = SandboxConfig::default();
    config.workspace.root = root.to_path_buf();
    config.admission.capacity = Some(capacity);
    config
}

pub fn idle_probe() -> Arc<dyn HostProbe> {
    Arc::new(FixedProbe(HostSnapshot::idle()))
}

/// Engine on an idle fake host with the given runner
pub fn engine_with(runner: Arc<dyn Runner>, capacity: usize) -> TestEngine {
    engine_with_config(runner, |root| test_config(root, capacity))
}

pub fn engine_with_config(
    runner: Arc<dyn Runner>,
    config: impl FnOnce(&Path) -> SandboxConfig,
) -> TestEngine {
    let root = tempfile::tempdir().expect("Failed to create temp dir");
    let config = config(root.path());
    let sandbox = SandboxService::with_components(config, runner, idle_probe())
        .expect("Failed to build engine");
    TestEngine { sandbox, root }
}

/// Engine sharing an existing workspace root with other engines
pub fn engine_on_root(runner: Arc<dyn Runner>, root: &Path, capacity: usize) -> SandboxService {
    SandboxService::with_components(test_config(root, capacity), runner, idle_probe())
        .expect("Failed to build engine")
}

/// Engine spawning real processes on an idle fake host
pub fn process_engine(capacity: usize) -> TestEngine {
    engine_with_config(Arc::new(ProcessRunner::default()), |root| {
        test_config(root, capacity)
    })
}

/// Whether `program` is on the restricted search path processes get
pub fn has_program(program: &str) -> bool {
    ["/usr/bin", "/bin", "/usr/local/bin"]
        .iter()
        .any(|dir| Path::new(dir).join(program).is_file())
}
