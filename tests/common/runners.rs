//! Fake runners for driving the engine without real processes

use async_trait::async_trait;
use kiln_sandbox::{ProcessOutput, ProcessSpec, Runner, RunnerError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Semaphore;

fn finished(exit_code: i32, output: impl Into<String>) -> ProcessOutput {
    ProcessOutput {
        output: output.into(),
        truncated: false,
        exit_code: Some(exit_code),
        killed: false,
        duration: Duration::from_millis(1),
    }
}

/// Blocks every run until the test opens the gate, then reports whether
/// its working directory still exists
pub struct GatedRunner {
    gate: Semaphore,
    started: AtomicUsize,
}

impl GatedRunner {
    pub fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            started: AtomicUsize::new(0),
        }
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Let `n` blocked runs finish
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Wait until at least `n` runs are blocked at the gate
    pub async fn wait_started(&self, n: usize) {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while self.started() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "only {} of {} runs started", self.started(), n);
    }
}

impl Default for GatedRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Runner for GatedRunner {
    async fn run(&self, spec: ProcessSpec) -> Result<ProcessOutput, RunnerError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let permit = self.gate.acquire().await.expect("gate closed");
        permit.forget();
        let cwd = if spec.cwd.is_dir() { "present" } else { "missing" };
        Ok(finished(0, format!("ran {} (cwd {cwd})", spec.program)))
    }

    fn name(&self) -> &str {
        "gated"
    }
}

/// Records every spec; programs listed in `failing` exit with status 1
#[derive(Default)]
pub struct RecordingRunner {
    seen: Mutex<Vec<ProcessSpec>>,
    failing: Vec<String>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(programs: &[&str]) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            failing: programs.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn spawns(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn programs(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|spec| spec.program.clone())
            .collect()
    }
}

#[async_trait]
impl Runner for RecordingRunner {
    async fn run(&self, spec: ProcessSpec) -> Result<ProcessOutput, RunnerError> {
        let fails = self.failing.contains(&spec.program);
        let program = spec.program.clone();
        self.seen.lock().unwrap().push(spec);
        if fails {
            Ok(finished(1, format!("{program}: error: expected ';'")))
        } else {
            Ok(finished(0, format!("ran {program}")))
        }
    }

    fn name(&self) -> &str {
        "recording"
    }
}
