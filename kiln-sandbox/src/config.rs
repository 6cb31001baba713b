//! Engine configuration
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. `KILN_*` environment variables override the file.

use crate::error::ConfigError;
use crate::language;
use crate::limits::ExecutionLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub workspace: WorkspaceConfig,
    pub limits: ExecutionLimits,
    pub admission: AdmissionConfig,
    pub policy: PolicyConfig,
    pub process: ProcessConfig,
    pub history: HistoryConfig,
    /// Profile used when detection finds nothing
    pub default_language: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            workspace: WorkspaceConfig::default(),
            limits: ExecutionLimits::default(),
            admission: AdmissionConfig::default(),
            policy: PolicyConfig::default(),
            process: ProcessConfig::default(),
            history: HistoryConfig::default(),
            default_language: "javascript".to_string(),
        }
    }
}

/// Where per-execution directories live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub root: PathBuf,
    /// Remove directories left behind by a previous process on startup
    pub sweep_on_start: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("kiln-forge"),
            sweep_on_start: true,
        }
    }
}

/// Concurrency and host load thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Concurrent executions; defaults to the logical CPU count
    pub capacity: Option<usize>,
    pub max_cpu_percent: f64,
    pub max_memory_percent: f64,
    pub min_free_memory_mb: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            capacity: None,
            max_cpu_percent: 70.0,
            max_memory_percent: 60.0,
            min_free_memory_mb: 256,
        }
    }
}

impl AdmissionConfig {
    pub fn effective_capacity(&self) -> usize {
        self.capacity.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Only prefix destructive file commands may target
    pub home: Option<PathBuf>,
}

/// Environment and scheduling for spawned processes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    pub path: String,
    pub home: String,
    pub lang: String,
    /// Applied to the run stage only; `None` leaves priority unchanged
    pub niceness: Option<i32>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            path: "/usr/bin:/bin:/usr/local/bin".to_string(),
            home: "/tmp".to_string(),
            lang: "C.UTF-8".to_string(),
            niceness: Some(15),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub capacity: usize,
    /// Entries reported by `status`
    pub status_window: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            status_window: 10,
        }
    }
}

impl SandboxConfig {
    /// Read and parse a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `KILN_*` variables from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(root) = lookup("KILN_WORKSPACE_ROOT") {
            self.workspace.root = PathBuf::from(root);
        }
        if let Some(capacity) = lookup("KILN_CAPACITY") {
            self.admission.capacity = Some(parse_number("KILN_CAPACITY", &capacity)?);
        }
        if let Some(language) = lookup("KILN_DEFAULT_LANGUAGE") {
            self.default_language = language.trim().to_string();
        }
        if let Some(cap) = lookup("KILN_OUTPUT_CAP") {
            self.limits.output_cap_bytes = parse_number("KILN_OUTPUT_CAP", &cap)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admission.capacity == Some(0) {
            return Err(invalid("admission.capacity", "must be at least 1"));
        }
        if self.limits.output_cap_bytes == 0 {
            return Err(invalid("limits.output_cap_bytes", "must be at least 1"));
        }
        if self.limits.max_source_bytes == 0 {
            return Err(invalid("limits.max_source_bytes", "must be at least 1"));
        }
        if self.history.capacity == 0 {
            return Err(invalid("history.capacity", "must be at least 1"));
        }
        for (field, value) in [
            ("admission.max_cpu_percent", self.admission.max_cpu_percent),
            ("admission.max_memory_percent", self.admission.max_memory_percent),
        ] {
            if !(value > 0.0 && value <= 100.0) {
                return Err(invalid(field, format!("{value} is outside (0, 100]")));
            }
        }
        if language::lookup(&self.default_language).is_none() {
            return Err(invalid(
                "default_language",
                format!("unknown language '{}'", self.default_language),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.into(),
    }
}

fn parse_number<T: std::str::FromStr>(field: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(field, format!("'{raw}' is not a number")))
}
