//! Per-execution limits

use crate::error::Stage;
use crate::language::LanguageProfile;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Numeric limits applied to every execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionLimits {
    /// Largest accepted source text, in bytes
    pub max_source_bytes: usize,

    /// Captured output beyond this many bytes is cut off
    pub output_cap_bytes: usize,

    /// Replaces every profile's run timeout when set
    #[serde(with = "humantime_serde")]
    pub run_timeout: Option<Duration>,

    /// Replaces every profile's compile timeout when set
    #[serde(with = "humantime_serde")]
    pub compile_timeout: Option<Duration>,

    /// Ceiling for per-request timeout overrides
    #[serde(with = "humantime_serde")]
    pub max_timeout: Duration,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_source_bytes: 100 * 1024,
            output_cap_bytes: 8192,
            run_timeout: None,
            compile_timeout: None,
            max_timeout: Duration::from_secs(60),
        }
    }
}

impl ExecutionLimits {
    /// Small sources, short output and short deadlines
    pub fn strict() -> Self {
        Self {
            max_source_bytes: 16 * 1024,
            output_cap_bytes: 2048,
            run_timeout: Some(Duration::from_secs(3)),
            compile_timeout: Some(Duration::from_secs(10)),
            max_timeout: Duration::from_secs(5),
        }
    }

    /// Larger sources and longer deadlines for trusted callers
    pub fn permissive() -> Self {
        Self {
            max_source_bytes: 1024 * 1024,
            output_cap_bytes: 64 * 1024,
            run_timeout: None,
            compile_timeout: None,
            max_timeout: Duration::from_secs(300),
        }
    }

    /// Effective deadline for one stage of `profile`.
    ///
    /// The request override only applies to the run stage and is clamped
    /// to `max_timeout`; otherwise the global override, otherwise the
    /// profile default.
    pub fn timeout_for(
        &self,
        profile: &LanguageProfile,
        stage: Stage,
        requested: Option<Duration>,
    ) -> Duration {
        match stage {
            Stage::Compile => self.compile_timeout.unwrap_or(profile.compile_timeout),
            Stage::Run => match requested {
                Some(requested) => requested.min(self.max_timeout),
                None => self.run_timeout.unwrap_or(profile.run_timeout),
            },
        }
    }
}
