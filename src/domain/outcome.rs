//! Result value types produced by the execution engine.

use semver::Version;
use std::path::PathBuf;

/// Outcome of one buffered process invocation.
///
/// Produced once per run and never mutated; a non-zero exit code is data here,
/// not an error. Promoting it to a failure is the invoker's policy decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Exit code of the child; `-1` when the child died to a signal
    pub exit_code: i32,

    /// Trimmed stdout
    pub stdout: String,

    /// Trimmed stderr
    pub stderr: String,
}

impl ExecutionResult {
    /// Whether the child exited cleanly.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout and stderr joined, for pattern scans that care about both.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Result of an installation/compatibility probe.
///
/// Recomputed on every check; never cached, since a stale result would hide an
/// upgrade or uninstall that happened in between.
#[derive(Debug, Clone)]
pub struct AvailabilityResult {
    /// Installed, compatible, and ready to invoke
    pub is_available: bool,

    /// The binary exists and is runnable
    pub is_installed: bool,

    /// Version reported by the probe, when one could be parsed
    pub version: Option<Version>,

    /// Version meets the configured minimum
    pub is_compatible: bool,

    /// Human-readable failure description
    pub error_message: Option<String>,

    /// Ordered guidance steps for the failure path taken
    pub remediation: Vec<String>,
}

impl AvailabilityResult {
    /// The all-clear result.
    pub fn available(version: Version) -> Self {
        Self {
            is_available: true,
            is_installed: true,
            version: Some(version),
            is_compatible: true,
            error_message: None,
            remediation: Vec::new(),
        }
    }
}

/// Final outcome of a successful headless invocation.
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    /// Raw process result
    pub result: ExecutionResult,

    /// Files the tool reported as modified, deduplicated in report order
    pub modified_files: Vec<PathBuf>,
}
