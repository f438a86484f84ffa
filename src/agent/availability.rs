//! Installation and compatibility probing.
//!
//! Runs `--version` through the executor and turns whatever happens into an
//! [`AvailabilityResult`]. Never fails: every branch, including spawn-level OS
//! errors, produces a populated result with guidance strings. Results are
//! recomputed on every call so an upgrade or uninstall is seen immediately.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use semver::Version;

use super::classify::looks_like_not_found;
use super::exec::{ExecError, ProcessExecutor, RunOptions};
use crate::config::Settings;
use crate::domain::{AvailabilityResult, Platform};

/// Deadline for the version probe; a healthy install answers in well under a
/// second, so anything longer is itself a signal.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\.(\d+)\.(\d+)").expect("invalid version pattern"));

/// Extract the first `x.y.z` substring from probe output.
pub fn extract_version(output: &str) -> Option<Version> {
    let m = VERSION_RE.find(output)?;
    Version::parse(m.as_str()).ok()
}

/// Parse a minimum-version string, treating missing components as 0, so a
/// configured "1.0" means "1.0.0".
pub fn parse_minimum(s: &str) -> Option<Version> {
    let mut parts = s.trim().splitn(3, '.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    let patch = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    Some(Version::new(major, minor, patch))
}

/// Probes whether the configured tool is installed and new enough.
pub struct AvailabilityChecker {
    executor: Arc<ProcessExecutor>,
    tool_path: String,
    minimum_version: Option<Version>,
    env: HashMap<String, String>,
}

impl AvailabilityChecker {
    pub fn new(executor: Arc<ProcessExecutor>, settings: &Settings) -> Self {
        Self {
            executor,
            tool_path: settings.tool_path.clone(),
            minimum_version: parse_minimum(&settings.minimum_version),
            env: settings.env.clone(),
        }
    }

    fn tool_name(&self) -> &str {
        self.tool_path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.tool_path)
    }

    fn install_remediation(&self) -> Vec<String> {
        vec![
            format!(
                "Install the {} CLI (e.g. `npm install -g @openai/codex`)",
                self.tool_name()
            ),
            format!("Make sure {} is on your PATH", self.tool_name()),
            "Set tool_path in the configuration if it lives elsewhere".to_string(),
        ]
    }

    /// Run the probe and classify the outcome.
    pub async fn check(&self) -> AvailabilityResult {
        let opts = RunOptions {
            timeout: Some(PROBE_TIMEOUT),
            env: self.env.clone(),
            ..RunOptions::default()
        };
        let probe = self
            .executor
            .run(&self.tool_path, &["--version".to_string()], &opts)
            .await;

        match probe {
            Ok(result) if result.success() => {
                let combined = result.combined_output();
                match extract_version(&combined) {
                    Some(version) => self.judge_version(version),
                    None => AvailabilityResult {
                        is_available: false,
                        is_installed: true,
                        version: None,
                        is_compatible: false,
                        error_message: Some(format!(
                            "Could not parse a version from `{} --version` output",
                            self.tool_name()
                        )),
                        remediation: vec![format!(
                            "Run `{} --version` manually and check the output",
                            self.tool_name()
                        )],
                    },
                }
            }
            Ok(result) => {
                let combined = result.combined_output();
                // Not-found heuristics run here, before any exception exists
                // to classify: a 127/9009 exit or a localized launcher error
                // means the shell never found the tool at all.
                if looks_like_not_found(
                    &combined,
                    Some(result.exit_code),
                    Platform::current(),
                    self.tool_name(),
                ) {
                    AvailabilityResult {
                        is_available: false,
                        is_installed: false,
                        version: None,
                        is_compatible: false,
                        error_message: Some(format!("{} is not installed", self.tool_name())),
                        remediation: self.install_remediation(),
                    }
                } else {
                    AvailabilityResult {
                        is_available: false,
                        is_installed: true,
                        version: None,
                        is_compatible: false,
                        error_message: Some(format!(
                            "{} exited with code {}: {}",
                            self.tool_name(),
                            result.exit_code,
                            combined
                        )),
                        remediation: vec![
                            format!("Run `{} --version` manually to reproduce", self.tool_name()),
                            "Check the tool's own logs for startup errors".to_string(),
                        ],
                    }
                }
            }
            Err(err) => self.judge_spawn_error(err),
        }
    }

    fn judge_version(&self, version: Version) -> AvailabilityResult {
        let Some(minimum) = &self.minimum_version else {
            return AvailabilityResult::available(version);
        };
        if version >= *minimum {
            AvailabilityResult::available(version)
        } else {
            AvailabilityResult {
                is_available: false,
                is_installed: true,
                version: Some(version.clone()),
                is_compatible: false,
                error_message: Some(format!(
                    "{} {} is older than the minimum supported version {}",
                    self.tool_name(),
                    version,
                    minimum
                )),
                remediation: vec![format!(
                    "Upgrade {} to {} or newer",
                    self.tool_name(),
                    minimum
                )],
            }
        }
    }

    fn judge_spawn_error(&self, err: ExecError) -> AvailabilityResult {
        let message = err.to_string();
        let lower = message.to_lowercase();

        let (is_installed, remediation) = if lower.contains("os error 2")
            || lower.contains("no such file")
            || lower.contains("not found")
        {
            (false, self.install_remediation())
        } else if lower.contains("os error 13") || lower.contains("permission denied") {
            (
                true,
                vec![
                    format!(
                        "Check that {} is executable (chmod +x on POSIX systems)",
                        self.tool_name()
                    ),
                    "Verify the binary's ownership and directory permissions".to_string(),
                ],
            )
        } else {
            (
                true,
                vec![format!(
                    "Run `{} --version` manually to investigate",
                    self.tool_name()
                )],
            )
        };

        AvailabilityResult {
            is_available: false,
            is_installed,
            version: None,
            is_compatible: false,
            error_message: Some(message),
            remediation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::exec::ProcessRegistry;

    #[test]
    fn extracts_first_version_substring() {
        assert_eq!(
            extract_version("codex-cli 1.2.3 (build abc)"),
            Some(Version::new(1, 2, 3))
        );
        assert_eq!(
            extract_version("v0.45.1\nsome 9.9.9 noise"),
            Some(Version::new(0, 45, 1))
        );
        assert_eq!(extract_version("no version here"), None);
    }

    #[test]
    fn minimum_parse_pads_missing_components() {
        assert_eq!(parse_minimum("1.0.0"), Some(Version::new(1, 0, 0)));
        assert_eq!(parse_minimum("1.0"), Some(Version::new(1, 0, 0)));
        assert_eq!(parse_minimum("2"), Some(Version::new(2, 0, 0)));
        assert_eq!(parse_minimum("banana"), None);
    }

    #[test]
    fn comparison_is_component_wise_not_lexicographic() {
        let minimum = Version::new(1, 0, 0);
        let cases = [
            ("0.9.9", false),
            ("1.0.0", true),
            ("1.0.1", true),
            ("2.0.0", true),
        ];
        for (probe, expected) in cases {
            let version = extract_version(probe).unwrap();
            assert_eq!(version >= minimum, expected, "{probe}");
        }
        // 10 > 9 numerically even though "10" < "9" lexicographically
        assert!(extract_version("1.10.0").unwrap() > extract_version("1.9.0").unwrap());
    }

    #[cfg(unix)]
    mod probes {
        use super::*;
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        fn fake_tool(dir: &Path, script: &str) -> String {
            let path = dir.join("codex");
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, "#!/bin/sh\n{script}").unwrap();
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
            path.display().to_string()
        }

        fn checker(tool_path: String, minimum: &str) -> AvailabilityChecker {
            let settings = Settings {
                tool_path,
                minimum_version: minimum.to_string(),
                ..Settings::default()
            };
            let executor = Arc::new(ProcessExecutor::new(Arc::new(ProcessRegistry::new())));
            AvailabilityChecker::new(executor, &settings)
        }

        #[tokio::test]
        async fn healthy_install_reports_available() {
            let dir = tempfile::tempdir().unwrap();
            let tool = fake_tool(dir.path(), "echo 'codex-cli 1.2.3'");
            let result = checker(tool, "1.0.0").check().await;
            assert!(result.is_available);
            assert!(result.is_installed);
            assert!(result.is_compatible);
            assert_eq!(result.version, Some(Version::new(1, 2, 3)));
        }

        #[tokio::test]
        async fn old_install_reports_incompatible_with_upgrade_guidance() {
            let dir = tempfile::tempdir().unwrap();
            let tool = fake_tool(dir.path(), "echo 'codex-cli 0.9.9'");
            let result = checker(tool, "1.0.0").check().await;
            assert!(!result.is_available);
            assert!(result.is_installed);
            assert!(!result.is_compatible);
            assert!(result.remediation.iter().any(|r| r.contains("Upgrade")));
        }

        #[tokio::test]
        async fn not_found_exit_code_means_not_installed_without_version_parse() {
            let dir = tempfile::tempdir().unwrap();
            // Launcher-style failure: prints a 1.0.0-looking string but exits 127
            let tool = fake_tool(dir.path(), "echo 'wrapper 1.0.0 failed'; exit 127");
            let result = checker(tool, "1.0.0").check().await;
            assert!(!result.is_installed);
            assert!(!result.is_available);
            assert_eq!(result.version, None);
            assert!(!result.remediation.is_empty());
        }

        #[tokio::test]
        async fn missing_binary_reports_install_guidance() {
            let result = checker("/definitely/not/codex".to_string(), "1.0.0")
                .check()
                .await;
            assert!(!result.is_installed);
            assert!(result
                .remediation
                .iter()
                .any(|r| r.to_lowercase().contains("install")));
        }

        #[tokio::test]
        async fn installed_but_erroring_is_distinguished_from_missing() {
            let dir = tempfile::tempdir().unwrap();
            let tool = fake_tool(dir.path(), "echo 'config corrupt' >&2; exit 1");
            let result = checker(tool, "1.0.0").check().await;
            assert!(result.is_installed);
            assert!(!result.is_available);
        }
    }
}
