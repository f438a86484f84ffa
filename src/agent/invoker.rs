//! Composition root for agent invocations.
//!
//! The invoker wires everything together: it resolves availability, builds
//! the command, executes it (buffered, streaming, or in a visible terminal),
//! promotes non-zero exits into classified errors, and wraps the whole call
//! in the retry orchestrator. It owns the only ambient mutable state in the
//! engine: the config store and the two registries.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;

use super::availability::AvailabilityChecker;
use super::classify::classify;
use super::command::CommandBuilder;
use super::exec::{ProcessExecutor, ProcessRegistry, RunOptions, StreamEvent, StreamHandle};
use super::retry::{RetryHooks, RetryOrchestrator, RetryPolicy, RetryRegistry};
use super::terminal::{TerminalDriver, TerminalHandle, TerminalOptions};
use crate::config::{ConfigStore, Settings};
use crate::domain::{
    ApprovalMode, ClassifiedError, ErrorKind, InvocationConfig, InvocationOutcome, Platform,
    Severity,
};

/// Headroom the per-attempt guard adds over the executor's own deadline: the
/// guard exists for stalls before a process is even spawned (availability
/// probe, command construction), not to race the executor.
const OUTER_TIMEOUT_MARGIN: Duration = Duration::from_secs(15);

/// How long a transient terminal prompt file outlives its session start.
/// The shell only needs it while the injected command line runs `cat` on it.
const PROMPT_FILE_TTL: Duration = Duration::from_secs(30);

/// Optional UI callbacks; the engine emits guidance, the host renders it.
#[derive(Default)]
pub struct UiHooks {
    /// Called with the final classified failure, remediation steps included
    pub show_guidance: Option<Box<dyn Fn(&ClassifiedError) + Send + Sync>>,

    /// Called with short progress lines ("retrying ...")
    pub show_progress: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

impl UiHooks {
    fn guidance(&self, err: &ClassifiedError) {
        if let Some(hook) = &self.show_guidance {
            hook(err);
        }
    }

    fn progress(&self, message: &str) {
        if let Some(hook) = &self.show_progress {
            hook(message);
        }
    }
}

/// Per-call options, merged over the settings snapshot.
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    pub approval_mode: Option<ApprovalMode>,
    pub model: Option<String>,
    pub working_directory: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

/// Public-facing orchestration over the whole engine.
pub struct AgentInvoker {
    config: Arc<ConfigStore>,
    executor: Arc<ProcessExecutor>,
    retry_registry: Arc<RetryRegistry>,
    hooks: Arc<UiHooks>,
}

impl AgentInvoker {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self::with_registries(
            config,
            Arc::new(ProcessRegistry::new()),
            Arc::new(RetryRegistry::new()),
        )
    }

    /// Construct with injected registries, for hosts and tests that want to
    /// observe or isolate them.
    pub fn with_registries(
        config: Arc<ConfigStore>,
        process_registry: Arc<ProcessRegistry>,
        retry_registry: Arc<RetryRegistry>,
    ) -> Self {
        Self {
            config,
            executor: Arc::new(ProcessExecutor::new(process_registry)),
            retry_registry,
            hooks: Arc::new(UiHooks::default()),
        }
    }

    pub fn with_hooks(mut self, hooks: UiHooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Re-read settings after an external configuration-change notification.
    pub fn reload_config(&self) -> Result<()> {
        self.config.reload()
    }

    /// Registry of in-flight retry operations.
    pub fn retry_registry(&self) -> &Arc<RetryRegistry> {
        &self.retry_registry
    }

    /// Registry of live child processes.
    pub fn process_registry(&self) -> &Arc<ProcessRegistry> {
        self.executor.registry()
    }

    /// Stop scheduling retries and signal every live child process.
    ///
    /// In-flight attempts are not aborted mid-await; they finish on their own
    /// and find their registry entry gone.
    pub fn cancel_all(&self) {
        let descheduled = self.retry_registry.cancel_all();
        let killed = self.executor.registry().kill_all();
        tracing::info!(descheduled, killed, "Cancelled all agent operations");
    }

    fn merged_config(&self, opts: &InvokeOptions) -> (InvocationConfig, Settings) {
        let settings = self.config.snapshot();
        let config = InvocationConfig {
            tool_path: settings.tool_path.clone(),
            approval_mode: opts
                .approval_mode
                .unwrap_or_else(|| ApprovalMode::parse(&settings.default_approval_mode)),
            model: opts.model.clone().or_else(|| settings.default_model.clone()),
            working_directory: opts.working_directory.clone(),
            timeout: opts.timeout.or_else(|| settings.timeout()),
            shell_override: settings.shell_override.clone(),
        };
        (config, settings)
    }

    fn tool_name(config: &InvocationConfig) -> &str {
        config
            .tool_path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&config.tool_path)
    }

    fn retry_hooks(&self) -> RetryHooks {
        let progress_hooks = Arc::clone(&self.hooks);
        let failure_hooks = Arc::clone(&self.hooks);
        RetryHooks {
            on_retry: Some(Box::new(move |attempt, err| {
                progress_hooks.progress(&format!(
                    "Attempt {attempt} failed ({}), retrying",
                    err.kind
                ));
            })),
            on_failure: Some(Box::new(move |err| {
                failure_hooks.guidance(err);
            })),
            ..RetryHooks::default()
        }
    }

    /// Headless buffered invocation: prompt on stdin, result plus the
    /// modified-file report back.
    pub async fn invoke(&self, prompt: &str, opts: &InvokeOptions) -> Result<InvocationOutcome> {
        let (config, settings) = self.merged_config(opts);
        let orchestrator =
            RetryOrchestrator::new(Arc::clone(&self.retry_registry), Self::tool_name(&config));
        let hooks = self.retry_hooks();

        let attempt = || self.attempt_once(prompt, &config, &settings);
        orchestrator
            .execute_with_retry("agent-invoke", &opts.retry, &hooks, attempt)
            .await
    }

    /// One attempt of the headless flow; the retry orchestrator decides how
    /// many of these run.
    ///
    /// Each attempt is raced against its own guard above the executor's
    /// deadline, covering a stall in the availability probe or anywhere else
    /// before a spawn exists. Guarding per attempt rather than around the
    /// whole orchestration leaves every retry its full time window.
    async fn attempt_once(
        &self,
        prompt: &str,
        config: &InvocationConfig,
        settings: &Settings,
    ) -> Result<InvocationOutcome> {
        let attempt = self.run_attempt(prompt, config, settings);
        match config.timeout {
            Some(timeout) => {
                let guard = timeout + OUTER_TIMEOUT_MARGIN;
                match tokio::time::timeout(guard, attempt).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        let classified = ClassifiedError::new(
                            ErrorKind::Timeout,
                            Severity::Medium,
                            true,
                            format!("Agent invocation timed out after {}ms", guard.as_millis()),
                            vec!["Increase timeout_ms in the configuration".to_string()],
                        );
                        Err(anyhow::Error::new(classified))
                    }
                }
            }
            None => attempt.await,
        }
    }

    async fn run_attempt(
        &self,
        prompt: &str,
        config: &InvocationConfig,
        settings: &Settings,
    ) -> Result<InvocationOutcome> {
        self.gate_availability(config, settings).await?;

        let args = CommandBuilder::build_args(config);
        let run_opts = RunOptions {
            cwd: config.working_directory.clone(),
            timeout: config.timeout,
            stdin: Some(prompt.to_string()),
            env: settings.env.clone(),
        };

        let result = self.executor.run(&config.tool_path, &args, &run_opts).await?;

        if !result.success() {
            // Promote the non-zero exit into a classified error; this is the
            // policy decision the executor deliberately leaves to us
            let combined = result.combined_output();
            let classified = classify(
                &combined,
                Some(result.exit_code),
                Platform::current(),
                Self::tool_name(config),
            );
            return Err(anyhow::Error::new(classified));
        }

        let modified_files = scan_modified_files(&result.stdout);
        Ok(InvocationOutcome {
            result,
            modified_files,
        })
    }

    async fn gate_availability(
        &self,
        config: &InvocationConfig,
        settings: &Settings,
    ) -> Result<()> {
        let checker = AvailabilityChecker::new(Arc::clone(&self.executor), settings);
        let availability = checker.check().await;
        if availability.is_available {
            return Ok(());
        }

        let (kind, severity) = if !availability.is_installed {
            (ErrorKind::InstallationMissing, Severity::Critical)
        } else if availability.version.is_some() && !availability.is_compatible {
            (ErrorKind::VersionIncompatible, Severity::High)
        } else {
            (ErrorKind::ExecutionFailed, Severity::High)
        };
        let message = availability
            .error_message
            .unwrap_or_else(|| format!("{} is unavailable", Self::tool_name(config)));
        let classified =
            ClassifiedError::new(kind, severity, false, message, availability.remediation);
        Err(anyhow::Error::new(classified))
    }

    /// Streaming invocation: per-line events over `tx`, cancellable handle
    /// back. The availability gate still runs; retries do not, since events
    /// already streamed to the host cannot be unsent.
    pub async fn invoke_streaming(
        &self,
        prompt: &str,
        opts: &InvokeOptions,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<StreamHandle> {
        let (config, settings) = self.merged_config(opts);
        if let Err(err) = self.gate_availability(&config, &settings).await {
            if let Some(classified) = err.downcast_ref::<ClassifiedError>() {
                self.hooks.guidance(classified);
            }
            return Err(err);
        }

        let args = CommandBuilder::build_args(&config);
        let run_opts = RunOptions {
            cwd: config.working_directory.clone(),
            timeout: None,
            stdin: Some(prompt.to_string()),
            env: settings.env.clone(),
        };
        let handle = self
            .executor
            .run_streaming(&config.tool_path, &args, &run_opts, tx)?;
        Ok(handle)
    }

    /// Interactive terminal invocation: prompt goes into a transient file,
    /// the composed command line runs the tool on it and then re-attaches to
    /// the session. The file is deleted after a grace period.
    pub async fn invoke_terminal(
        &self,
        prompt: &str,
        title: &str,
        opts: &InvokeOptions,
        output_tx: mpsc::Sender<String>,
    ) -> Result<TerminalHandle> {
        let (config, settings) = self.merged_config(opts);
        if let Err(err) = self.gate_availability(&config, &settings).await {
            if let Some(classified) = err.downcast_ref::<ClassifiedError>() {
                self.hooks.guidance(classified);
            }
            return Err(err);
        }

        let storage_dir = settings.storage_dir();
        std::fs::create_dir_all(&storage_dir).map_err(|e| {
            anyhow::anyhow!("Failed to create {}: {e}", storage_dir.display())
        })?;
        let prompt_file = storage_dir.join(format!(
            "coderail-{}-{}.md",
            slugify(title),
            uuid::Uuid::new_v4()
        ));
        std::fs::write(&prompt_file, prompt).map_err(|e| {
            anyhow::anyhow!("Failed to write prompt file {}: {e}", prompt_file.display())
        })?;

        let terminal_opts = TerminalOptions {
            cwd: config.working_directory.clone(),
            shell_override: config.shell_override.clone(),
            startup_delay: settings.terminal_startup_delay(),
            ..TerminalOptions::default()
        };
        let dialect = TerminalDriver::dialect_for(&terminal_opts);
        let command_line = CommandBuilder::compose_terminal_command(&config, &prompt_file, dialect);

        self.hooks
            .progress(&format!("Opening terminal session: {title}"));

        let registry = Arc::clone(self.executor.registry());
        let handle = match TerminalDriver::open(&command_line, &terminal_opts, output_tx, registry)
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                let _ = std::fs::remove_file(&prompt_file);
                return Err(err);
            }
        };

        // The prompt file only matters until the injected command has read it
        tokio::spawn(async move {
            tokio::time::sleep(PROMPT_FILE_TTL).await;
            if std::fs::remove_file(&prompt_file).is_ok() {
                tracing::debug!("Removed transient prompt file {}", prompt_file.display());
            }
        });

        Ok(handle)
    }
}

/// Scan tool output for its file-modification report.
///
/// Best-effort heuristic over four literal line prefixes, case-insensitive;
/// the remainder of each matching line is a reported path. Deduplicated,
/// first-report order preserved.
pub fn scan_modified_files(output: &str) -> Vec<PathBuf> {
    const PREFIXES: [&str; 4] = ["modified:", "created:", "updated:", "writing to:"];

    let mut seen = Vec::new();
    for line in output.lines() {
        let trimmed = line.trim();
        let lower = trimmed.to_lowercase();
        for prefix in PREFIXES {
            if lower.starts_with(prefix) {
                let path = trimmed[prefix.len()..].trim();
                if !path.is_empty() && !seen.iter().any(|p: &PathBuf| p == &PathBuf::from(path)) {
                    seen.push(PathBuf::from(path));
                }
                break;
            }
        }
    }
    seen
}

fn slugify(title: &str) -> String {
    let slug: String = title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = slug.trim_matches('-');
    if trimmed.is_empty() {
        "prompt".to_string()
    } else {
        trimmed.chars().take(40).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modified_file_report_dedups_and_preserves_order() {
        let output = "Modified: a.ts\nCreated: b.ts\nModified: a.ts";
        let files = scan_modified_files(output);
        assert_eq!(files, vec![PathBuf::from("a.ts"), PathBuf::from("b.ts")]);
    }

    #[test]
    fn modified_file_report_is_case_insensitive_and_trims() {
        let output = "  MODIFIED:   src/lib.rs  \nwriting to: out/result.json\nchit-chat line";
        let files = scan_modified_files(output);
        assert_eq!(
            files,
            vec![PathBuf::from("src/lib.rs"), PathBuf::from("out/result.json")]
        );
    }

    #[test]
    fn empty_paths_are_ignored() {
        assert!(scan_modified_files("Modified:\nUpdated:   ").is_empty());
    }

    #[test]
    fn slugify_flattens_titles() {
        assert_eq!(slugify("Fix the Bug!"), "fix-the-bug");
        assert_eq!(slugify("***"), "prompt");
    }

    #[cfg(unix)]
    mod end_to_end {
        use super::*;
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;
        use std::sync::atomic::{AtomicU32, Ordering};

        /// Fake agent binary: answers the version probe, then copies stdin to
        /// a capture file and prints a modification report.
        fn fake_tool(dir: &Path) -> String {
            let capture = dir.join("captured-prompt.txt");
            let path = dir.join("codex");
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(
                file,
                "#!/bin/sh\nif [ \"$1\" = \"--version\" ]; then echo 'codex-cli 9.9.9'; exit 0; fi\ncat - > '{}'\necho 'Modified: a.ts'\necho 'Created: b.ts'\necho 'Modified: a.ts'",
                capture.display()
            )
            .unwrap();
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
            path.display().to_string()
        }

        fn invoker_for(tool_path: String) -> AgentInvoker {
            let settings = Settings {
                tool_path,
                minimum_version: "1.0.0".to_string(),
                ..Settings::default()
            };
            AgentInvoker::new(Arc::new(ConfigStore::new(settings)))
        }

        #[tokio::test]
        async fn headless_invocation_feeds_prompt_and_reports_files() {
            let dir = tempfile::tempdir().unwrap();
            let tool = fake_tool(dir.path());
            let invoker = invoker_for(tool);

            let outcome = invoker
                .invoke("print('hi')", &InvokeOptions::default())
                .await
                .unwrap();

            assert!(outcome.result.success());
            assert_eq!(
                outcome.modified_files,
                vec![PathBuf::from("a.ts"), PathBuf::from("b.ts")]
            );
            let captured =
                std::fs::read_to_string(dir.path().join("captured-prompt.txt")).unwrap();
            assert_eq!(captured, "print('hi')");
        }

        #[tokio::test]
        async fn missing_tool_fails_once_with_guidance() {
            let guidance_calls = Arc::new(AtomicU32::new(0));
            let guidance_hook = Arc::clone(&guidance_calls);

            let settings = Settings {
                tool_path: "/definitely/not/codex".to_string(),
                ..Settings::default()
            };
            let invoker = AgentInvoker::new(Arc::new(ConfigStore::new(settings))).with_hooks(
                UiHooks {
                    show_guidance: Some(Box::new(move |err| {
                        assert_eq!(err.kind, ErrorKind::InstallationMissing);
                        assert!(!err.remediation.is_empty());
                        guidance_hook.fetch_add(1, Ordering::SeqCst);
                    })),
                    show_progress: None,
                },
            );

            let opts = InvokeOptions {
                retry: RetryPolicy {
                    max_attempts: 5,
                    base_delay: Duration::from_millis(1),
                    ..RetryPolicy::default()
                },
                ..InvokeOptions::default()
            };
            let err = invoker.invoke("hello", &opts).await.unwrap_err();
            let classified = err.downcast_ref::<ClassifiedError>().unwrap();
            assert_eq!(classified.kind, ErrorKind::InstallationMissing);
            // Non-retryable: surfaced on the first attempt, shown exactly once
            assert_eq!(guidance_calls.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn silent_not_found_exit_is_not_retried() {
            let dir = tempfile::tempdir().unwrap();
            let runs = dir.path().join("runs.txt");
            let path = dir.path().join("codex");
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(
                file,
                "#!/bin/sh\nif [ \"$1\" = \"--version\" ]; then echo 'codex-cli 9.9.9'; exit 0; fi\necho run >> '{}'\nexit 127",
                runs.display()
            )
            .unwrap();
            drop(file);
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();

            let invoker = invoker_for(path.display().to_string());
            let opts = InvokeOptions {
                retry: RetryPolicy {
                    max_attempts: 3,
                    base_delay: Duration::from_millis(1),
                    ..RetryPolicy::default()
                },
                ..InvokeOptions::default()
            };

            // Exit 127 with no output: the kind survives the orchestrator
            // even though the message gives the pattern tables nothing
            let err = invoker.invoke("hello", &opts).await.unwrap_err();
            let classified = err.downcast_ref::<ClassifiedError>().unwrap();
            assert_eq!(classified.kind, ErrorKind::InstallationMissing);
            let recorded = std::fs::read_to_string(&runs).unwrap();
            assert_eq!(recorded.lines().count(), 1);
        }

        #[tokio::test]
        async fn timed_out_attempt_is_retried_with_a_fresh_window() {
            let dir = tempfile::tempdir().unwrap();
            let marker = dir.path().join("first-attempt");
            let path = dir.path().join("codex");
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(
                file,
                "#!/bin/sh\nif [ \"$1\" = \"--version\" ]; then echo 'codex-cli 9.9.9'; exit 0; fi\nif [ ! -e '{marker}' ]; then touch '{marker}'; sleep 5; fi\ncat - > /dev/null\necho 'done'",
                marker = marker.display()
            )
            .unwrap();
            drop(file);
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();

            let invoker = invoker_for(path.display().to_string());
            let opts = InvokeOptions {
                timeout: Some(Duration::from_millis(300)),
                retry: RetryPolicy {
                    max_attempts: 2,
                    base_delay: Duration::from_millis(1),
                    ..RetryPolicy::default()
                },
                ..InvokeOptions::default()
            };

            // First attempt stalls past the executor deadline; the retry
            // runs against the same timeout and succeeds
            let outcome = invoker.invoke("hello", &opts).await.unwrap();
            assert_eq!(outcome.result.stdout, "done");
            assert!(marker.exists());
        }

        #[tokio::test]
        async fn cancel_all_clears_both_registries() {
            let dir = tempfile::tempdir().unwrap();
            let invoker = invoker_for(fake_tool(dir.path()));
            invoker.cancel_all();
            assert!(invoker.retry_registry().active_operations().is_empty());
            assert!(invoker.process_registry().is_empty());
        }
    }
}
