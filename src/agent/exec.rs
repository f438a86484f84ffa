//! Child-process execution.
//!
//! The executor owns the full child lifecycle: argv spawn (never through a
//! shell), stdin feeding, stdout/stderr draining, timeout enforcement, and a
//! live registry so a shutdown sweep can signal everything still running.
//!
//! Spawn-level OS failures and timeouts are the only errors here. A non-zero
//! exit is returned as data in [`ExecutionResult`]; deciding whether that is a
//! failure is invoker policy, not executor policy.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::domain::ExecutionResult;

/// Execution failure at the OS level.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Failed to spawn {exe}: {source}")]
    Spawn {
        exe: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process timed out after {}ms", timeout.as_millis())]
    Timeout { timeout: Duration },

    #[error("I/O error while running {exe}: {source}")]
    Io {
        exe: String,
        #[source]
        source: std::io::Error,
    },
}

/// Options for a buffered run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Working directory for the child
    pub cwd: Option<PathBuf>,

    /// Deadline for the whole run; the child is killed when it expires
    pub timeout: Option<Duration>,

    /// Input written to the child's stdin, then closed
    pub stdin: Option<String>,

    /// Extra environment variables
    pub env: HashMap<String, String>,
}

/// One event from a streaming run. Per-stream ordering matches emission
/// order; no ordering is guaranteed between the two streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Stdout(String),
    Stderr(String),
    /// Always the final event, sent exactly once
    Closed(i32),
}

/// A process known to the registry.
#[derive(Debug, Clone)]
pub struct RegisteredProcess {
    pub pid: Option<u32>,
    pub exe: String,
    pub started_at: DateTime<Utc>,
}

/// Live registry of spawned processes, keyed by a per-spawn uuid.
///
/// Injectable rather than global so tests can run against isolated
/// instances. Removal is idempotent: natural close and a timeout kill can
/// race, and both finalize paths call [`remove`](ProcessRegistry::remove).
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    inner: Mutex<HashMap<String, RegisteredProcess>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, id: &str, pid: Option<u32>, exe: &str) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(
            id.to_string(),
            RegisteredProcess {
                pid,
                exe: exe.to_string(),
                started_at: Utc::now(),
            },
        );
    }

    pub(crate) fn remove(&self, id: &str) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(id);
    }

    /// Whether a process with this id is still registered.
    pub fn contains(&self, id: &str) -> bool {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.contains_key(id)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all live entries.
    pub fn active(&self) -> Vec<(String, RegisteredProcess)> {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Signal every live process and clear the registry. Returns the number
    /// of entries signalled. Fire-and-forget: we do not wait for exits.
    pub fn kill_all(&self) -> usize {
        let drained: Vec<RegisteredProcess> = {
            let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain().map(|(_, v)| v).collect()
        };
        for proc in &drained {
            if let Some(pid) = proc.pid {
                tracing::debug!(pid, exe = %proc.exe, "Terminating process in shutdown sweep");
                terminate_pid(pid);
            }
        }
        drained.len()
    }
}

/// Send a termination signal to a pid without waiting for the exit.
pub(crate) fn terminate_pid(pid: u32) {
    #[cfg(unix)]
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}

/// Handle to a streaming run.
pub struct StreamHandle {
    /// Registry key of the underlying process
    pub id: String,
    pid: Option<u32>,
    cancelled: Arc<AtomicBool>,
}

impl StreamHandle {
    /// Terminate the underlying process. Idempotent; the `Closed` event still
    /// arrives through the normal finalize path once the OS reaps the child.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            if let Some(pid) = self.pid {
                terminate_pid(pid);
            }
        }
    }
}

/// Spawns and supervises agent CLI processes.
pub struct ProcessExecutor {
    registry: Arc<ProcessRegistry>,
}

impl ProcessExecutor {
    pub fn new(registry: Arc<ProcessRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this executor registers spawns in.
    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    fn spawn_child(
        exe: &str,
        args: &[String],
        cwd: Option<&PathBuf>,
        env: &HashMap<String, String>,
        want_stdin: bool,
    ) -> Result<tokio::process::Child, ExecError> {
        let mut cmd = Command::new(exe);
        cmd.args(args)
            .stdin(if want_stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .envs(env)
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        cmd.spawn().map_err(|source| ExecError::Spawn {
            exe: exe.to_string(),
            source,
        })
    }

    /// Run to completion, buffering output.
    ///
    /// Resolves with trimmed stdout/stderr and the exit code; `-1` when the
    /// child died to a signal. On timeout the child is killed, the registry
    /// entry removed, and `ExecError::Timeout` returned.
    pub async fn run(
        &self,
        exe: &str,
        args: &[String],
        opts: &RunOptions,
    ) -> Result<ExecutionResult, ExecError> {
        let mut child = Self::spawn_child(
            exe,
            args,
            opts.cwd.as_ref(),
            &opts.env,
            opts.stdin.is_some(),
        )?;

        let id = uuid::Uuid::new_v4().to_string();
        self.registry.register(&id, child.id(), exe);
        tracing::debug!(%id, exe, pid = ?child.id(), "Spawned buffered process");

        let stdin_pipe = child.stdin.take();
        let mut stdout = child.stdout.take().expect("stdout piped");
        let mut stderr = child.stderr.take().expect("stderr piped");

        // Stdin is fed concurrently with the drain: a prompt larger than the
        // pipe buffer deadlocks both sides if the child fills stdout while we
        // are still blocked writing.
        let input = opts.stdin.as_deref();
        let wait_all = async {
            let feed = async {
                if let (Some(mut pipe), Some(input)) = (stdin_pipe, input) {
                    match pipe.write_all(input.as_bytes()).await {
                        // The child may exit without draining its stdin
                        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                        other => other?,
                    }
                    // Dropping the pipe closes it, signalling end-of-prompt
                }
                Ok::<_, std::io::Error>(())
            };
            let mut out = Vec::new();
            let mut err = Vec::new();
            let (feed_res, out_res, err_res) = tokio::join!(
                feed,
                stdout.read_to_end(&mut out),
                stderr.read_to_end(&mut err)
            );
            feed_res?;
            out_res?;
            err_res?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, out, err))
        };

        let waited = match opts.timeout {
            Some(timeout) => {
                // Bound to a local so the borrow of `child` inside `wait_all`
                // ends before the kill path touches it again.
                let raced = tokio::time::timeout(timeout, wait_all).await;
                match raced {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!(%id, exe, "Process exceeded {}ms timeout, killing", timeout.as_millis());
                        let _ = child.start_kill();
                        self.registry.remove(&id);
                        return Err(ExecError::Timeout { timeout });
                    }
                }
            }
            None => wait_all.await,
        };

        self.registry.remove(&id);

        let (status, out, err) = waited.map_err(|source| ExecError::Io {
            exe: exe.to_string(),
            source,
        })?;

        Ok(ExecutionResult {
            exit_code: status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&out).trim().to_string(),
            stderr: String::from_utf8_lossy(&err).trim().to_string(),
        })
    }

    /// Run with per-line events over a channel instead of buffering.
    ///
    /// The final `Closed` event is sent exactly once, after both streams have
    /// drained. Cancel through the returned handle.
    pub fn run_streaming(
        &self,
        exe: &str,
        args: &[String],
        opts: &RunOptions,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<StreamHandle, ExecError> {
        let mut child = Self::spawn_child(
            exe,
            args,
            opts.cwd.as_ref(),
            &opts.env,
            opts.stdin.is_some(),
        )?;

        let id = uuid::Uuid::new_v4().to_string();
        let pid = child.id();
        self.registry.register(&id, pid, exe);
        tracing::debug!(%id, exe, ?pid, "Spawned streaming process");

        let stdin_input = opts.stdin.clone();
        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let stdout_tx = tx.clone();
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if stdout_tx.send(StreamEvent::Stdout(line)).await.is_err() {
                    break;
                }
            }
        });

        let stderr_tx = tx.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if stderr_tx.send(StreamEvent::Stderr(line)).await.is_err() {
                    break;
                }
            }
        });

        let registry = Arc::clone(&self.registry);
        let registry_id = id.clone();
        tokio::spawn(async move {
            if let Some(input) = stdin_input {
                if let Some(mut stdin) = child.stdin.take() {
                    let _ = stdin.write_all(input.as_bytes()).await;
                }
            }

            let status = child.wait().await;
            // Drain both streams before reporting closure
            let _ = stdout_task.await;
            let _ = stderr_task.await;
            registry.remove(&registry_id);

            let code = match status {
                Ok(status) => status.code().unwrap_or(-1),
                Err(_) => -1,
            };
            let _ = tx.send(StreamEvent::Closed(code)).await;
        });

        Ok(StreamHandle {
            id,
            pid,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn executor() -> ProcessExecutor {
        ProcessExecutor::new(Arc::new(ProcessRegistry::new()))
    }

    #[cfg(unix)]
    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn buffered_run_captures_trimmed_output() {
        let exec = executor();
        let result = exec
            .run("sh", &sh("printf ' hi \\n'"), &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "hi");
        assert!(result.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdin_reaches_the_child_verbatim() {
        let exec = executor();
        let opts = RunOptions {
            stdin: Some("print('hi')".to_string()),
            ..RunOptions::default()
        };
        let result = exec.run("cat", &[], &opts).await.unwrap();
        assert_eq!(result.stdout, "print('hi')");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn oversized_prompt_and_output_do_not_deadlock() {
        let exec = executor();
        // Both directions well past a 64KB pipe buffer, with the child
        // producing all of its output before reading any stdin
        let prompt = "x".repeat(200 * 1024);
        let opts = RunOptions {
            stdin: Some(prompt),
            timeout: Some(Duration::from_secs(10)),
            ..RunOptions::default()
        };
        let script = "dd if=/dev/zero bs=1024 count=200 2>/dev/null | tr '\\0' 'y'; cat -";
        let result = exec.run("sh", &sh(script), &opts).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.len(), 2 * 200 * 1024);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_data_not_an_error() {
        let exec = executor();
        let result = exec
            .run("sh", &sh("echo oops >&2; exit 3"), &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stderr, "oops");
        assert!(!result.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn signal_death_reports_minus_one() {
        let exec = executor();
        let result = exec
            .run("sh", &sh("kill -TERM $$"), &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(result.exit_code, -1);
    }

    #[tokio::test]
    async fn spawn_failure_is_a_spawn_error() {
        let exec = executor();
        let err = exec
            .run(
                "/definitely/not/a/real/binary",
                &[],
                &RunOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
        assert!(exec.registry().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_and_clears_the_registry() {
        let exec = executor();
        let opts = RunOptions {
            timeout: Some(Duration::from_millis(100)),
            ..RunOptions::default()
        };
        let start = Instant::now();
        let err = exec
            .run("sleep", &["5".to_string()], &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(exec.registry().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streaming_delivers_lines_then_closed() {
        let exec = executor();
        let (tx, mut rx) = mpsc::channel(16);
        let _handle = exec
            .run_streaming(
                "sh",
                &sh("printf 'a\\nb\\n'"),
                &RunOptions::default(),
                tx,
            )
            .unwrap();

        let mut lines = Vec::new();
        let mut closed = None;
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Stdout(line) => lines.push(line),
                StreamEvent::Stderr(_) => {}
                StreamEvent::Closed(code) => {
                    closed = Some(code);
                    break;
                }
            }
        }
        assert_eq!(lines, vec!["a", "b"]);
        assert_eq!(closed, Some(0));
        assert!(exec.registry().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_terminates_a_streaming_run() {
        let exec = executor();
        let (tx, mut rx) = mpsc::channel(16);
        let handle = exec
            .run_streaming("sleep", &["30".to_string()], &RunOptions::default(), tx)
            .unwrap();
        assert_eq!(exec.registry().len(), 1);

        handle.cancel();
        handle.cancel(); // idempotent

        let event = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Some(StreamEvent::Closed(code)) => break code,
                    Some(_) => continue,
                    None => break -2,
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(event, -1);
        assert!(exec.registry().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_all_sweeps_every_live_entry() {
        let exec = executor();
        let (tx, _rx) = mpsc::channel(16);
        let _a = exec
            .run_streaming("sleep", &["30".to_string()], &RunOptions::default(), tx.clone())
            .unwrap();
        let _b = exec
            .run_streaming("sleep", &["30".to_string()], &RunOptions::default(), tx)
            .unwrap();
        assert_eq!(exec.registry().len(), 2);

        let swept = exec.registry().kill_all();
        assert_eq!(swept, 2);
        assert!(exec.registry().is_empty());
    }
}
