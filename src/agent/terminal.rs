//! Interactive terminal presentation.
//!
//! Thin by design: opens a PTY running the user's shell, waits out the shell's
//! own startup output, then injects one precomposed command line. All quoting
//! belongs to the command builder; this module never touches argument text.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use portable_pty::{native_pty_system, PtySize};
use tokio::sync::mpsc;

use super::exec::ProcessRegistry;
use crate::domain::ShellDialect;

/// Options for opening a terminal session.
#[derive(Debug, Clone)]
pub struct TerminalOptions {
    /// Working directory for the shell
    pub cwd: Option<PathBuf>,

    /// Explicit shell binary; `None` auto-detects
    pub shell_override: Option<String>,

    /// Grace period before injecting the command. Too short and the shell's
    /// startup banner or profile swallows or mis-parses the injected line.
    pub startup_delay: Duration,

    pub rows: u16,
    pub cols: u16,
}

impl Default for TerminalOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            shell_override: None,
            startup_delay: Duration::from_millis(1_500),
            rows: 24,
            cols: 80,
        }
    }
}

/// Handle to a live terminal session.
///
/// The shell child is tracked in the shared [`ProcessRegistry`] so a shutdown
/// sweep reaches terminal sessions too; the entry is removed on
/// [`kill`](TerminalHandle::kill) or when the session's output hits EOF.
pub struct TerminalHandle {
    writer: Mutex<Box<dyn Write + Send>>,
    child: Mutex<Box<dyn portable_pty::Child + Send + Sync>>,
    // Held so the PTY outlives `open`; dropping the master hangs up the session
    _master: Mutex<Box<dyn portable_pty::MasterPty + Send>>,
    registry: Arc<ProcessRegistry>,
    registry_id: String,
    killed: AtomicBool,
    pid: Option<u32>,
}

impl TerminalHandle {
    /// Write one line of input to the shell, as if typed.
    pub fn write_line(&self, line: &str) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer
            .write_all(line.as_bytes())
            .and_then(|_| writer.write_all(b"\r"))
            .and_then(|_| writer.flush())
            .context("Failed to write to terminal")
    }

    /// Terminate the shell. Idempotent.
    pub fn kill(&self) {
        if !self.killed.swap(true, Ordering::SeqCst) {
            let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
            let _ = child.kill();
            self.registry.remove(&self.registry_id);
        }
    }

    /// OS pid of the shell process, when the PTY layer reports one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// Opens interactive terminal surfaces for agent sessions.
pub struct TerminalDriver;

impl TerminalDriver {
    /// Resolve the shell binary a session should run.
    pub fn resolve_shell(shell_override: Option<&str>) -> String {
        if let Some(shell) = shell_override {
            if !shell.trim().is_empty() {
                return shell.to_string();
            }
        }
        if cfg!(target_os = "windows") {
            "powershell.exe".to_string()
        } else {
            std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string())
        }
    }

    /// Dialect of the shell a session with these options would run.
    pub fn dialect_for(opts: &TerminalOptions) -> ShellDialect {
        ShellDialect::from_shell_path(&Self::resolve_shell(opts.shell_override.as_deref()))
    }

    /// Open a shell in a PTY, forward its output line-by-line over `output_tx`,
    /// and inject `command_line` after the startup grace period.
    pub async fn open(
        command_line: &str,
        opts: &TerminalOptions,
        output_tx: mpsc::Sender<String>,
        registry: Arc<ProcessRegistry>,
    ) -> Result<TerminalHandle> {
        let shell = Self::resolve_shell(opts.shell_override.as_deref());

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: opts.rows,
                cols: opts.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to open PTY")?;

        let mut cmd = portable_pty::CommandBuilder::new(&shell);
        if let Some(dir) = &opts.cwd {
            cmd.cwd(dir);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("Failed to spawn {shell} in PTY"))?;
        let pid = child.process_id();
        let registry_id = uuid::Uuid::new_v4().to_string();
        registry.register(&registry_id, pid, &shell);
        tracing::debug!(shell, ?pid, "Opened terminal session");

        let reader = pair
            .master
            .try_clone_reader()
            .context("Failed to clone PTY reader")?;
        let writer = pair
            .master
            .take_writer()
            .context("Failed to take PTY writer")?;

        // PTY reads are blocking; a plain thread forwarding into the async
        // channel matches how the rest of the engine consumes output.
        let reader_registry = Arc::clone(&registry);
        let reader_registry_id = registry_id.clone();
        std::thread::spawn(move || {
            let buf_reader = BufReader::new(reader);
            for line in buf_reader.lines() {
                match line {
                    Ok(text) => {
                        if output_tx.blocking_send(text).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            // EOF: the shell is gone, drop it from the sweep set
            reader_registry.remove(&reader_registry_id);
        });

        let handle = TerminalHandle {
            writer: Mutex::new(writer),
            child: Mutex::new(child),
            _master: Mutex::new(pair.master),
            registry,
            registry_id,
            killed: AtomicBool::new(false),
            pid,
        };

        tokio::time::sleep(opts.startup_delay).await;
        handle.write_line(command_line)?;

        Ok(handle)
    }
}
