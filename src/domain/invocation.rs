//! Invocation configuration types.
//!
//! An [`InvocationConfig`] is an immutable snapshot describing one call to the
//! external agent CLI. The composition root builds it by merging caller options
//! over the process-wide [`Settings`](crate::config::Settings) defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default binary name of the external agent CLI, shared across platforms.
pub const DEFAULT_TOOL_NAME: &str = "codex";

/// How much the external agent may act without interactive confirmation.
///
/// Maps onto the agent CLI's sandbox and approval flags; see
/// [`CommandBuilder`](crate::agent::CommandBuilder) for the exact flag mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    /// Read-only sandbox, no autonomous edits
    #[default]
    Interactive,
    /// Workspace-write sandbox, ask before escalating
    AutoEdit,
    /// Fully autonomous within the workspace sandbox
    FullAuto,
    /// Bypass all sandboxing and repository safety checks
    Yolo,
}

impl ApprovalMode {
    /// Parse a mode string from configuration or the CLI.
    ///
    /// Total: unrecognized values fall back to [`ApprovalMode::Interactive`]
    /// so a stale or future config value never breaks command building.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "interactive" | "suggest" | "default" => ApprovalMode::Interactive,
            "autoedit" | "auto-edit" => ApprovalMode::AutoEdit,
            "fullauto" | "full-auto" => ApprovalMode::FullAuto,
            "yolo" => ApprovalMode::Yolo,
            _ => ApprovalMode::Interactive,
        }
    }

    /// Canonical lowercase name, the inverse of [`ApprovalMode::parse`].
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalMode::Interactive => "interactive",
            ApprovalMode::AutoEdit => "auto-edit",
            ApprovalMode::FullAuto => "full-auto",
            ApprovalMode::Yolo => "yolo",
        }
    }
}

/// Shell dialect a composed command line targets.
///
/// A function of the target shell, never of the invoking OS: a POSIX shell can
/// run under Windows (git-bash, WSL) and PowerShell runs on every platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellDialect {
    /// sh/bash/zsh/fish single-quote escaping
    Posix,
    /// PowerShell / pwsh double-single-quote escaping
    PowerShell,
}

impl ShellDialect {
    /// Detect the dialect from a shell binary path or name.
    pub fn from_shell_path(shell: &str) -> Self {
        let name = shell
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(shell)
            .to_ascii_lowercase();
        let name = name.strip_suffix(".exe").unwrap_or(&name);
        match name {
            "powershell" | "pwsh" => ShellDialect::PowerShell,
            _ => ShellDialect::Posix,
        }
    }
}

/// Host platform, as far as error classification cares about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
}

impl Platform {
    /// The platform this process is running on.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }
}

/// Immutable description of one agent invocation.
#[derive(Debug, Clone)]
pub struct InvocationConfig {
    /// Path or name of the agent binary
    pub tool_path: String,

    /// Approval/sandbox policy for this run
    pub approval_mode: ApprovalMode,

    /// Model override (`-m` flag); `None` uses the tool's default
    pub model: Option<String>,

    /// Working directory for the agent (`-C` flag)
    pub working_directory: Option<PathBuf>,

    /// Overall invocation timeout; `None` means unbounded
    pub timeout: Option<Duration>,

    /// Explicit shell for terminal presentation, overriding detection
    pub shell_override: Option<String>,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            tool_path: DEFAULT_TOOL_NAME.to_string(),
            approval_mode: ApprovalMode::default(),
            model: None,
            working_directory: None,
            timeout: None,
            shell_override: None,
        }
    }
}
