//! Configuration loading and management.
//!
//! Settings are a flat toml snapshot consumed by the execution engine. The
//! engine never persists settings itself; the host application owns the file
//! and tells us when it changed via [`ConfigStore::reload`]. Components read an
//! immutable [`Settings`] snapshot, never the store directly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::DEFAULT_TOOL_NAME;

/// Process-wide defaults for agent invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path or name of the agent binary
    #[serde(default = "default_tool_path")]
    pub tool_path: String,

    /// Default approval mode name (parsed leniently, unknown → interactive)
    #[serde(default = "default_approval_mode")]
    pub default_approval_mode: String,

    /// Default model override; empty means the tool's own default
    #[serde(default)]
    pub default_model: Option<String>,

    /// Invocation timeout in milliseconds; 0 disables the timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Grace period before injecting a command into a fresh terminal.
    /// Too short and the shell's own startup output swallows the injected line.
    #[serde(default = "default_terminal_startup_delay_ms")]
    pub terminal_startup_delay_ms: u64,

    /// Explicit shell binary for terminal sessions; empty means auto-detect
    #[serde(default)]
    pub shell_override: Option<String>,

    /// Minimum supported tool version, e.g. "0.20.0"
    #[serde(default = "default_minimum_version")]
    pub minimum_version: String,

    /// Directory for transient prompt files; empty means the OS temp dir
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,

    /// Extra environment variables for spawned agent processes
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_tool_path() -> String {
    DEFAULT_TOOL_NAME.to_string()
}

fn default_approval_mode() -> String {
    "interactive".to_string()
}

fn default_timeout_ms() -> u64 {
    120_000
}

fn default_terminal_startup_delay_ms() -> u64 {
    1_500
}

fn default_minimum_version() -> String {
    "0.20.0".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tool_path: default_tool_path(),
            default_approval_mode: default_approval_mode(),
            default_model: None,
            timeout_ms: default_timeout_ms(),
            terminal_startup_delay_ms: default_terminal_startup_delay_ms(),
            shell_override: None,
            minimum_version: default_minimum_version(),
            storage_dir: None,
            env: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load settings from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(settings)
    }

    /// Load settings from the default location, falling back to defaults when
    /// no file exists.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Default config file location: `~/.config/coderail/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("coderail/config.toml"))
    }

    /// The invocation timeout as a `Duration`, `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    /// Terminal injection grace period.
    pub fn terminal_startup_delay(&self) -> Duration {
        Duration::from_millis(self.terminal_startup_delay_ms)
    }

    /// Directory for transient prompt files.
    pub fn storage_dir(&self) -> PathBuf {
        self.storage_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Mutable home of the process-wide [`Settings`].
///
/// The only ambient mutable configuration state in the engine. Owned by the
/// composition root; everything else receives a cloned snapshot. Each
/// successful [`reload`](ConfigStore::reload) bumps a generation counter so
/// long-lived callers can detect staleness.
#[derive(Debug)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    inner: RwLock<Settings>,
    generation: AtomicU64,
}

impl ConfigStore {
    /// Create a store around an already-loaded snapshot.
    pub fn new(settings: Settings) -> Self {
        Self {
            path: None,
            inner: RwLock::new(settings),
            generation: AtomicU64::new(0),
        }
    }

    /// Create a store backed by a config file, loading it immediately.
    /// A missing file is not an error; defaults apply until it appears.
    pub fn from_path(path: PathBuf) -> Result<Self> {
        let settings = if path.exists() {
            Settings::from_file(&path)?
        } else {
            Settings::default()
        };
        Ok(Self {
            path: Some(path),
            inner: RwLock::new(settings),
            generation: AtomicU64::new(0),
        })
    }

    /// Current settings snapshot.
    pub fn snapshot(&self) -> Settings {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Re-read the backing file after an external change notification.
    pub fn reload(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let settings = if path.exists() {
            Settings::from_file(path)?
        } else {
            Settings::default()
        };
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = settings;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(generation, "Reloaded settings from {}", path.display());
        Ok(())
    }

    /// Monotonic counter of completed reloads.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}
