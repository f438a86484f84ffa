//! coderail - reliable execution of external CLI coding agents
//!
//! coderail lets a host application (an editor extension, a TUI, a bot) drive
//! an external command-line coding agent without worrying about the rough
//! edges: whether the tool is installed at all, localized and sometimes
//! garbled launcher errors, shell-dialect quoting, orphaned child processes,
//! and transient provider failures.
//!
//! The entry point is [`agent::AgentInvoker`]:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use coderail::agent::{AgentInvoker, InvokeOptions};
//! use coderail::config::{ConfigStore, Settings};
//!
//! let invoker = AgentInvoker::new(Arc::new(ConfigStore::new(Settings::load()?)));
//! let outcome = invoker.invoke("explain this function", &InvokeOptions::default()).await?;
//! println!("exit {}, {} files touched", outcome.result.exit_code, outcome.modified_files.len());
//! ```

pub mod agent;
pub mod config;
pub mod domain;

pub use domain::*;
