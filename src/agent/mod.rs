//! Agent process execution and retry engine.
//!
//! This module is the core of coderail: everything needed to drive an external
//! CLI coding agent reliably despite flaky availability, localized error
//! output, platform-specific shells, and transient failures.
//!
//! # Architecture
//!
//! Leaves first:
//!
//! - **[`CommandBuilder`]** - pure argv/shell-line construction with
//!   per-dialect quoting. No I/O, cannot fail.
//! - **[`classify`]** - pure error classification into a
//!   [`ClassifiedError`](crate::domain::ClassifiedError) with remediation.
//! - **[`ProcessExecutor`]** - child-process lifecycle: buffered and
//!   streaming runs, timeouts, and the live [`ProcessRegistry`].
//! - **[`TerminalDriver`]** - PTY presentation with delayed command
//!   injection.
//! - **[`RetryOrchestrator`]** - backoff, per-error-kind eligibility, and
//!   lifecycle hooks around any async operation.
//! - **[`AvailabilityChecker`]** - version probe and install heuristics.
//! - **[`AgentInvoker`]** - the composition root tying all of it together.

mod availability;
mod classify;
mod command;
mod exec;
mod invoker;
mod retry;
mod terminal;

pub use availability::{extract_version, parse_minimum, AvailabilityChecker};
pub use classify::{classify, looks_like_not_found, EXIT_NOT_FOUND_POSIX, EXIT_NOT_FOUND_WINDOWS};
pub use command::{CommandBuilder, QuoteStyle};
pub use exec::{
    ExecError, ProcessExecutor, ProcessRegistry, RegisteredProcess, RunOptions, StreamEvent,
    StreamHandle,
};
pub use invoker::{scan_modified_files, AgentInvoker, InvokeOptions, UiHooks};
pub use retry::{ActiveOperation, RetryHooks, RetryOrchestrator, RetryPolicy, RetryRegistry};
pub use terminal::{TerminalDriver, TerminalHandle, TerminalOptions};
