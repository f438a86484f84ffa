//! Core domain types for coderail

mod error;
mod invocation;
mod outcome;

pub use error::{ClassifiedError, ErrorKind, Severity};
pub use invocation::{
    ApprovalMode, InvocationConfig, Platform, ShellDialect, DEFAULT_TOOL_NAME,
};
pub use outcome::{AvailabilityResult, ExecutionResult, InvocationOutcome};
