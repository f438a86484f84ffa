//! Classified error types.
//!
//! The classifier turns raw tool output into a [`ClassifiedError`]: a typed
//! kind, a severity, a retryability flag, and ordered remediation steps the UI
//! layer can render as-is.

use std::fmt;

/// Category of a failed agent invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The agent binary is not installed or not on PATH
    InstallationMissing,
    /// The installed agent is older than the supported minimum
    VersionIncompatible,
    /// The OS refused to run or signal the binary
    PermissionDenied,
    /// The invocation exceeded its deadline
    Timeout,
    /// The agent rejected the stored credentials
    AuthFailed,
    /// Provider-side throttling
    RateLimited,
    /// Connectivity failure between the agent and its provider
    NetworkError,
    /// The agent could not read or write a workspace file
    FileAccessError,
    /// The agent rejected its own flags or config
    ConfigurationError,
    /// The agent ran and reported a non-zero exit we could not narrow down
    ExecutionFailed,
    /// Anything else
    Unknown,
}

impl ErrorKind {
    /// Kinds that deterministically fail again on retry.
    ///
    /// Enforced inside [`ClassifiedError::new`] rather than left to callers:
    /// retrying a missing install wastes time and misleads the user into
    /// thinking the system is still trying.
    pub fn is_inherently_non_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::InstallationMissing
                | ErrorKind::VersionIncompatible
                | ErrorKind::PermissionDenied
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InstallationMissing => "installation-missing",
            ErrorKind::VersionIncompatible => "version-incompatible",
            ErrorKind::PermissionDenied => "permission-denied",
            ErrorKind::Timeout => "timeout",
            ErrorKind::AuthFailed => "auth-failed",
            ErrorKind::RateLimited => "rate-limited",
            ErrorKind::NetworkError => "network-error",
            ErrorKind::FileAccessError => "file-access-error",
            ErrorKind::ConfigurationError => "configuration-error",
            ErrorKind::ExecutionFailed => "execution-failed",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// How loudly a failure should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A fully classified invocation failure.
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    /// Error category
    pub kind: ErrorKind,

    /// Surfacing priority
    pub severity: Severity,

    /// Whether a retry has any chance of succeeding
    pub is_retryable: bool,

    /// The original error message, preserved verbatim
    pub message: String,

    /// Ordered user-facing remediation steps
    pub remediation: Vec<String>,
}

impl ClassifiedError {
    /// Build a classified error, enforcing the non-retryable invariant for
    /// installation, version, and permission failures.
    pub fn new(
        kind: ErrorKind,
        severity: Severity,
        is_retryable: bool,
        message: impl Into<String>,
        remediation: Vec<String>,
    ) -> Self {
        let is_retryable = is_retryable && !kind.is_inherently_non_retryable();
        Self {
            kind,
            severity,
            is_retryable,
            message: message.into(),
            remediation,
        }
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ClassifiedError {}
