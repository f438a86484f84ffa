//! Error classification for agent invocations.
//!
//! Maps a raw error message plus exit code and platform into a typed
//! [`ClassifiedError`]. Pure functions, no I/O, never fails: every input maps
//! to some classification, with Unknown/retryable as the optimistic default
//! since most unclassifiable failures in this domain are transient.
//!
//! Matching is ordered most-specific first: file access, permission, timeout,
//! authentication, rate limit, network, configuration, version, and finally
//! "tool not installed". The not-found category carries localized phrasings
//! because the tool's own launcher error comes from the user's shell and OS
//! locale, not from us.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{ClassifiedError, ErrorKind, Platform, Severity};

/// POSIX shell "command not found" exit code.
pub const EXIT_NOT_FOUND_POSIX: i32 = 127;

/// Windows cmd.exe "not recognized" exit code.
pub const EXIT_NOT_FOUND_WINDOWS: i32 = 9009;

fn patterns(raw: &[&str]) -> Vec<Regex> {
    raw.iter()
        .map(|p| Regex::new(p).expect("invalid builtin classifier pattern"))
        .collect()
}

static FILE_ACCESS: Lazy<Vec<Regex>> = Lazy::new(|| {
    patterns(&[
        r"(?i)\bEISDIR\b",
        r"(?i)\bENOSPC\b",
        r"(?i)\bEMFILE\b",
        r"(?i)\bEROFS\b",
        r"(?i)read-only file system",
        r"(?i)file is locked",
        r"(?i)failed to (read|write|open) file",
        r"(?i)directory not empty",
    ])
});

static PERMISSION: Lazy<Vec<Regex>> = Lazy::new(|| {
    patterns(&[
        r"(?i)permission denied",
        r"(?i)\bEACCES\b",
        r"(?i)\bEPERM\b",
        r"(?i)operation not permitted",
        r"(?i)access is denied",
        r"(?i)os error 13",
    ])
});

static TIMEOUT: Lazy<Vec<Regex>> = Lazy::new(|| {
    patterns(&[
        r"(?i)timed? ?out",
        r"(?i)\bETIMEDOUT\b",
        r"(?i)deadline exceeded",
    ])
});

static AUTH: Lazy<Vec<Regex>> = Lazy::new(|| {
    patterns(&[
        r"(?i)authentication failed",
        r"(?i)unauthorized",
        r"(?i)invalid api key",
        r"(?i)not logged in",
        r"(?i)login required",
        r"(?i)credentials? (rejected|expired)",
        r"\b401\b",
    ])
});

static RATE_LIMIT: Lazy<Vec<Regex>> = Lazy::new(|| {
    patterns(&[
        r"(?i)rate limit",
        r"(?i)too many requests",
        r"(?i)quota exceeded",
        r"\b429\b",
    ])
});

static NETWORK: Lazy<Vec<Regex>> = Lazy::new(|| {
    patterns(&[
        r"(?i)\bECONNREFUSED\b",
        r"(?i)\bECONNRESET\b",
        r"(?i)\bENETUNREACH\b",
        r"(?i)\bEHOSTUNREACH\b",
        r"(?i)getaddrinfo",
        r"(?i)socket hang up",
        r"(?i)network is unreachable",
        r"(?i)dns (lookup|resolution) failed",
        r"(?i)tls handshake",
        r"(?i)connection (refused|reset|closed)",
    ])
});

static CONFIGURATION: Lazy<Vec<Regex>> = Lazy::new(|| {
    patterns(&[
        r"(?i)unexpected argument",
        r"(?i)unknown flag",
        r"(?i)unrecognized option",
        r"(?i)invalid value",
        r"(?i)invalid configuration",
        r"(?i)failed to parse config",
    ])
});

static VERSION: Lazy<Vec<Regex>> = Lazy::new(|| {
    patterns(&[
        r"(?i)minimum supported version",
        r"(?i)unsupported version",
        r"(?i)please (upgrade|update) (the )?\w+ (cli|tool)",
    ])
});

/// "Tool not found" phrasings across shells and locales.
///
/// English POSIX and Windows forms first; the localized entries cover the
/// locales we have actually seen launcher errors from (Japanese, Spanish,
/// Portuguese, French, Russian).
static NOT_FOUND: Lazy<Vec<Regex>> = Lazy::new(|| {
    patterns(&[
        // Our own availability gate phrases this way
        r"(?i)is not installed",
        // English, POSIX shells
        r"(?i)command not found",
        r"(?i)no such file or directory",
        r"(?i)os error 2",
        // English, cmd.exe and PowerShell
        r"(?i)is not recognized as an internal or external command",
        r"(?i)term '[^']*' is not recognized",
        r"(?i)is not recognized as the name of a cmdlet",
        // Japanese
        r"コマンドが見つかりません",
        r"内部コマンドまたは外部コマンド.*として認識されていません",
        // Spanish
        r"(?i)no se reconoce como un comando interno o externo",
        r"(?i)no se encontr\u{f3} la orden",
        // Portuguese
        r"(?i)n\u{e3}o \u{e9} reconhecido como um comando interno\s*ou externo",
        r"(?i)comando n\u{e3}o encontrado",
        // French
        r"(?i)n'est pas reconnu en tant que commande interne\s*ou externe",
        r"(?i)commande introuvable",
        // Russian
        r"не является внутренней или внешней\s*командой",
        r"(?i)команда не найдена",
    ])
});

fn matches_any(patterns: &[Regex], message: &str) -> bool {
    patterns.iter().any(|p| p.is_match(message))
}

/// Whether a message or exit code looks like "the tool is not installed".
///
/// Exit codes 127 (POSIX) and 9009 (cmd.exe) count as strong signals on their
/// own. The mojibake fallback catches localized Windows errors mangled by a
/// codepage mismatch: five or more replacement characters plus the tool name
/// is too garbled to pattern-match but too specific to be anything else.
pub fn looks_like_not_found(
    message: &str,
    exit_code: Option<i32>,
    platform: Platform,
    tool_name: &str,
) -> bool {
    if matches!(exit_code, Some(EXIT_NOT_FOUND_POSIX) | Some(EXIT_NOT_FOUND_WINDOWS)) {
        return true;
    }
    if matches_any(&NOT_FOUND, message) {
        return true;
    }
    // Mojibake heuristic; intentionally conservative, Windows only
    if platform == Platform::Windows {
        let replacement_chars = message.chars().filter(|c| *c == '\u{FFFD}').count();
        if replacement_chars >= 5
            && message.to_lowercase().contains(&tool_name.to_lowercase())
        {
            return true;
        }
    }
    false
}

/// Classify a raw error message into a typed record.
///
/// `tool_name` is the binary name the invocation targeted; it feeds the
/// mojibake heuristic and the remediation text.
pub fn classify(
    message: &str,
    exit_code: Option<i32>,
    platform: Platform,
    tool_name: &str,
) -> ClassifiedError {
    if matches_any(&FILE_ACCESS, message) {
        return ClassifiedError::new(
            ErrorKind::FileAccessError,
            Severity::Medium,
            true,
            message,
            vec![
                "Check that the workspace files are writable and not locked by another process"
                    .to_string(),
                "Free up disk space if the volume is full".to_string(),
            ],
        );
    }

    if matches_any(&PERMISSION, message) {
        return ClassifiedError::new(
            ErrorKind::PermissionDenied,
            Severity::High,
            false,
            message,
            vec![
                format!("Check that {tool_name} is executable (chmod +x on POSIX systems)"),
                "Verify the workspace directory permissions".to_string(),
                "Avoid running the host application with reduced privileges".to_string(),
            ],
        );
    }

    if matches_any(&TIMEOUT, message) {
        return ClassifiedError::new(
            ErrorKind::Timeout,
            Severity::Medium,
            true,
            message,
            vec![
                "Increase timeout_ms in the configuration".to_string(),
                "Break the task into smaller prompts".to_string(),
            ],
        );
    }

    if matches_any(&AUTH, message) {
        return ClassifiedError::new(
            ErrorKind::AuthFailed,
            Severity::High,
            false,
            message,
            vec![
                format!("Run `{tool_name} login` to refresh your credentials"),
                "Check that the configured API key is still valid".to_string(),
            ],
        );
    }

    if matches_any(&RATE_LIMIT, message) {
        return ClassifiedError::new(
            ErrorKind::RateLimited,
            Severity::Medium,
            true,
            message,
            vec![
                "Wait a minute before retrying".to_string(),
                "Reduce the number of concurrent agent invocations".to_string(),
            ],
        );
    }

    if matches_any(&NETWORK, message) {
        return ClassifiedError::new(
            ErrorKind::NetworkError,
            Severity::Medium,
            true,
            message,
            vec![
                "Check your network connection".to_string(),
                "Check proxy and firewall settings if the provider is unreachable".to_string(),
            ],
        );
    }

    if matches_any(&CONFIGURATION, message) {
        return ClassifiedError::new(
            ErrorKind::ConfigurationError,
            Severity::High,
            false,
            message,
            vec![
                "Review the flags and configuration passed to the tool".to_string(),
                format!("Run `{tool_name} --help` to check the supported options"),
            ],
        );
    }

    if matches_any(&VERSION, message) {
        return ClassifiedError::new(
            ErrorKind::VersionIncompatible,
            Severity::High,
            false,
            message,
            vec![format!("Upgrade {tool_name} to the latest release")],
        );
    }

    if looks_like_not_found(message, exit_code, platform, tool_name) {
        return ClassifiedError::new(
            ErrorKind::InstallationMissing,
            Severity::Critical,
            false,
            message,
            vec![
                format!("Install the {tool_name} CLI (e.g. `npm install -g @openai/codex`)"),
                format!("Make sure {tool_name} is on your PATH"),
                "Restart the host application after installing".to_string(),
            ],
        );
    }

    ClassifiedError::new(
        ErrorKind::Unknown,
        Severity::Medium,
        true,
        message,
        vec!["Retry the operation; report the error if it persists".to_string()],
    )
}
