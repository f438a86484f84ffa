//! Command and argument construction for the agent CLI.
//!
//! Pure functions only: an [`InvocationConfig`] goes in, an argv vector or a
//! quoted shell line comes out. Nothing here performs I/O or can fail at
//! runtime; malformed paths or model names are the caller's responsibility.
//!
//! Two renderings exist for shell lines. The secure rendering quotes every
//! token for the target dialect and is what the PTY path injects. The legacy
//! rendering keeps flags bare and double-quotes only the simple values (model,
//! working directory) known not to contain metacharacters; the visible
//! terminal path historically needed that human-readable form.

use std::path::Path;

use crate::domain::{ApprovalMode, InvocationConfig, ShellDialect};

/// How a shell line should be escaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStyle {
    /// Every token quoted for the target dialect
    Secure,
    /// Flags bare, simple values double-quoted for readability
    Legacy,
}

/// Builder for agent CLI invocations.
///
/// Stateless; all methods are associated functions so call sites read as
/// `CommandBuilder::build_args(&config)`.
pub struct CommandBuilder;

impl CommandBuilder {
    /// Build the argv for a headless (buffered or streaming) invocation.
    ///
    /// The trailing `-` tells the tool to read the prompt from stdin, which
    /// avoids every quoting problem a prompt-as-argument would create.
    ///
    /// Deterministic: the same config always yields the same vector.
    pub fn build_args(config: &InvocationConfig) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        args.extend(Self::approval_flags(config.approval_mode, QuoteStyle::Secure));

        if let Some(model) = &config.model {
            args.push("-m".to_string());
            args.push(model.clone());
        }

        if let Some(dir) = &config.working_directory {
            args.push("-C".to_string());
            args.push(dir.display().to_string());
        }

        args.push("-".to_string());
        args
    }

    /// Build the argv that re-attaches to the most recent session.
    ///
    /// The interactive terminal flow runs the tool once to apply a prompt,
    /// then immediately resumes the same session for follow-up interaction.
    pub fn build_resume_args(mode: ApprovalMode) -> Vec<String> {
        let mut args = vec!["resume".to_string(), "--last".to_string()];
        args.extend(Self::approval_flags(mode, QuoteStyle::Secure));
        args
    }

    /// Map an approval mode onto sandbox/approval flags.
    ///
    /// Total over all mode values; [`ApprovalMode::parse`] already folds
    /// unknown strings into `Interactive`, so a bad config value degrades to
    /// the most restrictive flags instead of crashing the builder.
    fn approval_flags(mode: ApprovalMode, style: QuoteStyle) -> Vec<String> {
        let flags: &[&str] = match (mode, style) {
            (ApprovalMode::Interactive, QuoteStyle::Secure) => {
                &["--sandbox", "read-only", "--ask-for-approval", "never"]
            }
            // Older tool builds reject `--sandbox` in interactive sessions
            (ApprovalMode::Interactive, QuoteStyle::Legacy) => {
                &["--ask-for-approval", "on-request"]
            }
            (ApprovalMode::AutoEdit, _) => {
                &["--sandbox", "workspace-write", "--ask-for-approval", "on-request"]
            }
            // --full-auto is mutually exclusive with sandbox/approval flags
            (ApprovalMode::FullAuto, _) => &["--full-auto"],
            (ApprovalMode::Yolo, _) => {
                &["--dangerously-bypass-approvals-and-sandbox", "--skip-git-repo-check"]
            }
        };
        flags.iter().map(|s| s.to_string()).collect()
    }

    /// Render a full invocation as one shell line for the given dialect.
    pub fn build_shell_command(
        config: &InvocationConfig,
        dialect: ShellDialect,
        style: QuoteStyle,
    ) -> String {
        let mut tokens = vec![config.tool_path.clone()];
        tokens.push("exec".to_string());
        tokens.extend(Self::approval_flags(config.approval_mode, style));
        if let Some(model) = &config.model {
            tokens.push("-m".to_string());
            tokens.push(model.clone());
        }
        if let Some(dir) = &config.working_directory {
            tokens.push("-C".to_string());
            tokens.push(dir.display().to_string());
        }
        Self::render(&tokens, dialect, style)
    }

    /// Compose the full terminal command line: run the tool once with the
    /// prompt read from a transient file, then resume the session on success.
    pub fn compose_terminal_command(
        config: &InvocationConfig,
        prompt_file: &Path,
        dialect: ShellDialect,
    ) -> String {
        let mut exec_tokens = vec![config.tool_path.clone(), "exec".to_string()];
        exec_tokens.extend(Self::approval_flags(config.approval_mode, QuoteStyle::Secure));
        if let Some(model) = &config.model {
            exec_tokens.push("-m".to_string());
            exec_tokens.push(model.clone());
        }
        if let Some(dir) = &config.working_directory {
            exec_tokens.push("-C".to_string());
            exec_tokens.push(dir.display().to_string());
        }

        let exec_line = Self::render(&exec_tokens, dialect, QuoteStyle::Secure);

        let resume_tokens: Vec<String> = std::iter::once(config.tool_path.clone())
            .chain(Self::build_resume_args(config.approval_mode))
            .collect();
        let resume_line = Self::render(&resume_tokens, dialect, QuoteStyle::Secure);

        let file = prompt_file.display().to_string();
        match dialect {
            ShellDialect::Posix => format!(
                "{exec_line} \"$(cat {})\" && {resume_line}",
                Self::quote_posix(&file)
            ),
            ShellDialect::PowerShell => format!(
                "{exec_line} (Get-Content -Raw {}); if ($?) {{ {resume_line} }}",
                Self::quote_powershell(&file)
            ),
        }
    }

    /// Join tokens into one shell line under the given dialect and style.
    fn render(tokens: &[String], dialect: ShellDialect, style: QuoteStyle) -> String {
        let rendered: Vec<String> = match style {
            QuoteStyle::Secure => tokens
                .iter()
                .map(|t| match dialect {
                    ShellDialect::Posix => Self::quote_posix(t),
                    ShellDialect::PowerShell => Self::quote_powershell(t),
                })
                .collect(),
            QuoteStyle::Legacy => {
                let mut out = Vec::with_capacity(tokens.len());
                let mut quote_next = false;
                for token in tokens {
                    if quote_next {
                        out.push(format!("\"{}\"", token));
                    } else {
                        out.push(token.clone());
                    }
                    quote_next = matches!(token.as_str(), "-m" | "-C");
                }
                out
            }
        };

        let joined = rendered.join(" ");
        // PowerShell needs the call operator to run a quoted executable path
        if dialect == ShellDialect::PowerShell && style == QuoteStyle::Secure {
            format!("& {joined}")
        } else {
            joined
        }
    }

    /// POSIX single-quote escaping: `'` becomes `'\''`.
    pub fn quote_posix(s: &str) -> String {
        format!("'{}'", s.replace('\'', "'\\''"))
    }

    /// PowerShell single-quote escaping: `'` is doubled.
    pub fn quote_powershell(s: &str) -> String {
        format!("'{}'", s.replace('\'', "''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config_with(mode: ApprovalMode) -> InvocationConfig {
        InvocationConfig {
            approval_mode: mode,
            ..InvocationConfig::default()
        }
    }

    /// Reverse of POSIX single-quote escaping, for round-trip checks.
    fn posix_unquote(quoted: &str) -> String {
        assert!(quoted.starts_with('\'') && quoted.ends_with('\''));
        quoted[1..quoted.len() - 1].replace("'\\''", "'")
    }

    #[test]
    fn args_are_deterministic_and_non_empty_for_every_mode() {
        for mode in [
            ApprovalMode::Interactive,
            ApprovalMode::AutoEdit,
            ApprovalMode::FullAuto,
            ApprovalMode::Yolo,
        ] {
            let config = config_with(mode);
            let first = CommandBuilder::build_args(&config);
            let second = CommandBuilder::build_args(&config);
            assert!(!first.is_empty());
            assert_eq!(first, second);
        }
    }

    #[test]
    fn unrecognized_mode_string_builds_interactive_args() {
        let fallback = config_with(ApprovalMode::parse("some-future-mode"));
        let interactive = config_with(ApprovalMode::Interactive);
        assert_eq!(
            CommandBuilder::build_args(&fallback),
            CommandBuilder::build_args(&interactive)
        );
    }

    #[test]
    fn headless_args_end_with_model_and_stdin_sentinel() {
        let config = InvocationConfig {
            model: Some("m1".to_string()),
            ..InvocationConfig::default()
        };
        let args = CommandBuilder::build_args(&config);
        assert_eq!(args.last().unwrap(), "-");
        let m_pos = args.iter().position(|a| a == "-m").unwrap();
        assert_eq!(args[m_pos + 1], "m1");
    }

    #[test]
    fn full_auto_uses_single_flag_without_sandbox() {
        let args = CommandBuilder::build_args(&config_with(ApprovalMode::FullAuto));
        assert!(args.contains(&"--full-auto".to_string()));
        assert!(!args.iter().any(|a| a == "--sandbox"));
        assert!(!args.iter().any(|a| a == "--ask-for-approval"));
    }

    #[test]
    fn yolo_bypasses_sandbox_and_repo_check() {
        let args = CommandBuilder::build_args(&config_with(ApprovalMode::Yolo));
        assert!(args.contains(&"--dangerously-bypass-approvals-and-sandbox".to_string()));
        assert!(args.contains(&"--skip-git-repo-check".to_string()));
    }

    #[test]
    fn resume_args_reattach_to_last_session() {
        let args = CommandBuilder::build_resume_args(ApprovalMode::AutoEdit);
        assert_eq!(&args[..2], &["resume".to_string(), "--last".to_string()]);
        assert!(args.contains(&"workspace-write".to_string()));
    }

    #[test]
    fn posix_quote_round_trips_embedded_single_quotes() {
        for s in ["it's", "'", "a'b'c", "plain", "don''t"] {
            assert_eq!(posix_unquote(&CommandBuilder::quote_posix(s)), s);
        }
    }

    #[test]
    fn powershell_quote_doubles_single_quotes() {
        assert_eq!(CommandBuilder::quote_powershell("it's"), "'it''s'");
        assert_eq!(CommandBuilder::quote_powershell("plain"), "'plain'");
    }

    #[test]
    fn secure_posix_line_quotes_every_token() {
        let config = InvocationConfig {
            model: Some("gpt-5.1-codex".to_string()),
            ..InvocationConfig::default()
        };
        let line =
            CommandBuilder::build_shell_command(&config, ShellDialect::Posix, QuoteStyle::Secure);
        assert!(line.starts_with("'codex' 'exec'"));
        assert!(line.contains("'-m' 'gpt-5.1-codex'"));
    }

    #[test]
    fn secure_powershell_line_uses_call_operator() {
        let line = CommandBuilder::build_shell_command(
            &InvocationConfig::default(),
            ShellDialect::PowerShell,
            QuoteStyle::Secure,
        );
        assert!(line.starts_with("& 'codex'"));
    }

    #[test]
    fn legacy_line_double_quotes_only_simple_values() {
        let config = InvocationConfig {
            model: Some("m1".to_string()),
            working_directory: Some(PathBuf::from("/tmp/work")),
            ..InvocationConfig::default()
        };
        let line =
            CommandBuilder::build_shell_command(&config, ShellDialect::Posix, QuoteStyle::Legacy);
        assert!(line.contains("-m \"m1\""));
        assert!(line.contains("-C \"/tmp/work\""));
        assert!(line.contains("--ask-for-approval on-request"));
        assert!(!line.contains('\''));
    }

    #[test]
    fn terminal_command_reads_prompt_file_and_chains_resume() {
        let config = InvocationConfig::default();
        let prompt = PathBuf::from("/tmp/coderail Prompt.md");

        let posix = CommandBuilder::compose_terminal_command(
            &config,
            &prompt,
            ShellDialect::Posix,
        );
        assert!(posix.contains("\"$(cat '/tmp/coderail Prompt.md')\""));
        assert!(posix.contains("&& 'codex' 'resume' '--last'"));

        let ps = CommandBuilder::compose_terminal_command(
            &config,
            &prompt,
            ShellDialect::PowerShell,
        );
        assert!(ps.contains("(Get-Content -Raw '/tmp/coderail Prompt.md')"));
        assert!(ps.contains("'resume' '--last'"));
    }
}
