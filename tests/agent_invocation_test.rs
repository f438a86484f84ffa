//! Integration tests for the end-to-end agent invocation flow.
//!
//! Uses a fake agent binary (a shell script) so the full path from prompt to
//! reported file changes runs without the real tool installed.

#![cfg(unix)]

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use coderail::agent::{AgentInvoker, CommandBuilder, InvokeOptions};
use coderail::config::{ConfigStore, Settings};
use coderail::{ApprovalMode, InvocationConfig};

/// Writes an executable fake agent that answers the version probe, records
/// its argv and stdin, and prints a canned modification report.
fn create_fake_agent(dir: &Path) -> PathBuf {
    let tool_path = dir.join("codex");
    let argv_file = dir.join("argv.txt");
    let stdin_file = dir.join("stdin.txt");

    let script = format!(
        "#!/bin/sh\n\
         if [ \"$1\" = \"--version\" ]; then echo 'codex-cli 9.9.9'; exit 0; fi\n\
         printf '%s\\n' \"$@\" > '{argv}'\n\
         cat - > '{stdin}'\n\
         echo 'Modified: a.ts'\n\
         echo 'Created: b.ts'\n\
         echo 'Modified: a.ts'\n",
        argv = argv_file.display(),
        stdin = stdin_file.display(),
    );

    let mut file = fs::File::create(&tool_path).expect("Failed to write fake agent");
    file.write_all(script.as_bytes()).unwrap();
    let mut perms = fs::metadata(&tool_path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&tool_path, perms).unwrap();

    tool_path
}

fn invoker_for(temp: &TempDir) -> AgentInvoker {
    let tool_path = create_fake_agent(temp.path());
    let settings = Settings {
        tool_path: tool_path.display().to_string(),
        minimum_version: "1.0.0".to_string(),
        ..Settings::default()
    };
    AgentInvoker::new(Arc::new(ConfigStore::new(settings)))
}

#[tokio::test]
async fn prompt_reaches_the_agent_verbatim_via_stdin() {
    let temp = TempDir::new().unwrap();
    let invoker = invoker_for(&temp);

    let opts = InvokeOptions {
        model: Some("m1".to_string()),
        ..InvokeOptions::default()
    };
    let outcome = invoker.invoke("print('hi')", &opts).await.unwrap();
    assert!(outcome.result.success());

    let stdin = fs::read_to_string(temp.path().join("stdin.txt")).unwrap();
    assert_eq!(stdin, "print('hi')");

    // The recorded argv ends with `-m m1 ... -`
    let argv: Vec<String> = fs::read_to_string(temp.path().join("argv.txt"))
        .unwrap()
        .lines()
        .map(String::from)
        .collect();
    assert_eq!(argv.last().unwrap(), "-");
    let m_pos = argv.iter().position(|a| a == "-m").unwrap();
    assert_eq!(argv[m_pos + 1], "m1");
}

#[tokio::test]
async fn modification_report_is_deduplicated_in_order() {
    let temp = TempDir::new().unwrap();
    let invoker = invoker_for(&temp);

    let outcome = invoker
        .invoke("touch some files", &InvokeOptions::default())
        .await
        .unwrap();
    assert_eq!(
        outcome.modified_files,
        vec![PathBuf::from("a.ts"), PathBuf::from("b.ts")]
    );
}

#[test]
fn interactive_mode_argv_matches_the_builder_contract() {
    let config = InvocationConfig {
        model: Some("m1".to_string()),
        approval_mode: ApprovalMode::Interactive,
        ..InvocationConfig::default()
    };
    let args = CommandBuilder::build_args(&config);

    assert_eq!(args.first().unwrap(), "exec");
    assert!(args.windows(2).any(|w| w == ["--sandbox", "read-only"]));
    assert!(args.windows(2).any(|w| w == ["-m", "m1"]));
    assert_eq!(args.last().unwrap(), "-");
}
