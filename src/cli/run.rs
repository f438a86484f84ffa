//! Headless run command implementation

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;

use coderail::agent::{AgentInvoker, InvokeOptions, StreamEvent, UiHooks};
use coderail::config::ConfigStore;
use coderail::ApprovalMode;

fn hooks() -> UiHooks {
    UiHooks {
        show_guidance: Some(Box::new(|err| {
            eprintln!("error: {}", err.message);
            for (i, step) in err.remediation.iter().enumerate() {
                eprintln!("  {}. {}", i + 1, step);
            }
        })),
        show_progress: Some(Box::new(|message| {
            eprintln!("{message}");
        })),
    }
}

/// Run the agent once with a prompt and print the outcome.
#[allow(clippy::too_many_arguments)]
pub async fn run_command(
    store: Arc<ConfigStore>,
    prompt: &str,
    model: Option<String>,
    mode: Option<String>,
    cwd: Option<PathBuf>,
    timeout_ms: Option<u64>,
    stream: bool,
) -> Result<()> {
    let invoker = AgentInvoker::new(store).with_hooks(hooks());
    let opts = InvokeOptions {
        approval_mode: mode.as_deref().map(ApprovalMode::parse),
        model,
        working_directory: cwd,
        timeout: timeout_ms.and_then(|ms| (ms > 0).then(|| Duration::from_millis(ms))),
        ..InvokeOptions::default()
    };

    if stream {
        let (tx, mut rx) = mpsc::channel(64);
        let _handle = invoker.invoke_streaming(prompt, &opts, tx).await?;
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Stdout(line) => println!("{line}"),
                StreamEvent::Stderr(line) => eprintln!("{line}"),
                StreamEvent::Closed(code) => {
                    if code != 0 {
                        anyhow::bail!("agent exited with code {code}");
                    }
                    break;
                }
            }
        }
        return Ok(());
    }

    let outcome = invoker.invoke(prompt, &opts).await?;
    if !outcome.result.stdout.is_empty() {
        println!("{}", outcome.result.stdout);
    }
    if !outcome.modified_files.is_empty() {
        println!("\nReported file changes:");
        for file in &outcome.modified_files {
            println!("  {}", file.display());
        }
    }
    Ok(())
}
