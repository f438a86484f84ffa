//! Terminal session command implementation

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use coderail::agent::{AgentInvoker, InvokeOptions};
use coderail::config::ConfigStore;
use coderail::ApprovalMode;

/// Open an interactive terminal session with the prompt applied, echoing the
/// session output until the user interrupts.
pub async fn terminal_command(
    store: Arc<ConfigStore>,
    prompt: &str,
    title: &str,
    mode: Option<String>,
) -> Result<()> {
    let invoker = AgentInvoker::new(store);
    let opts = InvokeOptions {
        approval_mode: mode.as_deref().map(ApprovalMode::parse),
        ..InvokeOptions::default()
    };

    let (tx, mut rx) = mpsc::channel(256);
    let handle = invoker.invoke_terminal(prompt, title, &opts, tx).await?;

    loop {
        tokio::select! {
            line = rx.recv() => {
                match line {
                    Some(line) => println!("{line}"),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                handle.kill();
                break;
            }
        }
    }
    Ok(())
}
