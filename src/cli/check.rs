//! Check command implementation

use std::sync::Arc;

use anyhow::Result;

use coderail::agent::{AvailabilityChecker, ProcessExecutor, ProcessRegistry};
use coderail::config::ConfigStore;

/// Probe the agent installation and print the verdict.
pub async fn check_command(store: Arc<ConfigStore>) -> Result<()> {
    let settings = store.snapshot();
    let executor = Arc::new(ProcessExecutor::new(Arc::new(ProcessRegistry::new())));
    let checker = AvailabilityChecker::new(executor, &settings);

    let result = checker.check().await;

    match &result.version {
        Some(version) => println!("{} {}", settings.tool_path, version),
        None => println!("{}: no version detected", settings.tool_path),
    }
    println!("installed:  {}", result.is_installed);
    println!("compatible: {} (minimum {})", result.is_compatible, settings.minimum_version);
    println!("available:  {}", result.is_available);

    if let Some(message) = &result.error_message {
        eprintln!("\n{message}");
        for (i, step) in result.remediation.iter().enumerate() {
            eprintln!("  {}. {}", i + 1, step);
        }
        anyhow::bail!("agent tool is not available");
    }
    Ok(())
}
