use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "coderail")]
#[command(about = "Reliable execution of external CLI coding agents")]
#[command(version)]
struct Cli {
    /// Path to the config file (defaults to ~/.config/coderail/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent headless with a prompt and print the result
    Run {
        /// The prompt to send
        prompt: String,

        /// Model override
        #[arg(short, long)]
        model: Option<String>,

        /// Approval mode: interactive, auto-edit, full-auto, yolo
        #[arg(long)]
        mode: Option<String>,

        /// Working directory for the agent
        #[arg(short = 'C', long)]
        cwd: Option<PathBuf>,

        /// Timeout in milliseconds (0 disables)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Stream output line-by-line instead of buffering
        #[arg(long)]
        stream: bool,
    },

    /// Open an interactive terminal session with the prompt applied
    Terminal {
        /// The prompt to send
        prompt: String,

        /// Session title (used for the transient prompt file name)
        #[arg(long, default_value = "session")]
        title: String,

        /// Approval mode: interactive, auto-edit, full-auto, yolo
        #[arg(long)]
        mode: Option<String>,
    },

    /// Check whether the agent tool is installed and compatible
    Check,

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let store = cli::load_store(cli.config)?;

    match cli.command {
        Commands::Run {
            prompt,
            model,
            mode,
            cwd,
            timeout_ms,
            stream,
        } => {
            cli::run::run_command(store, &prompt, model, mode, cwd, timeout_ms, stream).await?;
        }
        Commands::Terminal {
            prompt,
            title,
            mode,
        } => {
            cli::terminal::terminal_command(store, &prompt, &title, mode).await?;
        }
        Commands::Check => {
            cli::check::check_command(store).await?;
        }
        Commands::Config => {
            cli::config_command(store)?;
        }
    }

    Ok(())
}
