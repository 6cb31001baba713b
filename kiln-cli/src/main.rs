mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kiln_sandbox::ExecutionLimits;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Run untrusted source snippets in throwaway workspaces")]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Replace the configured limits with a built-in preset
    #[arg(long, global = true, value_enum)]
    pub limits: Option<LimitsPreset>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LimitsPreset {
    /// Small sources, short output and short deadlines
    Strict,
    /// Larger sources and longer deadlines
    Permissive,
}

impl LimitsPreset {
    pub fn limits(self) -> ExecutionLimits {
        match self {
            LimitsPreset::Strict => ExecutionLimits::strict(),
            LimitsPreset::Permissive => ExecutionLimits::permissive(),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a source file ("-" reads stdin)
    Run {
        file: PathBuf,

        /// Language identifier or alias ("auto" detects it)
        #[arg(short, long)]
        lang: Option<String>,

        /// Run-stage timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Screen a source file against the policy without running it
    Check {
        file: PathBuf,

        #[arg(short, long)]
        lang: Option<String>,
    },
    /// Print the detected language of a source file
    Detect { file: PathBuf },
    /// List supported languages
    Languages {
        #[arg(long)]
        json: bool,
    },
    /// Execute several files concurrently through one engine
    Batch {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.verbose, cli.log_file.as_deref())?;

    let sandbox = commands::build_service(cli.config.as_deref(), cli.limits)?;

    match cli.command {
        Commands::Run {
            file,
            lang,
            timeout,
            json,
        } => commands::execute_run(&sandbox, &file, lang, timeout, json).await,
        Commands::Check { file, lang } => commands::execute_check(&sandbox, &file, lang).await,
        Commands::Detect { file } => commands::execute_detect(&sandbox, &file).await,
        Commands::Languages { json } => commands::execute_languages(&sandbox, json),
        Commands::Batch { files, json } => commands::execute_batch(&sandbox, &files, json).await,
    }
}

/// Stderr logging, plus a plain-text file layer when `log_file` is set.
/// The returned guard flushes the file writer on drop.
fn init_tracing(verbose: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = if verbose { "debug" } else { "warn" };

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("Log file path has no file name: {}", path.display()))?;
            let (non_blocking, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(file_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "kiln={},kiln_sandbox={}",
                    log_level, log_level
                ))
            }),
        )
        .init();

    Ok(guard)
}
