//! ttx-client: drive the Tetrodotoxin analyzer from a terminal.
//!
//! Logs go to stderr (filtered by `RUST_LOG`); command output goes to stdout.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use std::{env, fs};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use ttx_config::TtxConfig;
use ttx_lsp::{TransportKind, TtxClient, path_to_file_uri};

#[derive(Parser)]
#[command(name = "ttx-client")]
#[command(about = "Highlight, format and check Tetrodotoxin sources through the analyzer")]
struct Cli {
    /// Analyzer executable, overriding the configuration
    #[arg(long, global = true)]
    analyzer: Option<PathBuf>,
    /// Talk to the analyzer over stdin/stdout instead of a pipe
    #[arg(long, global = true)]
    stdio: bool,
    /// Workspace root (defaults to the current directory)
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the highlight spans of a file, one per line
    Tokenize {
        file: PathBuf,
    },
    /// Format a file
    Format {
        file: PathBuf,
        /// Write the result back instead of printing it
        #[arg(long)]
        write: bool,
    },
    /// Print diagnostics for a file (exit 1 on errors)
    Check {
        file: PathBuf,
        /// How long to collect diagnostics
        #[arg(long, default_value_t = 2000)]
        wait_ms: u64,
    },
}

impl Commands {
    fn file(&self) -> &Path {
        match self {
            Self::Tokenize { file } | Self::Format { file, .. } | Self::Check { file, .. } => file,
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

/// A source file opened for one command.
struct Source {
    path: PathBuf,
    uri: String,
    text: String,
}

impl Source {
    fn read(file: &Path) -> Result<Self> {
        let path = fs::canonicalize(file)
            .with_context(|| format!("cannot resolve {}", file.display()))?;
        let text = fs::read_to_string(&path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let uri = path_to_file_uri(&path)?.to_string();
        Ok(Self { path, uri, text })
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing();

    let cwd = env::current_dir().context("cannot determine current directory")?;
    let workspace = cli.workspace.clone().unwrap_or_else(|| cwd.clone());
    let mut config = TtxConfig::load(&workspace)
        .context("loading configuration")?
        .analyzer;
    if let Some(analyzer) = cli.analyzer {
        config.command = analyzer;
    }
    if cli.stdio {
        config.transport = TransportKind::Stdio;
    }

    let source = Source::read(cli.command.file())?;
    let client = TtxClient::new(config, workspace).with_base_dir(cwd);
    client.start().await.context("starting analyzer")?;

    let result = run(&client, &cli.command, &source).await;
    client.stop().await;
    result
}

async fn run(client: &TtxClient, command: &Commands, source: &Source) -> Result<ExitCode> {
    client.open_document(&source.uri, &source.text).await?;

    match command {
        Commands::Tokenize { .. } => {
            let decoded = client
                .highlight_spans(&source.uri)
                .await?
                .context("tokenize reply was superseded")?;
            for span in &decoded.spans {
                println!(
                    "{}:{}-{} {}",
                    span.line(),
                    span.start().character,
                    span.end().character,
                    span.category()
                );
            }
            if !decoded.unknown.is_empty() {
                tracing::warn!(count = decoded.unknown.len(), "Skipped tokens of unknown type");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Format { write, .. } => {
            let edits = client.format(&source.uri).await?;
            let mut formatted = source.text.clone();
            for edit in &edits {
                formatted = edit
                    .apply(&formatted)
                    .context("analyzer returned an edit outside the document")?;
            }
            if *write {
                if formatted != source.text {
                    fs::write(&source.path, &formatted)
                        .with_context(|| format!("cannot write {}", source.path.display()))?;
                }
            } else {
                print!("{formatted}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check { wait_ms, .. } => {
            let deadline = tokio::time::Instant::now() + Duration::from_millis(*wait_ms);
            while tokio::time::Instant::now() < deadline {
                client.poll_events(usize::MAX);
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            client.poll_events(usize::MAX);

            let diagnostics = client.inspect_sink(|store| store.get(&source.uri).to_vec());
            for diagnostic in &diagnostics {
                println!("{}", diagnostic.display_with_path(&source.path));
            }
            // Missing severity counts as an error.
            let failed = client.inspect_sink(|store| {
                !store
                    .errors_for(std::slice::from_ref(&source.uri))
                    .is_empty()
            });
            Ok(if failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
    }
}
