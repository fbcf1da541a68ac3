//! # libris CLI
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `libris ingest` | Index every supported file under the source directories |
//! | `libris ask "<question>"` | Answer one question with source attribution |
//! | `libris chat` | Interactive question loop |
//! | `libris stats` | Record and source counts for the collection |
//! | `libris serve` | Start the HTTP endpoint |
//!
//! Settings come from built-in defaults, an optional `--config` TOML file,
//! then environment variables. Logs go to stderr (`RUST_LOG`, default
//! `libris=info`); command output goes to stdout.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use libris::config::Settings;
use libris::error::AnswerError;
use libris::models::{AnswerRequest, AnswerResponse};
use libris::progress::ProgressMode;
use libris::{server, App};

const OFFLINE_NOTICE: &str = "Offline mode active: responses use local heuristics.";

#[derive(Parser)]
#[command(
    name = "libris",
    about = "Ask questions of a local document library",
    version,
    long_about = "libris ingests PDF, EPUB and plain-text files into a local vector index \
    and answers questions grounded in the retrieved passages, using a remote chat model \
    or a deterministic offline responder."
)]
struct Cli {
    /// Optional TOML settings file. Environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Ingestion progress on stderr. Defaults to `human` on a TTY, else `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone, Copy)]
struct GenerationArgs {
    /// Number of passages to retrieve.
    #[arg(short = 'k', long)]
    top_k: Option<usize>,

    /// Sampling temperature.
    #[arg(short = 't', long)]
    temperature: Option<f32>,

    /// Completion token budget.
    #[arg(short = 'm', long)]
    max_tokens: Option<u32>,
}

impl GenerationArgs {
    /// `k=.., temp=.., max_tokens=..` for the flags that were given.
    fn overrides(&self) -> Option<String> {
        let bits: Vec<String> = [
            self.top_k.map(|v| format!("k={}", v)),
            self.temperature.map(|v| format!("temp={}", v)),
            self.max_tokens.map(|v| format!("max_tokens={}", v)),
        ]
        .into_iter()
        .flatten()
        .collect();
        (!bits.is_empty()).then(|| bits.join(", "))
    }

    fn request(&self, question: &str) -> AnswerRequest {
        AnswerRequest {
            question: question.to_string(),
            top_k: self.top_k,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Index source directories.
    ///
    /// Re-ingesting a file replaces its previous records.
    Ingest {
        /// Source directory (repeatable). Defaults to `SOURCE_DIRS`.
        #[arg(short = 's', long = "source")]
        sources: Vec<PathBuf>,
    },

    /// Answer a single question.
    Ask {
        question: String,

        #[command(flatten)]
        generation: GenerationArgs,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,

        /// Do not list retrieved passages after the answer.
        #[arg(long)]
        hide_sources: bool,
    },

    /// Interactive loop; `exit`, `quit` or EOF ends it.
    Chat {
        #[command(flatten)]
        generation: GenerationArgs,

        #[arg(long, overrides_with = "hide_sources")]
        show_sources: bool,

        #[arg(long, overrides_with = "show_sources")]
        hide_sources: bool,
    },

    /// Show record and source counts.
    Stats,

    /// Start the HTTP endpoint on `SERVER_BIND`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("libris=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let app = App::open(settings).await?;

    match cli.command {
        Commands::Ingest { sources } => {
            let dirs = if sources.is_empty() {
                app.settings.source_dirs.clone()
            } else {
                sources
            };
            let mode = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);
            let report = app
                .ingestor()
                .with_progress(Arc::from(mode.reporter()))
                .ingest(&dirs)
                .await;
            println!("ingest");
            println!("  files scanned:  {}", report.scanned);
            println!("  files stored:   {}", report.files);
            println!("  chunks stored:  {}", report.chunks);
            println!("  skipped:        {}", report.skipped);
            println!("  failed:         {}", report.failed);
        }
        Commands::Ask {
            question,
            generation,
            json,
            hide_sources,
        } => {
            let response = app.engine()?.answer(generation.request(&question)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                warn_if_offline(&response);
                print_response(&response, !hide_sources);
            }
        }
        Commands::Chat {
            generation,
            show_sources,
            hide_sources,
        } => {
            run_chat(&app, generation, show_sources || !hide_sources).await?;
        }
        Commands::Stats => {
            let count = app.index.count().await?;
            let sources = app.index.sources().await?;
            println!("collection: {}", app.settings.collection_name);
            println!("  index:    {}", app.settings.index_db_path().display());
            println!("  records:  {}", count);
            println!("  sources:  {}", sources.len());
            for (source, n) in sources {
                println!("    {:<60} {:>6}", source, n);
            }
        }
        Commands::Serve => {
            let bind = app.settings.server_bind.clone();
            server::run_server(app.engine()?, &bind).await?;
        }
    }

    Ok(())
}

async fn run_chat(app: &App, generation: GenerationArgs, show_sources: bool) -> Result<()> {
    let engine = app.engine()?;
    let info = engine.generator_info();
    println!("libris chat. Type 'exit' to quit.");
    println!(
        "Defaults: k={}, temp={}, max_tokens={}",
        app.settings.top_k, app.settings.temperature, app.settings.max_tokens
    );
    println!("Generator: {} ({})", info.mode, info.model);
    if info.mode == "offline" {
        println!("{}", OFFLINE_NOTICE);
    }
    if let Some(overrides) = generation.overrides() {
        println!("Overrides applied: {}", overrides);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\nlibris> ");
        std::io::stdout().flush().context("Failed to flush stdout")?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question.to_lowercase().as_str(), "exit" | "quit") {
            break;
        }

        match engine.answer(generation.request(question)).await {
            Ok(response) => {
                print_response(&response, show_sources);
                println!(
                    "[mode: {} | model: {}]",
                    response.generator.mode, response.generator.model
                );
            }
            Err(e @ (AnswerError::EmptyQuestion | AnswerError::InvalidRequest(_))) => {
                eprintln!("{}", e);
            }
            Err(e) => bail!(e),
        }
    }
    Ok(())
}

fn warn_if_offline(response: &AnswerResponse) {
    if response.generator.mode == "offline" {
        eprintln!("{}", OFFLINE_NOTICE);
    }
}

fn print_response(response: &AnswerResponse, show_sources: bool) {
    println!("{}", response.answer);
    if !show_sources || response.sources.is_empty() {
        return;
    }
    println!("\nRetrieved passages:");
    for (i, s) in response.sources.iter().enumerate() {
        let score = s
            .score
            .map(|v| format!("{:.2}", v))
            .unwrap_or_else(|| "n/a".to_string());
        println!("  [{}] {} (chunk {}, score {})", i + 1, s.source, s.chunk, score);
        if !s.preview.is_empty() {
            println!("      {}", s.preview);
        }
    }
}
