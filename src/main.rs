//! Binary entry point for briefcast.
//!
//! This binary provides the CLI for compiling topic digests from transcript
//! manifests and inspecting past runs.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, bail};
use briefcast::config::DigestConfig;
use briefcast::io::load_manifest;
use briefcast::models::{DigestResult, DigestStatus, RunSummary};
use briefcast::observability;
use briefcast::security::verify_file;
use briefcast::services::{CancelToken, ChunkSplitter, DigestPipeline, ProseValidator};
use briefcast::storage::{RunRecorder, SqliteRunRecorder};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Briefcast - compiles long transcripts into speech-ready topic digests.
#[derive(Parser)]
#[command(name = "briefcast")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "BRIEFCAST_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Compile digests for one or more topics.
    Digest {
        /// Transcript manifest (JSON array of episodes).
        #[arg(short, long)]
        input: PathBuf,

        /// Topic to digest (repeatable).
        #[arg(short, long = "topic", required = true)]
        topics: Vec<String>,

        /// Write results here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Use this model for every stage.
        #[arg(long)]
        model: Option<String>,
    },

    /// Preview how a transcript is split into chunks.
    Chunks {
        /// Transcript file.
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Run the prose checks on a text file.
    CheckProse {
        /// Text file.
        #[arg(short, long)]
        file: PathBuf,
    },

    /// List recorded runs.
    Runs {
        /// Maximum number of runs to show.
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Verify the HMAC chain of the audit log.
    VerifyAudit {
        /// Audit file (defaults to the configured path).
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Show the effective configuration (secrets masked).
    Config,
}

/// Main entry point.
fn main() -> ExitCode {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    let _observability = match observability::init(&config.logging, cli.verbose) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
fn run_command(command: Commands, config: DigestConfig) -> anyhow::Result<()> {
    match command {
        Commands::Digest {
            input,
            topics,
            output,
            model,
        } => cmd_digest(config, &input, &topics, output.as_deref(), model.as_deref()),
        Commands::Chunks { file } => cmd_chunks(&config, &file),
        Commands::CheckProse { file } => cmd_check_prose(&file),
        Commands::Runs { limit } => cmd_runs(&config, limit),
        Commands::VerifyAudit { file } => cmd_verify_audit(&config, file.as_deref()),
        Commands::Config => cmd_config(&config),
    }
}

/// Loads configuration from an explicit path or the default locations.
fn load_config(path: Option<&Path>) -> briefcast::Result<DigestConfig> {
    match path {
        Some(path) => DigestConfig::load_from_file(path),
        None => DigestConfig::load_default(),
    }
}

/// Digest command.
fn cmd_digest(
    mut config: DigestConfig,
    input: &Path,
    topics: &[String],
    output: Option<&Path>,
    model: Option<&str>,
) -> anyhow::Result<()> {
    if let Some(model) = model {
        config.set_model(model);
    }
    let transcripts = load_manifest(input)
        .with_context(|| format!("loading manifest {}", input.display()))?;
    let pipeline = DigestPipeline::from_config(config).context("building pipeline")?;

    let cancel = pipeline.cancel_token();
    install_interrupt_handler(&cancel);

    let batch = pipeline.run_topics(topics, &transcripts, &cancel)?;
    let results = batch.results;
    write_results(&results, output)?;

    let failed: Vec<&str> = results
        .iter()
        .filter(|r| r.status == DigestStatus::Failed)
        .map(|r| r.topic.as_str())
        .collect();
    for topic in topics {
        if !results.iter().any(|r| &r.topic == topic) && !batch.cancelled.contains(topic) {
            eprintln!("No relevant episodes for '{topic}'");
        }
    }
    if !batch.cancelled.is_empty() {
        bail!(
            "run cancelled; {} topic(s) not completed: {}",
            batch.cancelled.len(),
            batch.cancelled.join(", ")
        );
    }
    if !failed.is_empty() {
        bail!("{} topic(s) failed: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}

/// Cancels `cancel` on Ctrl-C. In-flight calls finish; later stages are skipped.
fn install_interrupt_handler(cancel: &CancelToken) {
    let token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("Interrupted, finishing in-flight work...");
        token.cancel();
    }) {
        tracing::warn!(error = %e, "Failed to install interrupt handler");
    }
}

fn write_results(results: &[DigestResult], output: Option<&Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(results)?;
    match output {
        Some(path) => {
            std::fs::write(path, format!("{json}\n"))
                .with_context(|| format!("writing {}", path.display()))?;
            eprintln!("Wrote {} digest(s) to {}", results.len(), path.display());
        },
        None => println!("{json}"),
    }
    Ok(())
}

/// Chunks command.
fn cmd_chunks(config: &DigestConfig, file: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let splitter = ChunkSplitter::new(config.chunking.chunk_size, config.chunking.chunk_overlap)?;
    let chunks = splitter.split(&text);

    println!(
        "{} chunk(s), size {} overlap {}",
        chunks.len(),
        splitter.chunk_size(),
        splitter.overlap()
    );
    for chunk in &chunks {
        let preview: String = chunk.text.chars().take(60).collect();
        println!(
            "  #{:<3} [{:>7}, {:>7})  {}...",
            chunk.index,
            chunk.char_start,
            chunk.char_end,
            preview.replace('\n', " ")
        );
    }
    Ok(())
}

/// Check-prose command.
fn cmd_check_prose(file: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let issues = ProseValidator::check(&text);
    if issues.is_empty() {
        println!("OK: reads as prose");
        return Ok(());
    }
    for issue in &issues {
        println!("  - {issue}");
    }
    bail!("{} prose issue(s)", issues.len())
}

/// Runs command.
fn cmd_runs(config: &DigestConfig, limit: usize) -> anyhow::Result<()> {
    let db_path = config.database_path();
    if !db_path.exists() {
        println!("No runs recorded yet ({} does not exist)", db_path.display());
        return Ok(());
    }
    let recorder = SqliteRunRecorder::new(&db_path)?;
    let runs = recorder.list_runs(limit)?;
    if runs.is_empty() {
        println!("No runs recorded yet");
        return Ok(());
    }
    for run in &runs {
        print_run(run);
        for stage in recorder.stages_for(&run.run_id)? {
            println!(
                "    {:<20} {:<16} in {:>7} out {:>6} retries {:>2} failures {:>2} {:>7} ms",
                stage.component,
                stage.model,
                stage.tokens_in,
                stage.tokens_out,
                stage.retries,
                stage.failures,
                stage.wall_ms
            );
        }
    }
    Ok(())
}

fn print_run(run: &RunSummary) {
    let when = i64::try_from(run.created_at)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map_or_else(|| run.created_at.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string());
    println!(
        "{when}  {:<8} {}  ({})  included {} excluded {}  {} ms",
        run.status.as_str(),
        run.topic,
        run.run_id,
        run.included_episode_ids.len(),
        run.excluded_episode_ids.len(),
        run.wall_ms
    );
}

/// Verify-audit command.
fn cmd_verify_audit(config: &DigestConfig, file: Option<&Path>) -> anyhow::Result<()> {
    let path = file.map_or_else(|| config.audit_log_path(), Path::to_path_buf);
    let Some(key) = config.audit.hmac_key.as_ref() else {
        bail!("no audit HMAC key configured (set BRIEFCAST_AUDIT_HMAC_KEY)");
    };
    let entries = verify_file(&path, key.expose_secret().as_bytes())
        .with_context(|| format!("verifying {}", path.display()))?;
    println!("OK: {entries} entries verified in {}", path.display());
    Ok(())
}

/// Config command.
fn cmd_config(config: &DigestConfig) -> anyhow::Result<()> {
    println!("{}", config.to_display_toml()?);
    Ok(())
}
