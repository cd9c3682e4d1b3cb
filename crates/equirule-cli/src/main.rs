//! Equirule CLI
//!
//! - `enumerate`: discover rewrite rules for one template pair
//! - `batch`: enumerate many pairs from a JSON file in parallel

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use equirule_search::{
    enumerate_pair, enumerate_pairs, BatchConfig, EnumeratorConfig, IsomorphismOracle, RuleSink,
    TemplatePair,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::Level;

#[derive(Parser)]
#[command(name = "equirule")]
#[command(author, version, about = "Equirule: rewrite-rule discovery over query templates")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enumerate the rules relating two templates and print one per line.
    Enumerate {
        /// Source template, e.g. `Filter<p0 a0>(Input<t0>)`
        #[arg(long)]
        source: String,
        /// Target template
        #[arg(long)]
        target: String,
        /// Wall-clock budget in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Record every reached leaf without consulting the oracle
        #[arg(long)]
        dry_run: bool,
        /// Enumerator settings (JSON); flags override it
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Enumerate every pair of a `[{"source": .., "target": ..}]` file.
    Batch {
        /// Input pairs (JSON)
        #[arg(long)]
        input: PathBuf,
        /// Output rules file (stdout when omitted)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Worker threads
        #[arg(long)]
        threads: Option<usize>,
        /// Batch settings (JSON); flags override it
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Enumerate {
            source,
            target,
            timeout_ms,
            dry_run,
            config,
        } => {
            let mut config: EnumeratorConfig = match config {
                Some(path) => read_json(&path)?,
                None => EnumeratorConfig::default(),
            };
            if timeout_ms.is_some() {
                config.timeout_ms = timeout_ms;
            }
            config.dry_run |= dry_run;
            cmd_enumerate(&source, &target, &config)
        }
        Commands::Batch {
            input,
            out,
            threads,
            config,
        } => {
            let mut config: BatchConfig = match config {
                Some(path) => read_json(&path)?,
                None => BatchConfig::default(),
            };
            if threads.is_some() {
                config.threads = threads;
            }
            cmd_batch(&input, out.as_deref(), &config)
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

fn cmd_enumerate(source: &str, target: &str, config: &EnumeratorConfig) -> Result<()> {
    let outcome = enumerate_pair(source, target, config, &IsomorphismOracle)
        .with_context(|| format!("failed to enumerate `{source}` vs `{target}`"))?;
    for rule in &outcome.rules {
        println!("{rule}");
    }
    let status = if outcome.timed_out {
        "timeout".yellow().bold()
    } else {
        "ok".green().bold()
    };
    eprintln!(
        "{} {} rule(s), {} oracle call(s), {} cache hit(s)",
        status,
        outcome.rules.len(),
        outcome.stats.oracle_calls,
        outcome.stats.cache_hits
    );
    Ok(())
}

fn cmd_batch(input: &Path, out: Option<&Path>, config: &BatchConfig) -> Result<()> {
    let pairs: Vec<TemplatePair> = read_json(input)?;
    let sink = RuleSink::new();
    let report = enumerate_pairs(&pairs, config, &IsomorphismOracle, &sink)
        .context("batch enumeration failed")?;

    let mut text = sink.into_rules().join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    match out {
        Some(path) => {
            fs::write(path, &text).with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("{} {}", "wrote".green().bold(), path.display().to_string().bold());
        }
        None => print!("{text}"),
    }
    eprintln!(
        "{} {} pair(s): {} enumerated, {} skipped, {} timed out, {} rule(s)",
        "ok".green().bold(),
        report.pairs,
        report.enumerated,
        report.skipped,
        report.timed_out,
        report.rules
    );
    Ok(())
}
