//! Statebrain CLI
//!
//! Create, inspect and score fuzzy Markov blocks stored as JSON.

use anyhow::{Context, Result, ensure};
use clap::{Parser, Subcommand};
use colored::*;
use statebrain::{
    Block, BlockConfig, BlockReport, DEFAULT_MASS_THRESHOLD, deserialize_block,
    negative_log_likelihood, one_hot, run_sequence,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "statebrain")]
#[command(author, version, about = "Fuzzy Markov chain blocks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a randomly initialized block and save it
    Init {
        /// Output model file (.json)
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Number of input/output symbols
        #[arg(short, long, default_value_t = 256, env = "STATEBRAIN_ALPHABET")]
        alphabet: usize,

        /// Number of latent states
        #[arg(short, long, default_value_t = 16, env = "STATEBRAIN_STATES")]
        states: usize,

        /// Seed for reproducible initialization
        #[arg(long, env = "STATEBRAIN_SEED")]
        seed: Option<u64>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the most likely start states and per-state outputs
    Analyze {
        /// Model file written by `init` or a trainer
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Stop listing once the cumulative probability exceeds this
        #[arg(short, long, default_value_t = DEFAULT_MASS_THRESHOLD)]
        threshold: f64,

        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Negative log-likelihood of predicting each next byte of TEXT
    Score {
        /// Model file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Text to score
        #[arg(value_name = "TEXT")]
        text: String,
    },
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init {
            output,
            alphabet,
            states,
            seed,
            force,
        } => init_command(&output, alphabet, states, seed, force),
        Commands::Analyze {
            file,
            threshold,
            json,
        } => analyze_command(&file, threshold, json),
        Commands::Score { file, text } => score_command(&file, &text),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("STATEBRAIN_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| "statebrain=info".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_block(path: &Path) -> Result<Block> {
    let data = fs::read(path).with_context(|| format!("Failed to read file {}", path.display()))?;
    deserialize_block(&data).context("Failed to deserialize")
}

fn init_command(
    output: &Path,
    alphabet: usize,
    states: usize,
    seed: Option<u64>,
    force: bool,
) -> Result<()> {
    ensure!(
        force || !output.exists(),
        "{} already exists (use --force to overwrite)",
        output.display()
    );

    let mut config = BlockConfig::new(alphabet, states);
    config.seed = seed;
    let block = Block::with_config(&config).context("Invalid block configuration")?;
    block
        .save(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    tracing::info!(path = %output.display(), alphabet, states, "initialized block");
    println!(
        "{} {} ({} symbols, {} states, {} parameters)",
        "Created".green().bold(),
        output.display(),
        alphabet,
        states,
        block.parameters().iter().map(|p| p.len()).sum::<usize>()
    );
    Ok(())
}

fn analyze_command(file: &Path, threshold: f64, json: bool) -> Result<()> {
    ensure!(
        threshold.is_finite() && threshold >= 0.0,
        "threshold must be a non-negative number, got {threshold}"
    );
    let block = load_block(file)?;
    let report = BlockReport::from_block(&block, threshold);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}

fn score_command(file: &Path, text: &str) -> Result<()> {
    let block = load_block(file)?;
    let bytes = text.as_bytes();
    ensure!(bytes.len() >= 2, "need at least two bytes to score");
    if let Some(&b) = bytes.iter().find(|&&b| usize::from(b) >= block.alphabet_size()) {
        anyhow::bail!(
            "byte 0x{:02x} is outside the model's alphabet of {} symbols",
            b,
            block.alphabet_size()
        );
    }

    let inputs: Vec<_> = bytes[..bytes.len() - 1]
        .iter()
        .map(|&b| one_hot(usize::from(b), block.alphabet_size()))
        .collect();
    let targets: Vec<usize> = bytes[1..].iter().map(|&b| usize::from(b)).collect();

    let run = run_sequence(&block, &inputs)?;
    let (loss, _) = negative_log_likelihood(&run.outputs(), &targets)?;
    let per_symbol = loss / targets.len() as f64;

    println!("{} {}", "Predictions:".bold(), targets.len());
    println!("{} {:.4} nats", "Total NLL:".bold(), loss);
    println!(
        "{} {:.4} nats ({:.4} bits)",
        "Per symbol:".bold(),
        per_symbol,
        per_symbol / std::f64::consts::LN_2
    );
    Ok(())
}
