//! # doc-triager CLI
//!
//! Sorts a pile of documents into `evergreen/`, `temporal/` and `unknown/`
//! trees using a language-model classifier, keeping an audit record of
//! every decision in SQLite.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `doc-triager init` | Create the SQLite database and schema |
//! | `doc-triager run` | Triage every supported file under the source directory |
//! | `doc-triager preview <file>` | Show the prompt a run would send for one file |
//!
//! ## Examples
//!
//! ```bash
//! doc-triager --config ./config.toml init
//! doc-triager run --source ./inbox --output ./sorted --dry-run
//! doc-triager run -l 20 --extensions pdf,docx -v
//! doc-triager preview ./inbox/q3-plan.pdf
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use doc_triager::config;
use doc_triager::logging;
use doc_triager::migrate;
use doc_triager::pipeline::{self, RunOptions};

#[derive(Parser)]
#[command(
    name = "doc-triager",
    about = "Sort documents into evergreen, temporal and unknown with an LLM classifier",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(short, long, global = true, default_value = "./config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and schema. Safe to run repeatedly.
    Init,

    /// Triage the source directory.
    Run {
        /// Source directory (overrides `[input] directory`).
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Output directory (overrides `[output] directory`).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Classify and record, but leave files where they are.
        #[arg(long)]
        dry_run: bool,

        /// Debug-level logging.
        #[arg(short, long)]
        verbose: bool,

        /// Process at most N files (overrides `[input] max_files`).
        #[arg(short, long)]
        limit: Option<usize>,

        /// Comma-separated extensions, e.g. `pdf,docx,.md`.
        #[arg(long, value_delimiter = ',')]
        extensions: Option<Vec<String>>,
    },

    /// Print the backend and classification prompt for one file without
    /// calling the model.
    Preview {
        /// File to preview.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg.database.path).await?;
            println!(
                "Database initialized successfully: {}",
                cfg.database.path.display()
            );
        }
        Commands::Run {
            source,
            output,
            dry_run,
            verbose,
            limit,
            extensions,
        } => {
            let cfg = config::resolve_config(cfg, source, output)?;
            logging::init(&cfg.logging, verbose)?;

            let options = RunOptions {
                dry_run,
                limit,
                extensions,
            };
            let summary = pipeline::run_triage(&cfg, &options).await?;

            if dry_run {
                println!("triage (dry-run)");
            } else {
                println!("triage");
            }
            println!("  total: {}", summary.total);
            println!("  evergreen: {}", summary.evergreen);
            println!("  temporal: {}", summary.temporal);
            println!("  unknown: {}", summary.unknown);
            println!("  errors: {}", summary.errors);
            println!("  skipped: {}", summary.skipped);
            println!("ok");
        }
        Commands::Preview { file } => {
            print!("{}", pipeline::render_preview(&cfg, &file)?);
        }
    }

    Ok(())
}
