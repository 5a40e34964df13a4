//! KbAgent CLI
//!
//! Offline inspection of persisted task traces and memory snapshots.
//! Exit codes: 0 success; 1 task/verification/I-O failure; 2 invalid input.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use console::style;
use kbagent::memory::ArchiveMemory;
use kbagent::trace::{TraceReader, EVENT_TYPES};
use kbagent::{Error, VERSION};

#[derive(Parser)]
#[command(
    name = "kbagent",
    author = "KbAgent Contributors",
    version = VERSION,
    about = "KbAgent - autonomous LLM agent runtime",
    long_about = None
)]
struct Cli {
    /// Working directory containing the .kb state tree
    #[arg(long, short = 'd', default_value = ".", global = true)]
    dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect persisted task traces
    Trace {
        #[command(subcommand)]
        command: TraceCommands,
    },

    /// Inspect persisted memory snapshots
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },
}

#[derive(Subcommand)]
enum TraceCommands {
    /// Print trace events of one type, in insertion order
    Filter {
        /// Task id (must match ^[A-Za-z0-9_-]+$)
        #[arg(long)]
        task: String,
        /// Event type, e.g. llm:call or tool:execution
        #[arg(long = "type")]
        event_type: String,
    },

    /// Summarize a task trace: event counts per type
    Show {
        /// Task id (must match ^[A-Za-z0-9_-]+$)
        #[arg(long)]
        task: String,
    },
}

#[derive(Subcommand)]
enum MemoryCommands {
    /// Print the persisted fact sheet of a session
    Show {
        /// Session id (must match ^[A-Za-z0-9_-]+$)
        #[arg(long)]
        session: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            if e.is_client_error() {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    match cli.command {
        Commands::Trace { command } => match command {
            TraceCommands::Filter { task, event_type } => {
                let reader = TraceReader::new(&cli.dir);
                let records = reader.filter_by_type(&task, &event_type).map_err(|e| {
                    if matches!(e, Error::InvalidInput(_)) {
                        Error::InvalidInput(format!(
                            "{} (known types: {})",
                            e,
                            EVENT_TYPES.join(", ")
                        ))
                    } else {
                        e
                    }
                })?;
                for record in &records {
                    println!("{}", serde_json::to_string(record)?);
                }
                eprintln!(
                    "{} {} event(s) of type {}",
                    style("ok:").green().bold(),
                    records.len(),
                    event_type
                );
                Ok(())
            }
            TraceCommands::Show { task } => {
                let reader = TraceReader::new(&cli.dir);
                let log = reader.read(&task)?;
                let mut counts: std::collections::BTreeMap<&str, usize> =
                    std::collections::BTreeMap::new();
                for record in &log.records {
                    *counts.entry(record.event.type_name()).or_default() += 1;
                }
                println!("trace {} ({} events)", task, log.records.len());
                for (event_type, count) in counts {
                    println!("  {:<32} {}", event_type, count);
                }
                if log.skipped_lines > 0 {
                    eprintln!(
                        "{} {} malformed line(s) skipped",
                        style("warning:").yellow().bold(),
                        log.skipped_lines
                    );
                }
                Ok(())
            }
        },
        Commands::Memory { command } => match command {
            MemoryCommands::Show { session } => {
                let sheet = ArchiveMemory::load_factsheet(&cli.dir, &session)?;
                println!(
                    "session {} ({} fact(s), ~{} tokens)",
                    session,
                    sheet.len(),
                    sheet.estimated_tokens()
                );
                if !sheet.is_empty() {
                    println!("{}", sheet.render());
                }
                Ok(())
            }
        },
    }
}
