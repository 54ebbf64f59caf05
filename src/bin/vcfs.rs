//! # vcfs CLI - Undo and redo for individual files
//!
//! A command-line driver for the vcfs history engine.
//!
//! ## Usage
//! ```bash
//! # Start tracking the current directory
//! vcfs init
//!
//! # Write to a file, replacing or appending
//! vcfs write notes.txt "first draft"
//! vcfs write notes.txt "another line" --append
//!
//! # Step back and forward through its history
//! vcfs rollback notes.txt
//! vcfs redo notes.txt
//!
//! # Inspect
//! vcfs cat notes.txt
//! vcfs versions notes.txt
//! vcfs status
//! ```

use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use vcfs::utils::format_bytes;
use vcfs::{
    HistoryUpdate, PathKey, RedoOutcome, Result, RollbackOutcome, Vcfs, VcfsBuilder, VcfsError,
};

/// vcfs CLI - per-file undo and redo
#[derive(Parser)]
#[command(name = "vcfs")]
#[command(version)]
#[command(about = "Version-controlled files: record every write, undo and redo them")]
#[command(long_about = None)]
struct Cli {
    /// Tracked root directory (defaults to current)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start tracking a directory
    Init {
        /// Recorded writes per file before its history is discarded
        #[arg(long)]
        threshold: Option<u64>,
    },

    /// Write text to a file and record the change
    #[command(alias = "w")]
    Write {
        /// File path, relative to the root
        file: String,

        /// Text to write
        text: String,

        /// Append a new line instead of replacing the content
        #[arg(short, long, conflicts_with = "at")]
        append: bool,

        /// Write at this byte offset, keeping the rest of the file
        #[arg(long)]
        at: Option<u64>,
    },

    /// Print the current content of a file
    Cat {
        /// File path, relative to the root
        file: String,
    },

    /// Print the recorded backward history of a file
    Versions {
        /// File path, relative to the root
        file: String,
    },

    /// Undo the newest recorded write
    #[command(alias = "undo")]
    Rollback {
        /// File path, relative to the root
        file: String,
    },

    /// Redo the newest undone write
    Redo {
        /// File path, relative to the root
        file: String,
    },

    /// Show history status of one file, or of the whole root
    #[command(alias = "st")]
    Status {
        /// File path, relative to the root
        file: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    // Run command
    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e.user_message());
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> Result<()> {
    let root_path = cli.root.unwrap_or_else(|| PathBuf::from("."));

    match cli.command {
        Commands::Init { threshold } => cmd_init(root_path, threshold),
        Commands::Write {
            file,
            text,
            append,
            at,
        } => cmd_write(root_path, &file, &text, append, at),
        Commands::Cat { file } => cmd_cat(root_path, &file),
        Commands::Versions { file } => cmd_versions(root_path, &file),
        Commands::Rollback { file } => cmd_rollback(root_path, &file),
        Commands::Redo { file } => cmd_redo(root_path, &file),
        Commands::Status { file: Some(file) } => cmd_status_file(root_path, &file),
        Commands::Status { file: None } => cmd_status(root_path),
    }
}

/// Start tracking a directory
///
/// Creates the metadata directory. Running it again keeps existing history;
/// passing `--threshold` replaces the stored threshold.
fn cmd_init(root_path: PathBuf, threshold: Option<u64>) -> Result<()> {
    let vcfs = match threshold {
        Some(threshold) => VcfsBuilder::new()
            .compaction_threshold(threshold)
            .build(root_path)?,
        None => Vcfs::init(root_path)?,
    };

    println!("{} Tracking {}", "✓".green().bold(), vcfs.root_path().display().to_string().cyan());
    println!("  Metadata: {}", vcfs.config().meta_path().display());
    println!("  Threshold: {} writes", vcfs.config().compaction_threshold);
    println!("\nNext steps:");
    println!("  - Write to a file: {}", "vcfs write notes.txt \"hello\"".yellow());
    println!("  - Undo it: {}", "vcfs rollback notes.txt".yellow());

    Ok(())
}

/// Write text to a file
///
/// Without flags the whole content is replaced. `--append` adds a newline
/// and the text at the end, `--at` writes the bytes at an offset.
fn cmd_write(root_path: PathBuf, file: &str, text: &str, append: bool, at: Option<u64>) -> Result<()> {
    let vcfs = Vcfs::open(root_path)?;
    let start = Instant::now();

    let report = if append {
        let offset = vcfs.status(file)?.content_len;
        vcfs.record_write(file, format!("\n{}", text).as_bytes(), offset)?
    } else if let Some(offset) = at {
        vcfs.record_write(file, text.as_bytes(), offset)?
    } else {
        vcfs.record_replace(file, text)?
    };

    let note = match report.update {
        HistoryUpdate::Recorded => "recorded".green(),
        HistoryUpdate::Unchanged => "no change".dimmed(),
        HistoryUpdate::Compacted => "history compacted".yellow(),
    };
    println!(
        "{} Wrote {} to {} ({}) in {}",
        "✓".green().bold(),
        format_bytes(report.bytes_written as u64),
        file.cyan(),
        note,
        format_duration(round_millis(start.elapsed()))
    );

    Ok(())
}

/// Print the current content of a file
fn cmd_cat(root_path: PathBuf, file: &str) -> Result<()> {
    let vcfs = Vcfs::open(root_path)?;
    match vcfs.read(file)? {
        Some(content) => print!("{}", content),
        None => println!("{}", format!("{} does not exist", file).yellow()),
    }
    Ok(())
}

/// Print the raw backward log of a file
fn cmd_versions(root_path: PathBuf, file: &str) -> Result<()> {
    let vcfs = Vcfs::open(root_path)?;
    match vcfs.versions(file)? {
        Some(log) if !log.is_empty() => print!("{}", log),
        Some(_) => println!("{}", "History is empty".yellow()),
        None => return Err(VcfsError::NotFound(file.to_string())),
    }
    Ok(())
}

/// Undo the newest recorded write
fn cmd_rollback(root_path: PathBuf, file: &str) -> Result<()> {
    let vcfs = Vcfs::open(root_path)?;

    match vcfs.rollback(file)? {
        RollbackOutcome::Reverted {
            remaining_records,
            forward_depth,
        } => {
            println!("{} Rolled back {}", "✓".green().bold(), file.cyan());
            println!("  Undoable: {}", remaining_records);
            println!("  Redoable: {}", forward_depth);
        }
        RollbackOutcome::NoHistory => {
            println!("{} No history left to roll back for {}", "!".yellow().bold(), file);
        }
    }

    Ok(())
}

/// Redo the newest undone write
fn cmd_redo(root_path: PathBuf, file: &str) -> Result<()> {
    let vcfs = Vcfs::open(root_path)?;

    match vcfs.reverse_rollback(file)? {
        RedoOutcome::Restored { forward_depth, .. } => {
            println!("{} Restored {}", "✓".green().bold(), file.cyan());
            println!("  Redoable: {}", forward_depth);
        }
        RedoOutcome::NoForwardHistory => {
            println!("{} Nothing to redo for {}", "!".yellow().bold(), file);
        }
    }

    Ok(())
}

/// Show history status of one file
fn cmd_status_file(root_path: PathBuf, file: &str) -> Result<()> {
    let vcfs = Vcfs::open(root_path)?;
    let status = vcfs.status(file)?;

    println!("{} {}", "Status of".blue().bold(), file.cyan());
    println!("  Key: {}", status.key);
    println!("  Size: {}", format_bytes(status.content_len));
    println!("  Digest: {}", status.content_digest);
    println!(
        "  Writes since compaction: {} of {}",
        status.counter,
        vcfs.config().compaction_threshold
    );
    println!(
        "  Undoable: {}",
        if status.can_undo() {
            status.backward_records.to_string().green()
        } else {
            "none".dimmed()
        }
    );
    println!(
        "  Redoable: {}",
        if status.can_redo() {
            status.forward_depth.to_string().green()
        } else {
            "none".dimmed()
        }
    );

    Ok(())
}

/// Show the tracked root and every file with history
fn cmd_status(root_path: PathBuf) -> Result<()> {
    let vcfs = Vcfs::open(root_path)?;
    let metadata = vcfs.history().metadata().read().clone();
    let age = (chrono::Utc::now() - metadata.created_at)
        .to_std()
        .unwrap_or_default();

    println!("{}", "vcfs Status:".blue().bold());
    println!("  Root: {}", vcfs.root_path().display());
    println!("  Tracking since: {} ago", format_duration(Duration::from_secs(age.as_secs())));
    println!("  Threshold: {} writes", vcfs.config().compaction_threshold);

    let keys = vcfs.tracked()?;
    println!("\n{}", "Files with history:".bold());
    if keys.is_empty() {
        println!("  {}", "none".dimmed());
    }
    for key in keys {
        // Keys contain no "/", so each one derives to itself
        let key = PathKey::derive(&key)?;
        let history = vcfs.history();
        println!(
            "  {}  {} undoable, {} redoable",
            key.to_string().cyan(),
            history.record_count(&key),
            history.snapshot_count(&key)
        );
    }

    Ok(())
}

fn round_millis(elapsed: Duration) -> Duration {
    Duration::from_millis(elapsed.as_millis() as u64)
}
