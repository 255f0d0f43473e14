//! rtc-eventlog: operator tool for stored remote-bound RTC event logs.
//!
//! ## Subcommands
//!
//! - `inspect`: Decode a log file's header and metadata
//! - `list`: Show the logs in a logs directory with their age
//! - `prune`: Delete logs past the retention window

mod inspect;
mod logging;
mod stored;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rtc-eventlog")]
#[command(about = "Inspect and maintain stored remote-bound RTC event logs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a stored log file
    Inspect {
        /// Path to the log file
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// List stored logs in a logs directory
    List {
        /// Logs directory (usually <profile>/webrtc_event_logs)
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Delete stored logs older than the retention window
    Prune {
        /// Logs directory (usually <profile>/webrtc_event_logs)
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Inspect { path, json } => inspect::run(&path, json),
        Commands::List { dir, json } => stored::run_list(&dir, json),
        Commands::Prune { dir, json } => stored::run_prune(&dir, json),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "rtc-eventlog failed");
        std::process::exit(1);
    }
}
