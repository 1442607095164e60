//! jitlog command-line tool
//!
//! Reads the compilation log of a tiered JIT compiler and prints method
//! histories, inline trees, inlining suggestions, ranked top lists and
//! native-code correlations as plain text.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use commands::GlobalArgs;

#[derive(Parser)]
#[command(name = "jitlog")]
#[command(about = "Inspect JIT compilation logs", long_about = None)]
#[command(version)]
struct Cli {
    /// Engine configuration file (defaults to ./jitlog.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// When to use colors
    #[arg(long, global = true, default_value = "auto", value_parser = ["auto", "always", "never"])]
    color: String,

    /// Keep reading the log while the VM is still writing it
    #[arg(long, global = true)]
    follow: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Statistics and anomalies of a log
    Summary {
        /// Compilation log
        log: PathBuf,
        /// Print the statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compiled methods with their task counts
    Methods {
        /// Compilation log
        log: PathBuf,
        /// Only methods whose signature contains this text
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Compilation history of one method
    History {
        /// Compilation log
        log: PathBuf,
        /// `class method descriptor`, or any unique part of it
        method: String,
    },

    /// Inline tree of one compile task
    Tree {
        /// Compilation log
        log: PathBuf,
        /// Compile id
        compile_id: u64,
    },

    /// Inlining suggestions for one task, or grouped over the whole log
    Suggest {
        /// Compilation log
        log: PathBuf,
        /// Compile id (omit to group failures across all methods)
        compile_id: Option<u64>,
    },

    /// Map emitted instructions back to bytecode
    Correlate {
        /// Compilation log
        log: PathBuf,
        /// Compile id
        compile_id: u64,
    },

    /// Ranked lists: largest methods, slowest compiles, common failure reasons
    Top {
        /// Compilation log
        log: PathBuf,
        /// One list (omit to print all of them)
        #[arg(value_parser = [
            "largest-native",
            "largest-bytecode",
            "slowest-compiles",
            "most-decompiled",
            "inline-failure-reasons",
            "intrinsics",
            "hot-throws",
        ])]
        list: Option<String>,
        /// Entries per list
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },

    /// Allocations or locks removed by the compiler
    Report {
        /// Compilation log
        log: PathBuf,
        #[arg(default_value = "allocations", value_parser = ["allocations", "locks"])]
        kind: String,
    },

    /// Parse a log and save the result as a snapshot
    Export {
        /// Compilation log
        log: PathBuf,
        /// Snapshot file to write
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Summarize a saved snapshot
    Load {
        /// Snapshot file
        snapshot: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_env("JITLOG_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let globals = GlobalArgs {
        config: cli.config,
        color: cli.color,
        follow: cli.follow,
    };

    match cli.command {
        Commands::Summary { log, json } => commands::summary::execute(&globals, log, json),
        Commands::Methods { log, filter } => commands::methods::execute(&globals, log, filter),
        Commands::History { log, method } => commands::history::execute(&globals, log, method),
        Commands::Tree { log, compile_id } => commands::tree::execute(&globals, log, compile_id),
        Commands::Suggest { log, compile_id } => {
            commands::suggest::execute(&globals, log, compile_id)
        }
        Commands::Correlate { log, compile_id } => {
            commands::correlate::execute(&globals, log, compile_id)
        }
        Commands::Top { log, list, limit } => commands::top::execute(&globals, log, list, limit),
        Commands::Report { log, kind } => commands::report::execute(&globals, log, kind),
        Commands::Export { log, output } => commands::export::execute(&globals, log, output),
        Commands::Load { snapshot } => commands::load::execute(&globals, snapshot),
    }
}
