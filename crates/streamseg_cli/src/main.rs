//! `streamseg` reads the operation log of a segment store directory
//! without opening the store itself.
//!
//! ```text
//! streamseg inspect  <DIR> [--segments] [--format json]
//! streamseg verify   <DIR> [--no-replay]
//! streamseg dump-log <DIR> [--from SEQ] [--limit N] [--format json]
//! ```

mod commands;

use clap::{Args, Parser, Subcommand};
use commands::OutputFormat;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "streamseg", version, about = "Operation log tools for StreamSeg stores")]
struct Cli {
    /// Log at debug level regardless of RUST_LOG
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct StoreDir {
    /// Store directory; its ledgers live under `log/`
    dir: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize ledgers, record counts and checkpoints
    Inspect {
        #[command(flatten)]
        store: StoreDir,
        /// Also replay the log and print the segment table
        #[arg(short, long)]
        segments: bool,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Check framing, checksums, decoding and sequence order
    Verify {
        #[command(flatten)]
        store: StoreDir,
        /// Stop after decoding; do not apply records to a segment table
        #[arg(long)]
        no_replay: bool,
    },

    /// Print decoded records
    DumpLog {
        #[command(flatten)]
        store: StoreDir,
        /// First sequence number to print
        #[arg(long, default_value_t = 1)]
        from: u64,
        /// Stop after this many records
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

fn init_logging(verbose: bool) {
    let filter = match verbose {
        true => EnvFilter::new("debug"),
        false => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Inspect {
            store,
            segments,
            format,
        } => commands::inspect::run(&store.dir, segments, format),
        Command::Verify { store, no_replay } => commands::verify::run(&store.dir, !no_replay),
        Command::DumpLog {
            store,
            from,
            limit,
            format,
        } => commands::dump_log::run(&store.dir, limit, from, format),
    }
}
