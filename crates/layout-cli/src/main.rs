//! `layout` operator/developer CLI.
//!
//! - `layout encode` / `layout decode` - Micro-ID grids
//! - `layout plan` - place a batch onto arrays
//! - `layout redistribute` - re-pack a row at a new start offset
//! - `layout array` - start, complete, retry or abandon an array
//! - `layout row` - show the arrays a row spans

#![forbid(unsafe_code)]

mod array;
mod codec;
mod output;
mod plan;
mod redistribute;
mod row;
mod session;

use clap::{Parser, Subcommand};
use layout_telemetry::{TelemetryConfig, init_telemetry};

use session::SessionArgs;

/// Production layout allocation CLI.
#[derive(Parser)]
#[command(name = "layout")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    session: SessionArgs,

    /// Output JSON instead of human-readable text.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    /// Log filter, overridden by `RUST_LOG`.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Write logs to stderr as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a serial into its 5x5 Micro-ID grid.
    Encode(codec::EncodeArgs),

    /// Decode a 25-bit grid reading back into a serial.
    ///
    /// Any character other than `0` and `1` is ignored, so readings may be
    /// grouped by row: `10001 01010 ...`.
    Decode(codec::DecodeArgs),

    /// Place a batch of items onto arrays.
    ///
    /// Example: layout plan --batch B-0412 --items items.json --offset 4
    Plan(plan::PlanArgs),

    /// Re-pack a row so filling starts at a new slot.
    Redistribute(redistribute::RedistributeArgs),

    /// Drive an array through its work states.
    Array(array::ArrayArgs),

    /// Show the arrays a logical row spans.
    Row(row::RowArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(
        TelemetryConfig::new("layout-cli")
            .with_log_level(cli.log_level.clone())
            .with_json_logs(cli.log_json),
    )?;

    let result = match cli.command {
        Commands::Encode(args) => codec::run_encode(&args, cli.json),
        Commands::Decode(args) => codec::run_decode(&args, cli.json),
        Commands::Plan(args) => plan::run(&cli.session, &args, cli.json),
        Commands::Redistribute(args) => redistribute::run(&cli.session, &args, cli.json),
        Commands::Array(args) => array::run(&cli.session, &args, cli.json),
        Commands::Row(args) => row::run(&cli.session, &args, cli.json),
    };
    if let Err(err) = &result {
        layout_telemetry::log_error!(err, "command failed");
    }
    result
}
