//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了CLI命令行接口。

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "oxsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(long, global = true, default_value = "warn", help = "Log filter (RUST_LOG wins)")]
    pub log: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(name = "check", about = "Validate a sync configuration file")]
    Check(CheckArgs),

    #[command(name = "keys", about = "Print the query key and policy of each configured query")]
    Keys(KeysArgs),

    #[command(name = "decide", about = "Evaluate a cache policy for a given state")]
    Decide(DecideArgs),
}

#[derive(Parser, Debug)]
pub struct CheckArgs {
    #[arg(short, long, help = "Path to the TOML configuration")]
    pub config: PathBuf,
}

#[derive(Parser, Debug)]
pub struct KeysArgs {
    #[arg(short, long, help = "Path to the TOML configuration")]
    pub config: PathBuf,

    #[arg(short, long, help = "Output in JSON format")]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct DecideArgs {
    #[arg(short, long, value_enum, help = "Cache policy to evaluate")]
    pub policy: PolicyKind,

    #[arg(
        short,
        long,
        default_value_t = 300,
        allow_negative_numbers = true,
        help = "stale_after / ttl in seconds"
    )]
    pub threshold_secs: i64,

    #[arg(
        short,
        long,
        allow_negative_numbers = true,
        help = "Seconds since the last sync; omit for never synced"
    )]
    pub age_secs: Option<i64>,

    #[arg(long, help = "A refresh is already in flight")]
    pub in_flight: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyKind {
    LocalOnly,
    StaleWhileRevalidate,
    CacheFirst,
    NetworkFirst,
}

mod check;
mod decide;
mod keys;

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    crate::telemetry::init_tracing("oxsync", &cli.log);

    match &cli.command {
        Commands::Check(args) => check::execute(args).await,
        Commands::Keys(args) => keys::execute(args).await,
        Commands::Decide(args) => decide::execute(args).await,
    }
}
