mod cli;
mod config;
mod utils;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use cli::{
    list::list_cmd,
    resolve::{check_cmd, resolve_cmd},
    ColorMode,
};
use tracing_subscriber::EnvFilter;

#[derive(
    Parser, Default, Clone, Copy, ValueEnum, strum_macros::Display, strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum RequestedColorMode {
    #[default]
    Auto,
    On,
    Off,
}

#[derive(Parser)]
#[command(name = "modelpool")]
#[command(about = "Inspect and exercise a registry of rate-limited model clients", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    #[arg(long, default_value_t = RequestedColorMode::default())]
    color: RequestedColorMode,
    /// Read the config from this file instead of the default locations
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Log registry activity to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered models
    List(ListArgs),
    /// Build one model client and print where it points
    Resolve(ResolveArgs),
    /// Build every registered model client
    Check,
}

/// Output formats
#[derive(
    Parser, ValueEnum, Default, Clone, Copy, strum_macros::Display, strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum ListingFormat {
    /// Format the output as a table
    #[default]
    Table,
    /// Format the output as JSON
    Json,
    /// Format the output as a table without a header
    HeaderlessTable,
}

#[derive(Parser)]
pub(crate) struct ListArgs {
    /// Output the listing with the specified format
    #[arg(short, long, default_value_t = ListingFormat::default())]
    format: ListingFormat,
    /// Limit listing to the specified pool
    #[arg(short, long)]
    pool: Option<String>,
}

#[derive(Parser)]
pub(crate) struct ResolveArgs {
    /// The model to resolve, as <pool>/<key>
    target: String,
}

fn init_logging(verbose: bool) {
    let filter = match verbose {
        true => EnvFilter::new("modelpool=debug"),
        false => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let color = ColorMode::resolve_auto(cli.color);
    utils::errors::configure_color(color);

    init_logging(cli.verbose);

    let config = config::read_config(cli.config);

    match &cli.command {
        Commands::List(args) => list_cmd(&config, args).await,
        Commands::Resolve(args) => resolve_cmd(&config, args).await,
        Commands::Check => check_cmd(&config).await,
    }
}
