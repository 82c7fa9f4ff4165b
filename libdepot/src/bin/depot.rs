//! depot CLI: runs a partitioning or insertion request from a JSON file.
//!
//! Usage:
//!   depot partition <request.json> [--config <config.json>]
//!   depot assign <request.json> [--config <config.json>]
//!
//! The response is printed to stdout as JSON. `-` reads the request from
//! stdin.

use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use libdepot::{ClusteringService, Result, ServiceConfig};

#[derive(Parser)]
#[command(name = "depot")]
#[command(about = "Capacity-constrained delivery partitioning", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Service configuration (JSON); defaults are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Pretty-print the response
    #[arg(short, long, global = true)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Partition all deliveries among the drivers
    Partition {
        /// Request file with coords, driversCount, minDeliveries, maxDeliveries
        request: PathBuf,
    },

    /// Add one delivery to an existing partition
    Assign {
        /// Request file with newCoord, clusters, coords
        request: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format(|buf, record| writeln!(buf, "[{:5}] {}", record.level(), record.args()))
        .init();

    match run(&cli) {
        Ok(response) => {
            println!("{response}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<String> {
    let config = match &cli.config {
        Some(path) => ServiceConfig::from_path(path)?,
        None => ServiceConfig::default(),
    };
    let service = ClusteringService::new(config)?;

    let response = match &cli.command {
        Commands::Partition { request } => service.partition_json(&read_request(request)?)?,
        Commands::Assign { request } => service.assign_json(&read_request(request)?)?,
    };
    if cli.pretty {
        let value: serde_json::Value = serde_json::from_str(&response)?;
        return Ok(serde_json::to_string_pretty(&value)?);
    }
    Ok(response)
}

fn read_request(path: &Path) -> Result<String> {
    let mut body = String::new();
    let read = if path == Path::new("-") {
        io::stdin().read_to_string(&mut body).map(|_| ())
    } else {
        fs::read_to_string(path).map(|content| body = content)
    };
    read.map_err(|e| libdepot::Error::validation(format!("cannot read {path:?}: {e}")))?;
    Ok(body)
}
