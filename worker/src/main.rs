use std::{net::SocketAddr, path::PathBuf};

use alpha_chess::{
    model::{Model, ModelKind},
    worker::serve,
};
use clap::Parser;
use log::{error, LevelFilter};
use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Evaluate positions for a search coordinator
#[derive(Parser)]
struct Args {
    /// Address the coordinator listens on
    address: SocketAddr,
    /// Path to the model to load
    model_path: PathBuf,
    /// Kind of model stored at the path
    #[clap(short, long, default_value = "uniform")]
    kind: ModelKind,
    /// Write logs to this file instead of stderr
    #[clap(long)]
    log_file: Option<PathBuf>,
    /// Log debug output
    #[clap(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    match &args.log_file {
        Some(path) => simple_logging::log_to_file(path, level).unwrap_or_else(|err| {
            eprintln!("could not open log file {}: {err}", path.display());
            std::process::exit(1)
        }),
        None => simple_logging::log_to_stderr(level),
    }

    let model = match Model::load(args.kind, &args.model_path) {
        Ok(model) => model,
        Err(err) => {
            error!("could not load {} model from {}: {err}", args.kind, args.model_path.display());
            std::process::exit(1)
        }
    };
    if let Err(err) = serve(args.address, model).await {
        error!("worker failed: {err}");
        std::process::exit(1)
    }
}
