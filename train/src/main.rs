use std::{env::current_exe, process::exit};

#[cfg(feature = "torch")]
use alpha_chess::use_cuda;
use alpha_chess::{config::Config, repr::ChessPosition};
use clap::Parser;
use cli::Args;
use disk::DataDir;
use error::TrainerError;
use log::{debug, error, info, LevelFilter};
use mimalloc::MiMalloc;
use status::StatusBoard;
use tokio::{select, signal::ctrl_c};
use training_loop::Trainer;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

mod cli;
mod disk;
mod error;
mod pit;
mod self_play;
mod status;
mod training_loop;

const WORKER_PROGRAM: &str = "worker";

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    match &args.log_file {
        Some(path) => {
            if let Err(err) = simple_logging::log_to_file(path, level) {
                eprintln!("could not open log file {}: {err}", path.display());
                exit(1);
            }
        }
        None => simple_logging::log_to_stderr(level),
    }

    #[cfg(feature = "torch")]
    {
        if !(args.no_gpu || use_cuda()) {
            error!("could not enable CUDA");
            exit(1);
        }
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            error!("{err}");
            exit(1);
        }
    };
    let data = match DataDir::open(&config.trainer.data_dir) {
        Ok(data) => data,
        Err(err) => {
            error!("could not open {}: {err}", config.trainer.data_dir.display());
            exit(1);
        }
    };

    let (board, mut updates) = StatusBoard::new();
    tokio::spawn(async move {
        let mut phase = updates.borrow().phase;
        while updates.changed().await.is_ok() {
            let status = updates.borrow().clone();
            if status.phase != phase {
                phase = status.phase;
                info!("generation {}: {phase:?}", status.generation);
            }
            if let Ok(json) = serde_json::to_string(&status) {
                debug!("status {json}");
            }
        }
    });

    let mut trainer = Trainer::<ChessPosition>::new(config, data, board);
    select! {
        _ = ctrl_c() => info!("shutting down"),
        result = trainer.run() => {
            if let Err(err) = result {
                error!("training failed: {err}");
                exit(1);
            }
        }
    }
}

fn load_config(args: &Args) -> Result<Config, TrainerError> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(data_dir) = &args.data_dir {
        config.trainer.data_dir = data_dir.clone();
    }
    if let Some(workers) = args.workers {
        config.pool.num_workers = workers;
    }
    if let Some(kind) = args.model_kind {
        config.trainer.model_kind = kind;
    }
    if let Some(program) = &args.worker_program {
        config.pool.worker_program = Some(program.clone());
    }
    if args.in_process {
        config.pool.worker_program = None;
    } else if config.pool.worker_program.is_none() {
        // The worker binary is built next to this one.
        config.pool.worker_program = Some(current_exe()?.with_file_name(WORKER_PROGRAM));
    }
    config.validate()?;
    Ok(config)
}
