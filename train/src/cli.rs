use std::path::PathBuf;

use alpha_chess::model::ModelKind;
use clap::Parser;

/// Train AlphaChess by self-play
#[derive(Parser)]
pub struct Args {
    /// Path to a JSON config file, defaults are used for missing keys
    #[clap(short, long)]
    pub config: Option<PathBuf>,
    /// Directory holding models and game records
    #[clap(short, long)]
    pub data_dir: Option<PathBuf>,
    /// Number of evaluation workers per search
    #[clap(short, long)]
    pub workers: Option<usize>,
    /// Kind of model to train
    #[clap(short, long)]
    pub model_kind: Option<ModelKind>,
    /// Path to the worker executable
    #[clap(long)]
    pub worker_program: Option<PathBuf>,
    /// Run workers as tasks inside the trainer
    #[clap(long)]
    pub in_process: bool,
    /// Write logs to this file instead of stderr
    #[clap(long)]
    pub log_file: Option<PathBuf>,
    /// Log debug output
    #[clap(short, long)]
    pub verbose: bool,
    /// Disable GPU usage
    #[clap(short, long)]
    pub no_gpu: bool,
}
