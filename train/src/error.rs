use std::io;

use alpha_chess::error::{BatchError, ConfigError, ModelError, RecordError, SearchError, TreeError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainerError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error("search left the root unexpanded at ply {0}")]
    NoMoves(usize),
    #[error("no finished self-play games to train on")]
    EmptyWindow,
}
