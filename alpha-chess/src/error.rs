use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::search::Handle;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("malformed config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PositionError {
    #[error("illegal action {0}")]
    IllegalAction(String),
    #[error("could not parse action {0:?}")]
    InvalidAction(String),
    #[error("could not parse position {0:?}")]
    InvalidFen(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BatchError {
    #[error("batch is full ({0} rows)")]
    Full(usize),
    #[error("{what} has {got} values, expected {expected}")]
    Shape {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("evaluator produced a non-finite {0}")]
    NonFinite(&'static str),
}

#[derive(Error, Debug)]
pub enum TreeError {
    #[error(transparent)]
    Position(#[from] PositionError),
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error("no claimed node for handle {0}")]
    StaleHandle(Handle),
    #[error("{0} is not a child of the root")]
    UnknownAction(String),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("connection closed")]
    Closed,
    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected message: {0}")]
    Unexpected(String),
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error("training produced a non-finite loss ({0})")]
    InvalidLoss(f32),
    #[error("model kind {0} is not available in this build")]
    Unsupported(String),
    #[cfg(feature = "torch")]
    #[error(transparent)]
    Torch(#[from] tch::TchError),
}

#[derive(Error, Debug)]
pub enum RecordError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Position(#[from] PositionError),
    #[error("ply {ply} is outside a game of {len} plies")]
    Ply { ply: usize, len: usize },
    #[error("game has no result yet")]
    Unfinished,
}

#[derive(Error, Debug)]
pub enum SearchError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("could not connect to {addr} after {attempts} attempts")]
    ConnectFailed { addr: SocketAddr, attempts: usize },
    #[error("timed out waiting for worker {0} to connect")]
    AcceptTimeout(usize),
    #[error("worker {0} sent a malformed message: {1}")]
    Malformed(usize, ProtocolError),
    #[error("every worker has disconnected")]
    NoWorkers,
    #[error("search stalled with {0} root visits and nothing in flight")]
    Stalled(u32),
    #[error("workers did not shut down in time")]
    ShutdownTimeout,
}
