//! Timeshift buffering layer for live media pipelines.
//!
//! The crate sits between a stream demultiplexer and its stream-output sink.
//! It forwards every sink operation untouched until playback has to pause or
//! change rate on a source that cannot do it itself; from then on operations
//! are recorded and replayed by a background worker at deadlines that account
//! for the time spent paused and the rate drift.
//!
//! The binary drives the layer with a synthetic live session, see
//! [`session`].

pub mod clock;
pub mod config;
pub mod es;
pub mod session;
pub mod sink;
pub mod timeshift;

use thiserror::Error;
use tracing::instrument;

pub use crate::{
    clock::{Clock, Timestamp},
    sink::{Control, ControlReply, EsOut, Query},
    timeshift::{EsId, TimeshiftOut, TimeshiftStats},
};

/// Errors reported by the timeshift layer and its collaborators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimeshiftError {
    #[error("allocation failure: {0}")]
    Allocation(String),
    #[error("{0} is not supported on a source that paces itself")]
    SourcePaced(&'static str),
    #[error("{0} is not yet supported while buffering")]
    UnsupportedWhileBuffering(&'static str),
    #[error("invalid control query {0:?} at the timeshift layer")]
    InvalidQuery(Query),
    #[error("control query {0:?} is not supported")]
    Unsupported(Query),
    #[error("stream {0} has no downstream counterpart")]
    StaleHandle(EsId),
    #[error("invalid rate {0}")]
    InvalidRate(i32),
    #[error("downstream failure: {0}")]
    Downstream(String),
    #[error("worker failure: {0}")]
    Worker(String),
    #[error("I/O failure: {0}")]
    Io(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("task join failure: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for TimeshiftError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Join(err.to_string())
    }
}

impl From<std::io::Error> for TimeshiftError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Runs the configured live session through the timeshift layer.
#[instrument(skip_all)]
pub async fn run(config: config::AppConfig) -> Result<session::SessionReport, TimeshiftError> {
    session::execute_session(config).await
}
