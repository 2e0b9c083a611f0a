//! Configuration loading and validation utilities.

use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;
use tokio::fs;
use tracing::instrument;

use crate::{TimeshiftError, timeshift::controller::RATE_DEFAULT};

/// Command-line arguments used to bootstrap the session.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Timeshift buffering over a synthetic live source")]
pub struct CliArgs {
    /// Location of the configuration document.
    #[arg(long, value_name = "PATH", default_value = "timeshift.toml")]
    pub config: PathBuf,
    /// Directory for scratch files once the backlog outgrows memory.
    #[arg(long, value_name = "PATH", env = "TIMESHIFT_SCRATCH_PATH")]
    pub scratch_path: Option<PathBuf>,
    /// Bytes of block data kept in memory before spilling to scratch files.
    #[arg(long, value_name = "BYTES", env = "TIMESHIFT_MAX_BUFFER_BYTES")]
    pub max_buffer_bytes: Option<u64>,
    /// Number of elementary streams emitted by the source.
    #[arg(long, value_name = "COUNT", env = "TIMESHIFT_STREAMS")]
    pub streams: Option<u32>,
    /// Blocks emitted per stream.
    #[arg(long, value_name = "FRAMES", env = "TIMESHIFT_FRAMES")]
    pub frames: Option<u64>,
    /// Interval between two blocks of a stream.
    #[arg(long, value_name = "MILLIS", env = "TIMESHIFT_FRAME_PERIOD_MS")]
    pub frame_period_ms: Option<u64>,
    /// When playback is paused, relative to the session start.
    #[arg(long, value_name = "MILLIS", env = "TIMESHIFT_PAUSE_AFTER_MS")]
    pub pause_after_ms: Option<u64>,
    /// How long playback stays paused.
    #[arg(long, value_name = "MILLIS", env = "TIMESHIFT_PAUSE_FOR_MS")]
    pub pause_for_ms: Option<u64>,
    /// Rate applied after resuming; the nominal rate is 1000.
    #[arg(long, value_name = "RATE", env = "TIMESHIFT_REPLAY_RATE")]
    pub replay_rate: Option<i32>,
    /// Pretend the source can pace itself (pause then fails).
    #[arg(long, env = "TIMESHIFT_CAN_PACE_CONTROL")]
    pub can_pace_control: bool,
}

fn default_max_buffer_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_rate() -> i32 {
    RATE_DEFAULT
}

/// Settings of the timeshift layer itself.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TimeshiftSettings {
    /// Spill threshold for buffered block data.
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: u64,
    /// Scratch directory override; the platform temporary directory otherwise.
    #[serde(default)]
    pub scratch_path: Option<PathBuf>,
    /// Rate of the input when the layer is created.
    #[serde(default = "default_rate")]
    pub rate: i32,
}

impl Default for TimeshiftSettings {
    fn default() -> Self {
        Self {
            max_buffer_bytes: default_max_buffer_bytes(),
            scratch_path: None,
            rate: default_rate(),
        }
    }
}

/// Session defaults provided by the configuration document.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SessionDefaults {
    pub streams: u32,
    pub frames: u64,
    pub frame_period_ms: u64,
    pub pause_after_ms: u64,
    pub pause_for_ms: u64,
    pub replay_rate: i32,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
struct ConfigDocument {
    #[serde(default)]
    pub timeshift: TimeshiftSettings,
    pub session: SessionDefaults,
}

/// Derived session plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPlan {
    pub streams: u32,
    pub frames: u64,
    pub frame_period_ms: u64,
    pub pause_after_ms: u64,
    pub pause_for_ms: u64,
    pub replay_rate: i32,
    pub can_pace_control: bool,
}

impl SessionPlan {
    /// Nominal duration of the emitted material.
    pub fn duration_ms(&self) -> u64 {
        self.frames * self.frame_period_ms
    }
}

/// Fully merged configuration set.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub cli: CliArgs,
    pub timeshift: TimeshiftSettings,
    pub session: SessionPlan,
}

impl AppConfig {
    #[instrument(skip_all)]
    pub async fn load(cli: CliArgs) -> Result<Self, TimeshiftError> {
        let raw = fs::read_to_string(&cli.config)
            .await
            .map_err(|err| TimeshiftError::Config(format!("failed to read config: {err}")))?;
        let document: ConfigDocument = toml::from_str(&raw)
            .map_err(|err| TimeshiftError::Config(format!("invalid config document: {err}")))?;

        let mut timeshift = document.timeshift;
        if let Some(max_buffer_bytes) = cli.max_buffer_bytes {
            timeshift.max_buffer_bytes = max_buffer_bytes;
        }
        if let Some(path) = cli.scratch_path.clone() {
            timeshift.scratch_path = Some(path);
        }
        if timeshift.max_buffer_bytes == 0 {
            return Err(TimeshiftError::Config(
                "max_buffer_bytes must be positive".to_string(),
            ));
        }
        if timeshift.rate <= 0 {
            return Err(TimeshiftError::Config(format!(
                "rate {} must be positive",
                timeshift.rate
            )));
        }

        let defaults = document.session;
        let session = SessionPlan {
            streams: cli.streams.unwrap_or(defaults.streams),
            frames: cli.frames.unwrap_or(defaults.frames),
            frame_period_ms: cli.frame_period_ms.unwrap_or(defaults.frame_period_ms),
            pause_after_ms: cli.pause_after_ms.unwrap_or(defaults.pause_after_ms),
            pause_for_ms: cli.pause_for_ms.unwrap_or(defaults.pause_for_ms),
            replay_rate: cli.replay_rate.unwrap_or(defaults.replay_rate),
            can_pace_control: cli.can_pace_control,
        };
        if session.streams == 0 {
            return Err(TimeshiftError::Config(
                "at least one stream is required".to_string(),
            ));
        }
        if session.frames == 0 {
            return Err(TimeshiftError::Config(
                "frames must be positive".to_string(),
            ));
        }
        if session.frame_period_ms == 0 {
            return Err(TimeshiftError::Config(
                "frame_period_ms must be positive".to_string(),
            ));
        }
        if session.replay_rate <= 0 {
            return Err(TimeshiftError::Config(format!(
                "replay_rate {} must be positive",
                session.replay_rate
            )));
        }

        Ok(Self {
            cli,
            timeshift,
            session,
        })
    }
}
