//! Live session driving the timeshift layer end to end.
//!
//! A synthetic source feeds blocks at a fixed cadence; playback is paused and
//! resumed (optionally at another rate) on the configured schedule while the
//! source keeps producing, exactly like a live input that cannot be paused.

use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval, sleep, timeout};
use tracing::{info, instrument, warn};

use crate::{
    TimeshiftError,
    clock::Timestamp,
    config::AppConfig,
    sink::{
        Control, ControlReply, EsOut, SourceCaps,
        recorder::{RecordingSink, SinkOp},
    },
    timeshift::{TimeshiftOut, TimeshiftStats},
};

pub mod source;

use self::source::LiveSource;

/// Extra time granted to the replay worker to drain after the source stops.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Outcome of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub streams: usize,
    pub blocks_sent: u64,
    pub blocks_forwarded: u64,
    /// Largest gap between a block's emission and its delivery downstream.
    pub max_lag_ms: i64,
    /// Layer statistics taken once the backlog drained.
    pub stats: TimeshiftStats,
}

/// Polls the layer until nothing is left to replay.
pub async fn wait_until_empty<S: EsOut>(
    layer: &TimeshiftOut<S>,
    poll: Duration,
) -> Result<(), TimeshiftError> {
    loop {
        if layer.control(Control::GetEmpty).await? == ControlReply::Bool(true) {
            return Ok(());
        }
        sleep(poll).await;
    }
}

#[instrument(skip_all, fields(streams = config.session.streams, frames = config.session.frames))]
pub async fn execute_session(config: AppConfig) -> Result<SessionReport, TimeshiftError> {
    let plan = config.session.clone();
    let sink = RecordingSink::new();
    let layer = TimeshiftOut::new(
        sink.clone(),
        SourceCaps {
            can_pace_control: plan.can_pace_control,
        },
        &config.timeshift,
    );
    let clock = layer.clock();
    let source = LiveSource::new(plan.streams);

    let mut streams = Vec::with_capacity(source.formats().len());
    for format in source.formats() {
        streams.push(layer.add(format).await?);
    }
    let meta = source.meta();
    layer
        .control(Control::SetGroupMeta { group: 0, meta: &meta })
        .await?;

    let period = Duration::from_millis(plan.frame_period_ms);
    let pause_at = Timestamp::from_millis(plan.pause_after_ms as i64);
    let resume_at = pause_at + (plan.pause_for_ms as i64) * 1_000;
    let mut pause_pending = plan.pause_for_ms > 0;
    let mut paused = false;
    let mut blocks_sent = 0u64;

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    for frame in 0..plan.frames {
        ticker.tick().await;
        let now = clock.now();

        if pause_pending && now >= pause_at {
            pause_pending = false;
            paused = pause(&layer, true, now).await;
        }
        if paused && now >= resume_at {
            paused = !pause(&layer, false, now).await;
            if plan.replay_rate != config.timeshift.rate {
                layer
                    .control(Control::SetRate {
                        source_rate: config.timeshift.rate,
                        rate: plan.replay_rate,
                    })
                    .await?;
            }
        }

        for (index, es) in streams.iter().enumerate() {
            let block = source.block(index, frame, clock.now());
            match layer.send(*es, block).await {
                Ok(()) => blocks_sent += 1,
                Err(err) => warn!(target = "session", %es, error = %err, "block rejected"),
            }
        }
        if frame == 0 {
            let epg = source.epg(0);
            layer
                .control(Control::SetGroupEpg { group: 0, epg: &epg })
                .await?;
        }
    }

    if paused {
        pause(&layer, false, clock.now()).await;
    }

    let budget = Duration::from_millis(
        plan.duration_ms() * plan.replay_rate.max(1) as u64 / 1000 + plan.pause_for_ms,
    ) + DRAIN_GRACE;
    timeout(budget, wait_until_empty(&layer, period))
        .await
        .map_err(|_| TimeshiftError::Worker("replay did not drain in time".to_string()))??;
    let stats = layer.stats().await;

    for es in &streams {
        layer.del(*es).await;
    }
    timeout(DRAIN_GRACE, wait_until_empty(&layer, period))
        .await
        .map_err(|_| TimeshiftError::Worker("stream removal did not drain".to_string()))??;
    layer.destroy().await;

    let mut blocks_forwarded = 0u64;
    let mut max_lag_ms = 0i64;
    for event in sink.events() {
        if let SinkOp::Send { pts: Some(pts), .. } = event.op {
            blocks_forwarded += 1;
            max_lag_ms = max_lag_ms.max((clock.timestamp(event.at) - pts) / 1_000);
        }
    }

    let report = SessionReport {
        streams: streams.len(),
        blocks_sent,
        blocks_forwarded,
        max_lag_ms,
        stats,
    };
    info!(
        target = "session",
        blocks_sent = report.blocks_sent,
        blocks_forwarded = report.blocks_forwarded,
        max_lag_ms = report.max_lag_ms,
        "session complete"
    );
    Ok(report)
}

/// Requests a pause state change; returns whether the layer accepted it.
async fn pause<S: EsOut>(layer: &TimeshiftOut<S>, paused: bool, date: Timestamp) -> bool {
    let request = Control::SetPauseState {
        source_paused: false,
        paused,
        date,
    };
    match layer.control(request).await {
        Ok(_) => {
            info!(target = "session", paused, %date, "pause state changed");
            true
        }
        Err(err) => {
            warn!(target = "session", paused, error = %err, "pause state change refused");
            false
        }
    }
}
