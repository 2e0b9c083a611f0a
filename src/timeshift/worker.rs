//! Replay worker executing buffered commands at their deadline.

use std::sync::Arc;

use tokio::{task::JoinHandle, time::sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::sink::EsOut;

use super::{
    Shared,
    command::Command,
    controller::Deadline,
    execute,
};

pub(crate) enum WorkerState {
    NotStarted,
    Running {
        cancel: CancellationToken,
        handle: JoinHandle<()>,
    },
    Stopped,
}

/// Worker loop: wait for an unpaused non-empty queue, pop the oldest command,
/// sleep until its deadline, execute it.
///
/// Cancellation is honoured while waiting and while sleeping; a command popped
/// before cancellation is released without being executed.
pub(crate) async fn run<S: EsOut>(shared: Arc<Shared<S>>, cancel: CancellationToken) {
    info!(target = "timeshift", "replay worker started");
    loop {
        let (command, deadline) = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = next_command(&shared) => next,
        };

        if deadline.is_underflow() {
            // TODO: drop part of the backlog once replay cannot catch up instead of only reporting it.
            error!(target = "timeshift", offset_us = deadline.offset, "rate underflow, replay cannot catch up");
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(target = "timeshift", command = command.label(), "releasing command popped before stop");
                break;
            }
            _ = sleep_until(shared.clock.instant(deadline.at)) => {}
        }

        let mut state = shared.lock().await;
        state.in_flight = false;
        let label = command.label();
        match execute(&shared.sink, &mut state, command).await {
            Ok(reply) => trace!(target = "timeshift", command = label, ?reply, "command replayed"),
            Err(err) => debug!(target = "timeshift", command = label, error = %err, "replayed command failed"),
        }
        state.executed += 1;
    }
    info!(target = "timeshift", "replay worker stopped");
}

/// Waits until playback is running and a command is queued, then pops it and
/// computes its deadline.
async fn next_command<S: EsOut>(shared: &Shared<S>) -> (Command<'static>, Deadline) {
    loop {
        {
            let mut state = shared.lock().await;
            if !state.controller.is_paused() {
                if let Some(command) = state.queue.pop().await {
                    let deadline = state.controller.deadline(command.date);
                    if deadline.is_underflow() {
                        state.underflows += 1;
                    }
                    state.in_flight = true;
                    return (command, deadline);
                }
            }
        }
        shared.wakeup.notified().await;
    }
}
