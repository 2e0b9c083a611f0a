//! Timeshift layer sitting between the demultiplexer and the stream output.
//!
//! Every operation aimed at the downstream sink goes through
//! [`TimeshiftOut`]. While playback follows the source, operations are
//! forwarded as they arrive. Once a pause or a rate change has to be absorbed
//! for a source that cannot pace itself, operations are recorded and a single
//! replay worker executes them later, each at a deadline derived from its
//! arrival date, the time spent paused and the rate drift.

use std::{
    borrow::Cow,
    collections::HashMap,
    fmt, mem,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use tokio::{
    runtime::Handle,
    sync::{Mutex, MutexGuard, Notify},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    TimeshiftError,
    clock::{Clock, Timestamp},
    config::TimeshiftSettings,
    es::{Block, EsFormat},
    sink::{Control, ControlReply, EsOut, InputOwner},
};

use self::{
    command::{Captured, Command, CommandKind},
    controller::RateController,
    query::Dispatch,
    queue::CommandQueue,
    worker::WorkerState,
};

mod command;
pub mod controller;
pub mod query;
mod queue;
pub mod scratch;
mod worker;

/// Stream handle given to upstream callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EsId(u64);

impl fmt::Display for EsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "es#{}", self.0)
    }
}

/// Diagnostic snapshot of the layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeshiftStats {
    pub delayed: bool,
    pub paused: bool,
    /// Commands recorded and not executed yet, including one waiting for its
    /// deadline.
    pub pending: usize,
    pub executed: u64,
    /// Commands released without execution when the worker stopped.
    pub drained: u64,
    pub underflows: u64,
    pub spilled_blocks: u64,
    pub command_delay_us: i64,
}

pub(crate) struct State<E> {
    delayed: bool,
    controller: RateController,
    /// Handles visible to callers, in creation order.
    table: Vec<EsId>,
    /// Downstream realization of every handle whose removal has not executed.
    slots: HashMap<EsId, Option<E>>,
    queue: CommandQueue,
    /// A popped command is waiting for its deadline.
    in_flight: bool,
    next_es: u64,
    worker: WorkerState,
    executed: u64,
    drained: u64,
    underflows: u64,
}

impl<E> State<E> {
    fn register(&mut self, es: EsId) {
        self.next_es = self.next_es.max(es.0);
        self.slots.insert(es, None);
        self.table.push(es);
    }
}

pub(crate) struct Shared<S: EsOut> {
    sink: S,
    input: Box<dyn InputOwner>,
    clock: Clock,
    state: Mutex<State<S::Es>>,
    /// Mirror of `State::delayed` readable without the lock. Payload copies
    /// are made ahead of locking when set; the locked flag stays authoritative.
    buffering: AtomicBool,
    /// Raised on every enqueue and every pause state change.
    wakeup: Notify,
    shutdown: CancellationToken,
}

impl<S: EsOut> Shared<S> {
    async fn lock(&self) -> MutexGuard<'_, State<S::Es>> {
        self.state.lock().await
    }
}

/// Sink adapter recording or forwarding every operation aimed at `S`.
pub struct TimeshiftOut<S: EsOut> {
    shared: Arc<Shared<S>>,
}

impl<S: EsOut> TimeshiftOut<S> {
    pub fn new(sink: S, input: impl InputOwner, settings: &TimeshiftSettings) -> Self {
        let scratch_dir = scratch::resolve_scratch_dir(settings.scratch_path.as_deref());
        let state = State {
            delayed: false,
            controller: RateController::new(settings.rate),
            table: Vec::new(),
            slots: HashMap::new(),
            queue: CommandQueue::new(settings.max_buffer_bytes, scratch_dir),
            in_flight: false,
            next_es: 0,
            worker: WorkerState::NotStarted,
            executed: 0,
            drained: 0,
            underflows: 0,
        };
        Self {
            shared: Arc::new(Shared {
                sink,
                input: Box::new(input),
                clock: Clock::new(),
                state: Mutex::new(state),
                buffering: AtomicBool::new(false),
                wakeup: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Clock used to date commands; pause dates must be read from it.
    pub fn clock(&self) -> Clock {
        self.shared.clock
    }

    pub fn sink(&self) -> &S {
        &self.shared.sink
    }

    pub async fn is_delayed(&self) -> bool {
        self.shared.lock().await.delayed
    }

    /// Handles currently visible to callers.
    pub async fn streams(&self) -> Vec<EsId> {
        self.shared.lock().await.table.clone()
    }

    pub async fn stats(&self) -> TimeshiftStats {
        let state = self.shared.lock().await;
        TimeshiftStats {
            delayed: state.delayed,
            paused: state.controller.is_paused(),
            pending: state.queue.len() + usize::from(state.in_flight),
            executed: state.executed,
            drained: state.drained,
            underflows: state.underflows,
            spilled_blocks: state.queue.spilled_blocks(),
            command_delay_us: state.controller.command_delay(),
        }
    }

    /// Declares a new elementary stream.
    ///
    /// While buffering, the format is copied and the caller may drop its own
    /// as soon as this returns.
    pub async fn add(&self, format: &EsFormat) -> Result<EsId, TimeshiftError> {
        let format = if self.shared.buffering.load(Ordering::Acquire) {
            Cow::Owned(format.clone())
        } else {
            Cow::Borrowed(format)
        };
        let mut state = self.shared.lock().await;
        state
            .table
            .try_reserve(1)
            .map_err(|err| TimeshiftError::Allocation(format!("stream table: {err}")))?;
        state
            .slots
            .try_reserve(1)
            .map_err(|err| TimeshiftError::Allocation(format!("stream slots: {err}")))?;

        let es = EsId(state.next_es + 1);
        let command = Command::add(self.shared.clock.now(), es, format);
        if state.delayed {
            state.queue.push(command.into_owned()).await?;
            state.register(es);
            self.shared.wakeup.notify_one();
        } else {
            state.register(es);
            execute(&self.shared.sink, &mut state, command).await?;
        }
        Ok(es)
    }

    /// Hands a block over for `es`. The block is consumed in every case.
    pub async fn send(&self, es: EsId, block: Block) -> Result<(), TimeshiftError> {
        let mut state = self.shared.lock().await;
        let command = Command::send(self.shared.clock.now(), es, block);
        if state.delayed {
            state.queue.push(command).await?;
            self.shared.wakeup.notify_one();
            Ok(())
        } else {
            execute(&self.shared.sink, &mut state, command)
                .await
                .map(|_| ())
        }
    }

    /// Removes `es`. The handle leaves the table immediately; the downstream
    /// stream goes away when the removal is replayed.
    pub async fn del(&self, es: EsId) {
        let mut state = self.shared.lock().await;
        let command = Command::del(self.shared.clock.now(), es);
        if state.delayed {
            match state.queue.push(command).await {
                Ok(()) => self.shared.wakeup.notify_one(),
                Err(err) => error!(target = "timeshift", %es, error = %err, "cannot record stream removal"),
            }
        } else if let Err(err) = execute(&self.shared.sink, &mut state, command).await {
            debug!(target = "timeshift", %es, error = %err, "stream removal failed");
        }
        state.table.retain(|id| *id != es);
    }

    pub async fn control(
        &self,
        query: Control<'_, EsId>,
    ) -> Result<ControlReply, TimeshiftError> {
        let spec = query::lookup(query.query());
        match spec.dispatch {
            Dispatch::Invalid => {
                error!(target = "timeshift", query = ?spec.query, "invalid control query at the timeshift layer");
                debug_assert!(false, "invalid control query {:?}", spec.query);
                return Err(TimeshiftError::InvalidQuery(spec.query));
            }
            Dispatch::Unsupported => return Err(TimeshiftError::Unsupported(spec.query)),
            Dispatch::PassThrough(_) | Dispatch::Special => {}
        }

        let query = match Captured::capture(query) {
            Ok(captured) => return self.forward_or_record(captured).await,
            Err(query) => query,
        };
        let mut state = self.shared.lock().await;
        self.control_locked(&mut state, query).await
    }

    /// Runs a pass-through query now, or records it while buffering.
    async fn forward_or_record(
        &self,
        captured: Captured<'_>,
    ) -> Result<ControlReply, TimeshiftError> {
        let captured = if self.shared.buffering.load(Ordering::Acquire) {
            captured.into_owned()
        } else {
            captured
        };
        let mut state = self.shared.lock().await;
        let command = Command::control(self.shared.clock.now(), captured);
        if state.delayed {
            // Copies whatever the early check missed.
            state.queue.push(command.into_owned()).await?;
            self.shared.wakeup.notify_one();
            return Ok(ControlReply::Queued);
        }
        execute(&self.shared.sink, &mut state, command).await
    }

    /// Special queries, answered with the state lock held.
    async fn control_locked(
        &self,
        state: &mut State<S::Es>,
        query: Control<'_, EsId>,
    ) -> Result<ControlReply, TimeshiftError> {
        match query {
            Control::GetEmpty => self.get_empty_locked(state).await,
            Control::GetWakeup => self.get_wakeup_locked(state).await,
            Control::GetBuffering => self.get_buffering_locked(state).await,
            Control::SetPauseState {
                source_paused,
                paused,
                date,
            } => {
                self.set_pause_state_locked(state, source_paused, paused, date)
                    .await
            }
            Control::SetRate { source_rate, rate } => {
                self.set_rate_locked(state, source_rate, rate).await
            }
            Control::SetTime(date) => self.set_time_locked(state, date).await,
            Control::SetFrameNext => self.set_frame_next_locked(state).await,
            other => {
                let query = other.query();
                debug_assert!(false, "unexpected control query {query:?}");
                Err(TimeshiftError::InvalidQuery(query))
            }
        }
    }

    async fn get_empty_locked(
        &self,
        state: &mut State<S::Es>,
    ) -> Result<ControlReply, TimeshiftError> {
        if state.delayed {
            return Ok(ControlReply::Bool(
                state.queue.is_empty() && !state.in_flight,
            ));
        }
        self.shared.sink.control(Control::GetEmpty).await
    }

    async fn get_wakeup_locked(
        &self,
        state: &mut State<S::Es>,
    ) -> Result<ControlReply, TimeshiftError> {
        if state.delayed {
            debug_assert!(!self.shared.input.can_pace_control());
            // The worker paces itself.
            return Ok(ControlReply::Time(Timestamp::ZERO));
        }
        self.shared.sink.control(Control::GetWakeup).await
    }

    async fn get_buffering_locked(
        &self,
        state: &mut State<S::Es>,
    ) -> Result<ControlReply, TimeshiftError> {
        if state.delayed {
            return Ok(ControlReply::Bool(true));
        }
        self.shared.sink.control(Control::GetBuffering).await
    }

    async fn set_pause_state_locked(
        &self,
        state: &mut State<S::Es>,
        source_paused: bool,
        paused: bool,
        date: Timestamp,
    ) -> Result<ControlReply, TimeshiftError> {
        if !state.delayed && source_paused == paused {
            return self
                .shared
                .sink
                .control(Control::SetPauseState {
                    source_paused,
                    paused,
                    date,
                })
                .await;
        }
        if self.shared.input.can_pace_control() {
            error!(target = "timeshift", "timeshift does not work with streams that have pace control");
            return Err(TimeshiftError::SourcePaced("pause"));
        }

        let reply = if paused {
            debug_assert!(!source_paused);
            if !state.delayed {
                self.start_locked(state)?;
            }
            self.shared
                .sink
                .control(Control::SetPauseState {
                    source_paused: true,
                    paused: true,
                    date,
                })
                .await?
        } else {
            self.shared
                .sink
                .control(Control::SetPauseState {
                    source_paused: false,
                    paused: false,
                    date,
                })
                .await?
        };

        if !state.controller.set_paused(paused, date) {
            warn!(target = "timeshift", %date, "resume without a recorded pause, command delay unchanged");
        }
        self.shared.wakeup.notify_one();
        Ok(reply)
    }

    async fn set_rate_locked(
        &self,
        state: &mut State<S::Es>,
        source_rate: i32,
        rate: i32,
    ) -> Result<ControlReply, TimeshiftError> {
        if source_rate <= 0 || rate <= 0 {
            return Err(TimeshiftError::InvalidRate(source_rate.min(rate)));
        }
        if !state.delayed && source_rate == rate {
            return self
                .shared
                .sink
                .control(Control::SetRate { source_rate, rate })
                .await;
        }
        if self.shared.input.can_pace_control() {
            error!(target = "timeshift", "timeshift does not work with streams that have pace control");
            return Err(TimeshiftError::SourcePaced("rate change"));
        }

        if !state.delayed {
            self.start_locked(state)?;
        }
        state.controller.set_rate(source_rate, rate);

        // The layer absorbs the mismatch, downstream plays at the new rate.
        self.shared
            .sink
            .control(Control::SetRate {
                source_rate: rate,
                rate,
            })
            .await
    }

    async fn set_time_locked(
        &self,
        state: &mut State<S::Es>,
        date: Timestamp,
    ) -> Result<ControlReply, TimeshiftError> {
        if !state.delayed {
            return self.shared.sink.control(Control::SetTime(date)).await;
        }
        error!(target = "timeshift", "timeshift does not yet support time change");
        Err(TimeshiftError::UnsupportedWhileBuffering("time change"))
    }

    async fn set_frame_next_locked(
        &self,
        state: &mut State<S::Es>,
    ) -> Result<ControlReply, TimeshiftError> {
        if !state.delayed {
            return self.shared.sink.control(Control::SetFrameNext).await;
        }
        error!(target = "timeshift", "timeshift does not yet support frame next");
        Err(TimeshiftError::UnsupportedWhileBuffering("frame next"))
    }

    /// Starts buffering: commands are recorded from now on.
    fn start_locked(&self, state: &mut State<S::Es>) -> Result<(), TimeshiftError> {
        debug_assert!(!state.delayed);
        let runtime = Handle::try_current()
            .map_err(|err| TimeshiftError::Worker(format!("cannot start replay worker: {err}")))?;
        let cancel = self.shared.shutdown.child_token();
        let handle = runtime.spawn(worker::run(Arc::clone(&self.shared), cancel.clone()));
        state.worker = WorkerState::Running { cancel, handle };
        state.delayed = true;
        self.shared.buffering.store(true, Ordering::Release);
        info!(target = "timeshift", "buffering started");
        Ok(())
    }

    /// Stops the replay worker and releases every command it did not run.
    async fn stop_worker(&self) {
        let worker = {
            let mut state = self.shared.lock().await;
            mem::replace(&mut state.worker, WorkerState::Stopped)
        };
        if let WorkerState::Running { cancel, handle } = worker {
            cancel.cancel();
            if let Err(err) = handle.await {
                warn!(target = "timeshift", error = %err, "replay worker ended abnormally");
            }
        }

        let mut state = self.shared.lock().await;
        let drained = state.queue.drain().await;
        state.drained += drained as u64;
        state.in_flight = false;
        state.delayed = false;
        self.shared.buffering.store(false, Ordering::Release);
        info!(target = "timeshift", drained, "buffering stopped");
    }

    /// Tears the layer down: stops buffering, drops pending commands and
    /// removes every remaining stream downstream.
    pub async fn destroy(self) {
        if self.is_delayed().await {
            self.stop_worker().await;
        }

        let remaining = self.streams().await;
        for es in remaining {
            self.del(es).await;
        }

        // Realizations whose removal was drained before it could run.
        let orphans: Vec<S::Es> = {
            let mut state = self.shared.lock().await;
            state.slots.drain().filter_map(|(_, realized)| realized).collect()
        };
        for handle in orphans {
            self.shared.sink.del(&handle).await;
        }
    }
}

impl<S: EsOut> Drop for TimeshiftOut<S> {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

#[async_trait]
impl<S: EsOut> EsOut for TimeshiftOut<S> {
    type Es = EsId;

    async fn add(&self, format: &EsFormat) -> Result<EsId, TimeshiftError> {
        TimeshiftOut::add(self, format).await
    }

    async fn send(&self, es: &EsId, block: Block) -> Result<(), TimeshiftError> {
        TimeshiftOut::send(self, *es, block).await
    }

    async fn del(&self, es: &EsId) {
        TimeshiftOut::del(self, *es).await
    }

    async fn control(&self, query: Control<'_, EsId>) -> Result<ControlReply, TimeshiftError> {
        TimeshiftOut::control(self, query).await
    }
}

/// Runs one command against the downstream sink, consuming its payloads.
pub(crate) async fn execute<S: EsOut>(
    sink: &S,
    state: &mut State<S::Es>,
    command: Command<'_>,
) -> Result<ControlReply, TimeshiftError> {
    match command.kind {
        CommandKind::Add { es, format } => {
            match sink.add(&format).await {
                Ok(handle) => match state.slots.get_mut(&es) {
                    Some(slot) => *slot = Some(handle),
                    None => sink.del(&handle).await,
                },
                Err(err) => {
                    warn!(target = "timeshift", %es, error = %err, "downstream refused stream");
                }
            }
            Ok(ControlReply::Done)
        }
        CommandKind::Send { es, block } => {
            let handle = state.slots.get(&es).cloned().flatten();
            match handle {
                Some(handle) => sink.send(&handle, block).await.map(|()| ControlReply::Done),
                None => {
                    debug!(target = "timeshift", %es, bytes = block.len(), "dropping block for unrealized stream");
                    Err(TimeshiftError::StaleHandle(es))
                }
            }
        }
        CommandKind::Del { es } => {
            if let Some(Some(handle)) = state.slots.remove(&es) {
                sink.del(&handle).await;
            }
            Ok(ControlReply::Done)
        }
        CommandKind::Control(captured) => {
            let query = captured.resolve(|id| state.slots.get(&id).cloned().flatten())?;
            sink.control(query).await
        }
    }
}
