//! Reference sink recording every operation it receives.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use crate::{
    TimeshiftError,
    clock::Timestamp,
    es::{Block, EsFormat},
};

use super::{Control, ControlReply, EsOut, Query};

/// Handle given out by [`RecordingSink::add`].
pub type RecordedEs = u32;

/// One operation observed by the sink.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkOp {
    Add {
        es: RecordedEs,
        format: EsFormat,
    },
    Send {
        es: RecordedEs,
        data: Bytes,
        pts: Option<Timestamp>,
    },
    Del {
        es: RecordedEs,
    },
    Control {
        query: Query,
        args: String,
    },
}

/// Operation plus the runtime instant it was received.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkEvent {
    pub at: Instant,
    pub op: SinkOp,
}

/// Answers given to getter queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkReplies {
    pub empty: bool,
    pub buffering: bool,
    pub wakeup: Timestamp,
    pub active: bool,
    pub mode: i32,
    pub group: i32,
    pub es_state: bool,
}

impl Default for SinkReplies {
    fn default() -> Self {
        Self {
            empty: true,
            buffering: false,
            wakeup: Timestamp::ZERO,
            active: true,
            mode: 0,
            group: 0,
            es_state: true,
        }
    }
}

#[derive(Debug, Default)]
struct RecorderState {
    events: Vec<SinkEvent>,
    next_es: RecordedEs,
    live: Vec<RecordedEs>,
    replies: SinkReplies,
    fail_add: bool,
}

/// Shared sink capturing the operations forwarded by the timeshift layer.
///
/// Clones observe the same recording.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    state: Arc<Mutex<RecorderState>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the answers given to getter queries.
    pub fn set_replies(&self, replies: SinkReplies) {
        self.state.lock().expect("recorder mutex poisoned").replies = replies;
    }

    /// Makes subsequent `add` calls fail.
    pub fn fail_add(&self, fail: bool) {
        self.state.lock().expect("recorder mutex poisoned").fail_add = fail;
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.state
            .lock()
            .expect("recorder mutex poisoned")
            .events
            .clone()
    }

    pub fn ops(&self) -> Vec<SinkOp> {
        self.events().into_iter().map(|event| event.op).collect()
    }

    /// Streams created and not yet deleted.
    pub fn live_streams(&self) -> Vec<RecordedEs> {
        self.state
            .lock()
            .expect("recorder mutex poisoned")
            .live
            .clone()
    }

    fn record(&self, op: SinkOp) {
        let mut state = self.state.lock().expect("recorder mutex poisoned");
        state.events.push(SinkEvent {
            at: Instant::now(),
            op,
        });
    }
}

#[async_trait]
impl EsOut for RecordingSink {
    type Es = RecordedEs;

    async fn add(&self, format: &EsFormat) -> Result<RecordedEs, TimeshiftError> {
        let es = {
            let mut state = self.state.lock().expect("recorder mutex poisoned");
            if state.fail_add {
                return Err(TimeshiftError::Downstream(format!(
                    "cannot create {} stream",
                    format.codec
                )));
            }
            state.next_es += 1;
            let es = state.next_es;
            state.live.push(es);
            es
        };
        self.record(SinkOp::Add {
            es,
            format: format.clone(),
        });
        Ok(es)
    }

    async fn send(&self, es: &RecordedEs, block: Block) -> Result<(), TimeshiftError> {
        // Keep a private copy so the caller's buffer is released here.
        self.record(SinkOp::Send {
            es: *es,
            data: Bytes::copy_from_slice(&block.data),
            pts: block.pts,
        });
        Ok(())
    }

    async fn del(&self, es: &RecordedEs) {
        self.state
            .lock()
            .expect("recorder mutex poisoned")
            .live
            .retain(|live| live != es);
        self.record(SinkOp::Del { es: *es });
    }

    async fn control(
        &self,
        query: Control<'_, RecordedEs>,
    ) -> Result<ControlReply, TimeshiftError> {
        let replies = self
            .state
            .lock()
            .expect("recorder mutex poisoned")
            .replies
            .clone();
        let reply = match &query {
            Control::GetActive => ControlReply::Bool(replies.active),
            Control::GetMode => ControlReply::Int(replies.mode),
            Control::GetGroup => ControlReply::Int(replies.group),
            Control::GetEsState(_) => ControlReply::Bool(replies.es_state),
            Control::GetEmpty => ControlReply::Bool(replies.empty),
            Control::GetBuffering => ControlReply::Bool(replies.buffering),
            Control::GetWakeup => ControlReply::Time(replies.wakeup),
            _ => ControlReply::Done,
        };
        self.record(SinkOp::Control {
            query: query.query(),
            args: format!("{query:?}"),
        });
        Ok(reply)
    }
}
