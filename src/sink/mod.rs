//! Contracts shared with the rest of the media pipeline: the downstream
//! stream-output sink and the upstream input owner.

use std::fmt;

use async_trait::async_trait;

use crate::{
    TimeshiftError,
    clock::Timestamp,
    es::{Block, EsCategory, EsFormat, Epg, Meta},
};

pub mod recorder;

/// Stream-output sink receiving elementary streams and their data.
///
/// `Es` is the sink's own handle for a stream it has created.
#[async_trait]
pub trait EsOut: Send + Sync + 'static {
    type Es: Clone + fmt::Debug + Send + Sync + 'static;

    async fn add(&self, format: &EsFormat) -> Result<Self::Es, TimeshiftError>;

    async fn send(&self, es: &Self::Es, block: Block) -> Result<(), TimeshiftError>;

    async fn del(&self, es: &Self::Es);

    async fn control(&self, query: Control<'_, Self::Es>) -> Result<ControlReply, TimeshiftError>;
}

/// Owner of the input feeding the sink.
pub trait InputOwner: Send + Sync + 'static {
    /// Whether the source can pace itself (pause and rate are then handled
    /// at the access level and must not be absorbed by the timeshift layer).
    fn can_pace_control(&self) -> bool;
}

/// Static description of the input capabilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceCaps {
    pub can_pace_control: bool,
}

impl InputOwner for SourceCaps {
    fn can_pace_control(&self) -> bool {
        self.can_pace_control
    }
}

/// Identifier of a control query, independent of its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Query {
    SetActive,
    GetActive,
    SetMode,
    GetMode,
    SetGroup,
    GetGroup,
    SetPcr,
    SetGroupPcr,
    ResetPcr,
    SetNextDisplayTime,
    SetGroupMeta,
    SetGroupEpg,
    DelGroup,
    SetEs,
    RestartEs,
    SetEsDefault,
    SetEsState,
    GetEsState,
    SetEsFmt,
    GetEmpty,
    GetWakeup,
    GetBuffering,
    SetPauseState,
    SetRate,
    SetTime,
    SetFrameNext,
    SetEsById,
    RestartEsById,
    SetEsDefaultById,
    SetDelay,
    SetRecordState,
    GetTs,
}

impl Query {
    pub const ALL: [Query; 32] = [
        Query::SetActive,
        Query::GetActive,
        Query::SetMode,
        Query::GetMode,
        Query::SetGroup,
        Query::GetGroup,
        Query::SetPcr,
        Query::SetGroupPcr,
        Query::ResetPcr,
        Query::SetNextDisplayTime,
        Query::SetGroupMeta,
        Query::SetGroupEpg,
        Query::DelGroup,
        Query::SetEs,
        Query::RestartEs,
        Query::SetEsDefault,
        Query::SetEsState,
        Query::GetEsState,
        Query::SetEsFmt,
        Query::GetEmpty,
        Query::GetWakeup,
        Query::GetBuffering,
        Query::SetPauseState,
        Query::SetRate,
        Query::SetTime,
        Query::SetFrameNext,
        Query::SetEsById,
        Query::RestartEsById,
        Query::SetEsDefaultById,
        Query::SetDelay,
        Query::SetRecordState,
        Query::GetTs,
    ];
}

/// A control request with its typed arguments.
///
/// `E` is the stream handle type understood by the receiver. Payload objects
/// are borrowed from the caller, who keeps ownership once the call returns.
#[derive(Debug, Clone, PartialEq)]
pub enum Control<'a, E> {
    SetActive(bool),
    GetActive,
    SetMode(i32),
    GetMode,
    SetGroup(i32),
    GetGroup,
    SetPcr(Timestamp),
    SetGroupPcr { group: i32, pcr: Timestamp },
    ResetPcr,
    SetNextDisplayTime(Timestamp),
    SetGroupMeta { group: i32, meta: &'a Meta },
    SetGroupEpg { group: i32, epg: &'a Epg },
    DelGroup(i32),
    SetEs(E),
    RestartEs(E),
    SetEsDefault(E),
    SetEsState { es: E, enabled: bool },
    GetEsState(E),
    SetEsFmt { es: E, format: &'a EsFormat },
    GetEmpty,
    GetWakeup,
    GetBuffering,
    SetPauseState {
        source_paused: bool,
        paused: bool,
        date: Timestamp,
    },
    SetRate { source_rate: i32, rate: i32 },
    SetTime(Timestamp),
    SetFrameNext,
    SetEsById(i32),
    RestartEsById(i32),
    SetEsDefaultById(i32),
    SetDelay { category: EsCategory, delay: i64 },
    SetRecordState(bool),
    GetTs(Timestamp),
}

impl<E> Control<'_, E> {
    pub fn query(&self) -> Query {
        match self {
            Control::SetActive(_) => Query::SetActive,
            Control::GetActive => Query::GetActive,
            Control::SetMode(_) => Query::SetMode,
            Control::GetMode => Query::GetMode,
            Control::SetGroup(_) => Query::SetGroup,
            Control::GetGroup => Query::GetGroup,
            Control::SetPcr(_) => Query::SetPcr,
            Control::SetGroupPcr { .. } => Query::SetGroupPcr,
            Control::ResetPcr => Query::ResetPcr,
            Control::SetNextDisplayTime(_) => Query::SetNextDisplayTime,
            Control::SetGroupMeta { .. } => Query::SetGroupMeta,
            Control::SetGroupEpg { .. } => Query::SetGroupEpg,
            Control::DelGroup(_) => Query::DelGroup,
            Control::SetEs(_) => Query::SetEs,
            Control::RestartEs(_) => Query::RestartEs,
            Control::SetEsDefault(_) => Query::SetEsDefault,
            Control::SetEsState { .. } => Query::SetEsState,
            Control::GetEsState(_) => Query::GetEsState,
            Control::SetEsFmt { .. } => Query::SetEsFmt,
            Control::GetEmpty => Query::GetEmpty,
            Control::GetWakeup => Query::GetWakeup,
            Control::GetBuffering => Query::GetBuffering,
            Control::SetPauseState { .. } => Query::SetPauseState,
            Control::SetRate { .. } => Query::SetRate,
            Control::SetTime(_) => Query::SetTime,
            Control::SetFrameNext => Query::SetFrameNext,
            Control::SetEsById(_) => Query::SetEsById,
            Control::RestartEsById(_) => Query::RestartEsById,
            Control::SetEsDefaultById(_) => Query::SetEsDefaultById,
            Control::SetDelay { .. } => Query::SetDelay,
            Control::SetRecordState(_) => Query::SetRecordState,
            Control::GetTs(_) => Query::GetTs,
        }
    }
}

/// Answer to a control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlReply {
    /// The request was applied.
    Done,
    /// The request was recorded and will be applied at replay time.
    Queued,
    Bool(bool),
    Int(i32),
    Time(Timestamp),
}

impl ControlReply {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            ControlReply::Bool(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_int(self) -> Option<i32> {
        match self {
            ControlReply::Int(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_time(self) -> Option<Timestamp> {
        match self {
            ControlReply::Time(value) => Some(value),
            _ => None,
        }
    }
}
