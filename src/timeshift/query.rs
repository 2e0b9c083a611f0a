//! Dispatch table for control queries reaching the timeshift layer.

use crate::sink::Query;

/// How the layer treats a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Captured as a command: forwarded now, or recorded while buffering.
    PassThrough(BufferPolicy),
    /// Answered by the layer itself, synchronously, in every mode.
    Special,
    /// Meaningless at this level; reaching the layer is a caller bug.
    Invalid,
    /// Known but not implemented; fails without asserting.
    Unsupported,
}

/// What recording a pass-through query costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferPolicy {
    /// Arguments are plain values and are stored as is.
    CopyFree,
    /// A payload object is deep-copied into the command.
    DeepCopy,
}

/// Argument shape of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgShape {
    None,
    Bool,
    Int,
    Time,
    GroupTime,
    GroupMeta,
    GroupEpg,
    Es,
    EsBool,
    EsFormat,
    PauseState,
    Rates,
    CategoryDelay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuerySpec {
    pub query: Query,
    pub dispatch: Dispatch,
    pub args: ArgShape,
}

const fn entry(query: Query, dispatch: Dispatch, args: ArgShape) -> QuerySpec {
    QuerySpec {
        query,
        dispatch,
        args,
    }
}

use ArgShape as A;
use BufferPolicy::{CopyFree, DeepCopy};
use Dispatch::{Invalid, PassThrough, Special, Unsupported};

/// Indexed by the query discriminant, in [`Query::ALL`] order.
pub static QUERY_TABLE: [QuerySpec; 32] = [
    entry(Query::SetActive, PassThrough(CopyFree), A::Bool),
    entry(Query::GetActive, PassThrough(CopyFree), A::None),
    entry(Query::SetMode, PassThrough(CopyFree), A::Int),
    entry(Query::GetMode, PassThrough(CopyFree), A::None),
    entry(Query::SetGroup, PassThrough(CopyFree), A::Int),
    entry(Query::GetGroup, PassThrough(CopyFree), A::None),
    entry(Query::SetPcr, PassThrough(CopyFree), A::Time),
    entry(Query::SetGroupPcr, PassThrough(CopyFree), A::GroupTime),
    entry(Query::ResetPcr, PassThrough(CopyFree), A::None),
    entry(Query::SetNextDisplayTime, PassThrough(CopyFree), A::Time),
    entry(Query::SetGroupMeta, PassThrough(DeepCopy), A::GroupMeta),
    entry(Query::SetGroupEpg, PassThrough(DeepCopy), A::GroupEpg),
    entry(Query::DelGroup, PassThrough(CopyFree), A::Int),
    entry(Query::SetEs, PassThrough(CopyFree), A::Es),
    entry(Query::RestartEs, PassThrough(CopyFree), A::Es),
    entry(Query::SetEsDefault, PassThrough(CopyFree), A::Es),
    entry(Query::SetEsState, PassThrough(CopyFree), A::EsBool),
    entry(Query::GetEsState, PassThrough(CopyFree), A::Es),
    entry(Query::SetEsFmt, PassThrough(DeepCopy), A::EsFormat),
    entry(Query::GetEmpty, Special, A::None),
    entry(Query::GetWakeup, Special, A::None),
    entry(Query::GetBuffering, Special, A::None),
    entry(Query::SetPauseState, Special, A::PauseState),
    entry(Query::SetRate, Special, A::Rates),
    entry(Query::SetTime, Special, A::Time),
    entry(Query::SetFrameNext, Special, A::None),
    entry(Query::SetEsById, Invalid, A::Int),
    entry(Query::RestartEsById, Invalid, A::Int),
    entry(Query::SetEsDefaultById, Invalid, A::Int),
    entry(Query::SetDelay, Invalid, A::CategoryDelay),
    entry(Query::SetRecordState, Invalid, A::Bool),
    entry(Query::GetTs, Unsupported, A::Time),
];

/// Table entry for `query`.
pub fn lookup(query: Query) -> &'static QuerySpec {
    &QUERY_TABLE[query as usize]
}
