//! Recorded sink operations.
//!
//! A command is built by borrowing the caller's payloads. Buffering goes
//! through [`Command::into_owned`], which deep-copies whatever is still
//! borrowed; the queue only stores `Command<'static>`, so every buffered
//! command owns its payloads and pass-through commands never do.

use std::borrow::Cow;

use crate::{
    TimeshiftError,
    clock::Timestamp,
    es::{Block, EsFormat, Epg, Meta},
    sink::Control,
};

use super::EsId;

#[derive(Debug)]
pub(crate) struct Command<'a> {
    /// Clock reading when the operation reached the layer.
    pub date: Timestamp,
    pub kind: CommandKind<'a>,
}

#[derive(Debug)]
pub(crate) enum CommandKind<'a> {
    Add {
        es: EsId,
        format: Cow<'a, EsFormat>,
    },
    Send {
        es: EsId,
        block: Block,
    },
    Del {
        es: EsId,
    },
    Control(Captured<'a>),
}

impl<'a> Command<'a> {
    pub fn add(date: Timestamp, es: EsId, format: Cow<'a, EsFormat>) -> Self {
        Self {
            date,
            kind: CommandKind::Add { es, format },
        }
    }

    pub fn send(date: Timestamp, es: EsId, block: Block) -> Self {
        Self {
            date,
            kind: CommandKind::Send { es, block },
        }
    }

    pub fn del(date: Timestamp, es: EsId) -> Self {
        Self {
            date,
            kind: CommandKind::Del { es },
        }
    }

    pub fn control(date: Timestamp, captured: Captured<'a>) -> Self {
        Self {
            date,
            kind: CommandKind::Control(captured),
        }
    }

    /// Detaches the command from the caller by copying borrowed payloads.
    pub fn into_owned(self) -> Command<'static> {
        let kind = match self.kind {
            CommandKind::Add { es, format } => CommandKind::Add {
                es,
                format: Cow::Owned(format.into_owned()),
            },
            CommandKind::Send { es, block } => CommandKind::Send { es, block },
            CommandKind::Del { es } => CommandKind::Del { es },
            CommandKind::Control(captured) => CommandKind::Control(captured.into_owned()),
        };
        Command {
            date: self.date,
            kind,
        }
    }

    pub fn label(&self) -> &'static str {
        match &self.kind {
            CommandKind::Add { .. } => "add",
            CommandKind::Send { .. } => "send",
            CommandKind::Del { .. } => "del",
            CommandKind::Control(_) => "control",
        }
    }
}

/// Pass-through control query with its arguments captured.
#[derive(Debug)]
pub(crate) enum Captured<'a> {
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
    SetGroupMeta { group: i32, meta: Cow<'a, Meta> },
    SetGroupEpg { group: i32, epg: Cow<'a, Epg> },
    DelGroup(i32),
    SetEs(EsId),
    RestartEs(EsId),
    SetEsDefault(EsId),
    SetEsState { es: EsId, enabled: bool },
    GetEsState(EsId),
    SetEsFmt { es: EsId, format: Cow<'a, EsFormat> },
}

impl<'a> Captured<'a> {
    /// Captures a pass-through query. Other queries are handed back.
    pub fn capture(query: Control<'a, EsId>) -> Result<Self, Control<'a, EsId>> {
        Ok(match query {
            Control::SetActive(active) => Captured::SetActive(active),
            Control::GetActive => Captured::GetActive,
            Control::SetMode(mode) => Captured::SetMode(mode),
            Control::GetMode => Captured::GetMode,
            Control::SetGroup(group) => Captured::SetGroup(group),
            Control::GetGroup => Captured::GetGroup,
            Control::SetPcr(pcr) => Captured::SetPcr(pcr),
            Control::SetGroupPcr { group, pcr } => Captured::SetGroupPcr { group, pcr },
            Control::ResetPcr => Captured::ResetPcr,
            Control::SetNextDisplayTime(pts) => Captured::SetNextDisplayTime(pts),
            Control::SetGroupMeta { group, meta } => Captured::SetGroupMeta {
                group,
                meta: Cow::Borrowed(meta),
            },
            Control::SetGroupEpg { group, epg } => Captured::SetGroupEpg {
                group,
                epg: Cow::Borrowed(epg),
            },
            Control::DelGroup(group) => Captured::DelGroup(group),
            Control::SetEs(es) => Captured::SetEs(es),
            Control::RestartEs(es) => Captured::RestartEs(es),
            Control::SetEsDefault(es) => Captured::SetEsDefault(es),
            Control::SetEsState { es, enabled } => Captured::SetEsState { es, enabled },
            Control::GetEsState(es) => Captured::GetEsState(es),
            Control::SetEsFmt { es, format } => Captured::SetEsFmt {
                es,
                format: Cow::Borrowed(format),
            },
            other => return Err(other),
        })
    }

    pub fn into_owned(self) -> Captured<'static> {
        match self {
            Captured::SetActive(active) => Captured::SetActive(active),
            Captured::GetActive => Captured::GetActive,
            Captured::SetMode(mode) => Captured::SetMode(mode),
            Captured::GetMode => Captured::GetMode,
            Captured::SetGroup(group) => Captured::SetGroup(group),
            Captured::GetGroup => Captured::GetGroup,
            Captured::SetPcr(pcr) => Captured::SetPcr(pcr),
            Captured::SetGroupPcr { group, pcr } => Captured::SetGroupPcr { group, pcr },
            Captured::ResetPcr => Captured::ResetPcr,
            Captured::SetNextDisplayTime(pts) => Captured::SetNextDisplayTime(pts),
            Captured::SetGroupMeta { group, meta } => Captured::SetGroupMeta {
                group,
                meta: Cow::Owned(match meta {
                    Cow::Borrowed(meta) => {
                        let mut copy = Meta::new();
                        copy.merge(meta);
                        copy
                    }
                    Cow::Owned(meta) => meta,
                }),
            },
            Captured::SetGroupEpg { group, epg } => Captured::SetGroupEpg {
                group,
                epg: Cow::Owned(match epg {
                    Cow::Borrowed(epg) => copy_epg(epg),
                    Cow::Owned(epg) => epg,
                }),
            },
            Captured::DelGroup(group) => Captured::DelGroup(group),
            Captured::SetEs(es) => Captured::SetEs(es),
            Captured::RestartEs(es) => Captured::RestartEs(es),
            Captured::SetEsDefault(es) => Captured::SetEsDefault(es),
            Captured::SetEsState { es, enabled } => Captured::SetEsState { es, enabled },
            Captured::GetEsState(es) => Captured::GetEsState(es),
            Captured::SetEsFmt { es, format } => Captured::SetEsFmt {
                es,
                format: Cow::Owned(format.into_owned()),
            },
        }
    }

    /// Rebuilds the query for the downstream sink, translating stream handles
    /// through `realize`.
    pub fn resolve<E, F>(&self, mut realize: F) -> Result<Control<'_, E>, TimeshiftError>
    where
        F: FnMut(EsId) -> Option<E>,
    {
        let mut es = |id: EsId| realize(id).ok_or(TimeshiftError::StaleHandle(id));
        Ok(match self {
            Captured::SetActive(active) => Control::SetActive(*active),
            Captured::GetActive => Control::GetActive,
            Captured::SetMode(mode) => Control::SetMode(*mode),
            Captured::GetMode => Control::GetMode,
            Captured::SetGroup(group) => Control::SetGroup(*group),
            Captured::GetGroup => Control::GetGroup,
            Captured::SetPcr(pcr) => Control::SetPcr(*pcr),
            Captured::SetGroupPcr { group, pcr } => Control::SetGroupPcr {
                group: *group,
                pcr: *pcr,
            },
            Captured::ResetPcr => Control::ResetPcr,
            Captured::SetNextDisplayTime(pts) => Control::SetNextDisplayTime(*pts),
            Captured::SetGroupMeta { group, meta } => Control::SetGroupMeta {
                group: *group,
                meta,
            },
            Captured::SetGroupEpg { group, epg } => Control::SetGroupEpg { group: *group, epg },
            Captured::DelGroup(group) => Control::DelGroup(*group),
            Captured::SetEs(id) => Control::SetEs(es(*id)?),
            Captured::RestartEs(id) => Control::RestartEs(es(*id)?),
            Captured::SetEsDefault(id) => Control::SetEsDefault(es(*id)?),
            Captured::SetEsState { es: id, enabled } => Control::SetEsState {
                es: es(*id)?,
                enabled: *enabled,
            },
            Captured::GetEsState(id) => Control::GetEsState(es(*id)?),
            Captured::SetEsFmt { es: id, format } => Control::SetEsFmt {
                es: es(*id)?,
                format,
            },
        })
    }
}

/// Program guide copy: every event plus the current-event marker.
fn copy_epg(epg: &Epg) -> Epg {
    let mut copy = Epg::new(epg.name.clone());
    for event in epg.events() {
        copy.add_event(event.clone());
    }
    copy.set_current(epg.current().map(|event| event.start));
    copy
}
