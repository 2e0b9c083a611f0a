//! Payloads carried through the layer: stream formats, data blocks, group
//! metadata and program guides.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::clock::Timestamp;

/// Kind of elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EsCategory {
    Video,
    Audio,
    Subtitle,
    Data,
}

/// Description of one elementary stream as announced by the demultiplexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EsFormat {
    pub category: EsCategory,
    /// Four character codec identifier.
    pub codec: String,
    /// Program group the stream belongs to.
    pub group: i32,
    /// Demuxer-assigned stream id.
    pub id: i32,
    pub language: Option<String>,
    pub description: Option<String>,
    pub bitrate: u32,
    /// Codec extradata.
    pub extra: Bytes,
}

impl EsFormat {
    pub fn new(category: EsCategory, codec: impl Into<String>) -> Self {
        Self {
            category,
            codec: codec.into(),
            group: 0,
            id: -1,
            language: None,
            description: None,
            bitrate: 0,
            extra: Bytes::new(),
        }
    }

    pub fn with_id(mut self, id: i32) -> Self {
        self.id = id;
        self
    }

    pub fn with_group(mut self, group: i32) -> Self {
        self.group = group;
        self
    }

    pub fn with_extra(mut self, extra: Bytes) -> Self {
        self.extra = extra;
        self
    }
}

/// A unit of compressed data for one elementary stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    pub data: Bytes,
    pub pts: Option<Timestamp>,
    pub dts: Option<Timestamp>,
    /// Presentation length in microseconds, zero when unknown.
    pub length: i64,
    pub keyframe: bool,
    pub discontinuity: bool,
}

impl Block {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    pub fn with_pts(mut self, pts: Timestamp) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_dts(mut self, dts: Timestamp) -> Self {
        self.dts = Some(dts);
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Group metadata (title, artist, now playing, ...).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Meta {
    entries: BTreeMap<String, String>,
}

impl Meta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Copies every entry of `other` over this one.
    pub fn merge(&mut self, other: &Meta) {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// One scheduled programme of an electronic program guide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpgEvent {
    /// Start, in seconds since the epoch.
    pub start: i64,
    /// Duration in seconds.
    pub duration: u32,
    pub name: String,
    pub short_description: Option<String>,
    pub description: Option<String>,
}

/// Electronic program guide attached to a stream group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Epg {
    pub name: String,
    events: Vec<EpgEvent>,
    current: Option<usize>,
}

impl Epg {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            events: Vec::new(),
            current: None,
        }
    }

    pub fn add_event(&mut self, event: EpgEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[EpgEvent] {
        &self.events
    }

    /// Marks the event starting at `start` as the current one. An unknown
    /// start clears the marker.
    pub fn set_current(&mut self, start: Option<i64>) {
        self.current =
            start.and_then(|start| self.events.iter().position(|event| event.start == start));
    }

    pub fn current(&self) -> Option<&EpgEvent> {
        self.current.map(|index| &self.events[index])
    }
}
