//! Synthetic live source standing in for a non-seekable input.

use bytes::{BufMut, BytesMut};

use crate::{
    clock::Timestamp,
    es::{Block, EsCategory, EsFormat, Epg, EpgEvent, Meta},
};

const VIDEO_BLOCK_BYTES: usize = 4096;
const AUDIO_BLOCK_BYTES: usize = 512;

/// Source emitting one video stream followed by audio streams.
#[derive(Debug, Clone)]
pub struct LiveSource {
    formats: Vec<EsFormat>,
}

impl LiveSource {
    pub fn new(streams: u32) -> Self {
        let formats = (0..streams)
            .map(|index| {
                let (category, codec, bitrate) = if index == 0 {
                    (EsCategory::Video, "h264", 2_000_000)
                } else {
                    (EsCategory::Audio, "mp4a", 128_000)
                };
                let mut format = EsFormat::new(category, codec).with_id(index as i32 + 0x100);
                format.bitrate = bitrate;
                format
            })
            .collect();
        Self { formats }
    }

    pub fn formats(&self) -> &[EsFormat] {
        &self.formats
    }

    /// Block `frame` of stream `index`, stamped with `pts`.
    pub fn block(&self, index: usize, frame: u64, pts: Timestamp) -> Block {
        let size = match self.formats[index].category {
            EsCategory::Video => VIDEO_BLOCK_BYTES,
            _ => AUDIO_BLOCK_BYTES,
        };
        let mut data = BytesMut::with_capacity(size);
        data.put_u64(frame);
        data.put_u32(index as u32);
        data.resize(size, (frame % 251) as u8);

        let mut block = Block::new(data.freeze()).with_pts(pts).with_dts(pts);
        block.keyframe = index == 0 && frame % 25 == 0;
        block
    }

    pub fn meta(&self) -> Meta {
        let mut meta = Meta::new();
        meta.set("title", "Synthetic live channel");
        meta.set("now_playing", "Test pattern");
        meta
    }

    pub fn epg(&self, now_secs: i64) -> Epg {
        let mut epg = Epg::new("Synthetic live channel");
        epg.add_event(EpgEvent {
            start: now_secs,
            duration: 1800,
            name: "Test pattern".into(),
            short_description: Some("Bars and tone".into()),
            description: None,
        });
        epg.add_event(EpgEvent {
            start: now_secs + 1800,
            duration: 1800,
            name: "Late news".into(),
            short_description: None,
            description: None,
        });
        epg.set_current(Some(now_secs));
        epg
    }
}
