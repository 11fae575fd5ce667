//! Demuxed packets.

use bytes::Bytes;

/// One complete unit of elementary-stream payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub stream_index: usize,
    /// Payload; cheap to clone, never mutated after emission
    pub data: Bytes,
    /// Presentation timestamp (microseconds), None when the container has none
    pub pts_us: Option<i64>,
    /// Decode timestamp (microseconds)
    pub dts_us: Option<i64>,
    pub keyframe: bool,
}

impl Packet {
    pub fn new(stream_index: usize, data: Bytes) -> Self {
        Self {
            stream_index,
            data,
            pts_us: None,
            dts_us: None,
            keyframe: false,
        }
    }

    pub fn with_timestamp(mut self, ts_us: Option<i64>) -> Self {
        self.pts_us = ts_us;
        self.dts_us = ts_us;
        self
    }

    pub fn with_keyframe(mut self, keyframe: bool) -> Self {
        self.keyframe = keyframe;
        self
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}
