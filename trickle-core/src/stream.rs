//! Elementary stream descriptors produced by header parsing.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec::CodecId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    Video,
    Audio,
    Data,
}

/// Exact rational, used for frame rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    /// Position in the session's stream list
    pub index: usize,
    /// Container-native id (ASF stream number, Ogg serial, AVI stream ordinal)
    pub id: u32,
    pub media_type: MediaType,
    pub codec: CodecId,
    /// Raw FourCC or WAVEFORMAT tag
    pub codec_tag: u32,
    pub bit_rate: u32,

    // Audio
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub block_align: u16,

    // Video
    pub width: u32,
    pub height: u32,
    pub frame_rate: Option<Rational>,

    /// Codec initialisation bytes, passed through untouched
    pub extradata: Bytes,
    pub duration_us: Option<i64>,
}

impl Stream {
    pub fn new(index: usize, media_type: MediaType) -> Self {
        Self {
            index,
            id: index as u32,
            media_type,
            codec: CodecId::None,
            codec_tag: 0,
            bit_rate: 0,
            sample_rate: 0,
            channels: 0,
            bits_per_sample: 0,
            block_align: 0,
            width: 0,
            height: 0,
            frame_rate: None,
            extradata: Bytes::new(),
            duration_us: None,
        }
    }

    pub fn is_audio(&self) -> bool {
        self.media_type == MediaType::Audio
    }

    pub fn is_video(&self) -> bool {
        self.media_type == MediaType::Video
    }
}
