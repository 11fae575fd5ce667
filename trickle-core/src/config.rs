//! Session configuration.

use serde::{Deserialize, Serialize};

/// Tunables handed to every demuxing session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemuxConfig {
    /// Size of the slices cut from a WAV `data` chunk
    pub wav_packet_size: usize,
    /// Upper bound on buffered unread bytes (None = unbounded)
    pub max_buffer_size: Option<usize>,
    /// Compact the cursor after every feed
    pub compact_after_feed: bool,
    /// Drop Ogg pages whose checksum does not match
    pub verify_ogg_crc: bool,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            wav_packet_size: 4096,
            max_buffer_size: None,
            compact_after_feed: true,
            verify_ogg_crc: true,
        }
    }
}

impl DemuxConfig {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
