// CODEC IDS - container tag to codec mapping
//
// Containers name their codecs with FourCCs (BITMAPINFOHEADER biCompression,
// AVI strh handler) or 16-bit WAVEFORMAT tags. Both map onto one CodecId.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodecId {
    None,
    // Video
    Mpeg1Video,
    Mpeg2Video,
    H263,
    H263I,
    H264,
    Mpeg4,
    MsMpeg4V1,
    MsMpeg4V2,
    MsMpeg4V3,
    Wmv1,
    Wmv2,
    Mjpeg,
    DvVideo,
    RawVideo,
    Cinepak,
    // Audio
    PcmS16Le,
    PcmU8,
    PcmAlaw,
    PcmMulaw,
    AdpcmMs,
    AdpcmImaWav,
    Mp2,
    Mp3,
    Ac3,
    WmaV1,
    WmaV2,
    DvAudio,
    Vorbis,
}

impl CodecId {
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Mpeg1Video => "mpeg1video",
            Self::Mpeg2Video => "mpeg2video",
            Self::H263 => "h263",
            Self::H263I => "h263i",
            Self::H264 => "h264",
            Self::Mpeg4 => "mpeg4",
            Self::MsMpeg4V1 => "msmpeg4v1",
            Self::MsMpeg4V2 => "msmpeg4v2",
            Self::MsMpeg4V3 => "msmpeg4",
            Self::Wmv1 => "wmv1",
            Self::Wmv2 => "wmv2",
            Self::Mjpeg => "mjpeg",
            Self::DvVideo => "dvvideo",
            Self::RawVideo => "rawvideo",
            Self::Cinepak => "cinepak",
            Self::PcmS16Le => "pcm_s16le",
            Self::PcmU8 => "pcm_u8",
            Self::PcmAlaw => "pcm_alaw",
            Self::PcmMulaw => "pcm_mulaw",
            Self::AdpcmMs => "adpcm_ms",
            Self::AdpcmImaWav => "adpcm_ima_wav",
            Self::Mp2 => "mp2",
            Self::Mp3 => "mp3",
            Self::Ac3 => "ac3",
            Self::WmaV1 => "wmav1",
            Self::WmaV2 => "wmav2",
            Self::DvAudio => "dvaudio",
            Self::Vorbis => "vorbis",
        }
    }
}

// ============================================================================
// BITMAPINFOHEADER FourCCs
// ============================================================================

const BMP_TAGS: &[(&[u8; 4], CodecId)] = &[
    (b"H264", CodecId::H264),
    (b"X264", CodecId::H264),
    (b"AVC1", CodecId::H264),
    (b"H263", CodecId::H263),
    (b"U263", CodecId::H263),
    (b"I263", CodecId::H263I),
    (b"DIVX", CodecId::Mpeg4),
    (b"XVID", CodecId::Mpeg4),
    (b"DX50", CodecId::Mpeg4),
    (b"MP4S", CodecId::Mpeg4),
    (b"M4S2", CodecId::Mpeg4),
    (b"FMP4", CodecId::Mpeg4),
    (b"MPG4", CodecId::MsMpeg4V1),
    (b"MP41", CodecId::MsMpeg4V1),
    (b"MP42", CodecId::MsMpeg4V2),
    (b"DIV2", CodecId::MsMpeg4V2),
    (b"MP43", CodecId::MsMpeg4V3),
    (b"DIV3", CodecId::MsMpeg4V3),
    (b"DIV4", CodecId::MsMpeg4V3),
    (b"DIV5", CodecId::MsMpeg4V3),
    (b"AP41", CodecId::MsMpeg4V3),
    (b"WMV1", CodecId::Wmv1),
    (b"WMV2", CodecId::Wmv2),
    (b"MJPG", CodecId::Mjpeg),
    (b"DVSD", CodecId::DvVideo),
    (b"DVHD", CodecId::DvVideo),
    (b"DVSL", CodecId::DvVideo),
    (b"DV25", CodecId::DvVideo),
    (b"MPG1", CodecId::Mpeg1Video),
    (b"MPG2", CodecId::Mpeg2Video),
    (b"CVID", CodecId::Cinepak),
    (b"I420", CodecId::RawVideo),
    (b"YV12", CodecId::RawVideo),
    (b"YUY2", CodecId::RawVideo),
];

/// Look up a video FourCC, ignoring case. A zero tag is uncompressed RGB.
pub fn codec_from_fourcc(tag: [u8; 4]) -> CodecId {
    if tag == [0; 4] {
        return CodecId::RawVideo;
    }
    let upper = tag.map(|b| b.to_ascii_uppercase());
    BMP_TAGS
        .iter()
        .find(|(fourcc, _)| **fourcc == upper)
        .map(|(_, codec)| *codec)
        .unwrap_or(CodecId::None)
}

// ============================================================================
// WAVEFORMAT tags
// ============================================================================

const WAV_TAGS: &[(u16, CodecId)] = &[
    (0x0001, CodecId::PcmS16Le),
    (0x0002, CodecId::AdpcmMs),
    (0x0006, CodecId::PcmAlaw),
    (0x0007, CodecId::PcmMulaw),
    (0x0011, CodecId::AdpcmImaWav),
    (0x0050, CodecId::Mp2),
    (0x0055, CodecId::Mp3),
    (0x0160, CodecId::WmaV1),
    (0x0161, CodecId::WmaV2),
    (0x2000, CodecId::Ac3),
];

/// Map a WAVEFORMAT tag. PCM with 8 bits per sample is unsigned.
pub fn codec_from_wav_tag(tag: u16, bits_per_sample: u16) -> CodecId {
    let codec = WAV_TAGS
        .iter()
        .find(|(known, _)| *known == tag)
        .map(|(_, codec)| *codec)
        .unwrap_or(CodecId::None);

    if codec == CodecId::PcmS16Le && bits_per_sample == 8 {
        CodecId::PcmU8
    } else {
        codec
    }
}

pub fn fourcc_to_string(tag: [u8; 4]) -> String {
    tag.iter()
        .filter(|&&b| b.is_ascii_graphic() || b == b' ')
        .map(|&b| b as char)
        .collect()
}
