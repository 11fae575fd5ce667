// RIFF helpers shared by AVI, WAV and ASF
//
// WAVEFORMATEX and BITMAPINFOHEADER show up inside all three containers,
// so their readers live here.

use bytes::Bytes;

use crate::codec::{codec_from_fourcc, codec_from_wav_tag};
use crate::cursor::ByteCursor;
use crate::error::{DemuxError, Parse};
use crate::metadata::Metadata;
use crate::stream::Stream;

pub(crate) const RIFF: u32 = 0x46464952; // "RIFF" little-endian
pub(crate) const LIST: u32 = 0x5453494C; // "LIST"

pub(crate) const BITMAP_INFO_SIZE: u32 = 40;

// LIST 'INFO' entries
const INAM: u32 = 0x4D414E49; // title
const IART: u32 = 0x54524149; // artist
const ICOP: u32 = 0x504F4349; // copyright
const ICMT: u32 = 0x544D4349; // comment
const IGNR: u32 = 0x524E4749; // genre
const ICRD: u32 = 0x44524349; // creation date
const IPRD: u32 = 0x44525049; // product (album)
const ITRK: u32 = 0x4B525449; // track

pub(crate) fn is_info_tag(tag: u32) -> bool {
    matches!(tag, INAM | IART | ICOP | ICMT | IGNR | ICRD | IPRD | ITRK)
}

/// Metadata slot for a LIST 'INFO' entry, if the tag is one we keep.
pub(crate) fn info_field(metadata: &mut Metadata, tag: u32) -> Option<&mut Option<String>> {
    let field = match tag {
        INAM => &mut metadata.title,
        IART => &mut metadata.author,
        ICOP => &mut metadata.copyright,
        ICMT => &mut metadata.comment,
        IGNR => &mut metadata.genre,
        ICRD => &mut metadata.year,
        IPRD => &mut metadata.album,
        ITRK => &mut metadata.track,
        _ => return None,
    };
    Some(field)
}

/// Read a NUL-padded INFO string of `size` bytes plus its pad byte.
pub(crate) fn read_info_text(cursor: &mut ByteCursor, size: u32) -> Parse<String> {
    let raw = cursor.read_bytes(size as usize)?;
    if size % 2 == 1 {
        cursor.skip(1)?;
    }
    Ok(String::from_utf8_lossy(&raw).trim_end_matches('\0').to_string())
}

/// WAVEFORMATEX as stored in `fmt `, `strf` and ASF stream properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct WaveFormat {
    pub tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub avg_bytes_per_sec: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub extradata: Bytes,
}

impl WaveFormat {
    pub fn apply(&self, stream: &mut Stream) {
        stream.codec = codec_from_wav_tag(self.tag, self.bits_per_sample);
        stream.codec_tag = self.tag as u32;
        stream.channels = self.channels;
        stream.sample_rate = self.sample_rate;
        stream.bit_rate = self.avg_bytes_per_sec.saturating_mul(8);
        stream.block_align = self.block_align;
        stream.bits_per_sample = self.bits_per_sample;
        stream.extradata = self.extradata.clone();
    }
}

/// Read a WAVEFORMAT(EX) occupying exactly `size` bytes.
///
/// A 14-byte structure predates the bits-per-sample field and implies 8.
/// Beyond 16 bytes a `cbSize` announces extradata; anything after that is
/// skipped.
pub(crate) fn read_wave_format(cursor: &mut ByteCursor, size: u32) -> Parse<WaveFormat> {
    if size < 14 {
        return Err(DemuxError::bad_header(format!("WAVEFORMAT too short: {size} bytes")).into());
    }

    let mut format = WaveFormat {
        tag: cursor.read_u16_le()?,
        channels: cursor.read_u16_le()?,
        sample_rate: cursor.read_u32_le()?,
        avg_bytes_per_sec: cursor.read_u32_le()?,
        block_align: cursor.read_u16_le()?,
        bits_per_sample: 8,
        extradata: Bytes::new(),
    };

    if size < 16 {
        cursor.skip((size - 14) as usize)?;
        return Ok(format);
    }
    format.bits_per_sample = cursor.read_u16_le()?;

    if size < 18 {
        cursor.skip((size - 16) as usize)?;
    } else {
        let declared = cursor.read_u16_le()? as u32;
        let room = size - 18;
        let extra = declared.min(room);
        format.extradata = cursor.read_bytes(extra as usize)?;
        cursor.skip((room - extra) as usize)?;
    }

    Ok(format)
}

/// BITMAPINFOHEADER fields the demuxer cares about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct BitmapInfo {
    pub width: u32,
    pub height: u32,
    pub bit_count: u16,
    pub compression: [u8; 4],
}

impl BitmapInfo {
    pub fn apply(&self, stream: &mut Stream) {
        stream.width = self.width;
        stream.height = self.height;
        stream.bits_per_sample = self.bit_count;
        stream.codec_tag = u32::from_le_bytes(self.compression);
        stream.codec = codec_from_fourcc(self.compression);
    }
}

/// Read the fixed 40-byte BITMAPINFOHEADER. Negative heights (top-down
/// bitmaps) are reported by magnitude.
pub(crate) fn read_bitmap_info(cursor: &mut ByteCursor) -> Parse<BitmapInfo> {
    let _size = cursor.read_u32_le()?;
    let width = cursor.read_u32_le()? as i32;
    let height = cursor.read_u32_le()? as i32;
    let _planes = cursor.read_u16_le()?;
    let bit_count = cursor.read_u16_le()?;
    let compression = cursor.read_tag()?;
    // image size, x/y pixels per meter, colours used, colours important
    cursor.skip(20)?;

    Ok(BitmapInfo {
        width: width.unsigned_abs(),
        height: height.unsigned_abs(),
        bit_count,
        compression,
    })
}

/// Chunk payloads are word aligned.
pub(crate) fn padded(size: u32) -> u64 {
    size as u64 + (size & 1) as u64
}
