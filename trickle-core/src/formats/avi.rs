// AVI DEMUXER - Incremental RIFF/AVI Parser
//
// The header is a flat RIFF chunk walk that ends at LIST 'movi'.
// Packets are found by sliding an 8-byte window over the movi region
// until it holds a "##dc" / "##wb" / "##db" / "##__" tag plus size.
// OpenDML files continue in further RIFF 'AVIX' lists after the first
// RIFF ends.

use crate::codec::{codec_from_fourcc, CodecId};
use crate::cursor::ByteCursor;
use crate::error::{DemuxError, Parse, StepResult};
use crate::formats::riff::{
    info_field, is_info_tag, padded, read_bitmap_info, read_info_text, read_wave_format,
    BITMAP_INFO_SIZE, LIST, RIFF,
};
use crate::formats::{drive, transact, Flow, HeaderInfo};
use crate::metadata::Metadata;
use crate::packet::Packet;
use crate::registry::PROBE_SCORE_MAX;
use crate::stream::{MediaType, Rational, Stream};

// ============================================================================
// RIFF/AVI Constants
// ============================================================================

const AVI_: u32 = 0x20495641; // "AVI " little-endian
const AVIX: u32 = 0x58495641; // "AVIX" - OpenDML extension
const MOVI: u32 = 0x69766F6D; // "movi" - movie data
const AVIH: u32 = 0x68697661; // "avih" - main AVI header
const STRH: u32 = 0x68727473; // "strh" - stream header
const STRF: u32 = 0x66727473; // "strf" - stream format

// Stream types
const VIDS: u32 = 0x73646976; // "vids"
const AUDS: u32 = 0x73647561; // "auds"
const TXTS: u32 = 0x73747874; // "txts"
const IAVS: u32 = 0x73766169; // "iavs" - interleaved DV
const IVAS: u32 = 0x73617669; // "ivas"

const AVIH_FIXED: u32 = 28;
const STRH_MIN: u32 = 36;
const STRH_WITH_SAMPLE_SIZE: u32 = 48;

// ============================================================================
// Header Structures
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct MainHeader {
    microsec_per_frame: u32,
    bit_rate: u32,
    streams: u32,
}

#[derive(Debug, Clone, Copy, Default)]
struct StreamHeader {
    fcc_type: u32,
    fcc_handler: u32,
    scale: u32,
    rate: u32,
    length: u32,
    sample_size: u32,
}

/// Converts chunk counts into microsecond timestamps.
#[derive(Debug, Clone, Copy, Default)]
struct StreamClock {
    scale: u32,
    rate: u32,
    /// Bytes per sample for constant-size audio, 0 when one chunk is one unit
    sample_size: u32,
    position: u64,
}

impl StreamClock {
    fn stamp(&mut self, chunk_size: usize) -> Option<i64> {
        let ts = (self.rate != 0).then(|| {
            let us = self.position as u128 * self.scale as u128 * 1_000_000 / self.rate as u128;
            i64::try_from(us).unwrap_or(i64::MAX)
        });
        self.position += if self.sample_size > 0 {
            (chunk_size / self.sample_size as usize) as u64
        } else {
            1
        };
        ts
    }
}

/// The last eight bytes seen by the movi scan.
#[derive(Debug, Clone, Copy, Default)]
struct TagWindow {
    bytes: [u8; 8],
    filled: u8,
}

impl TagWindow {
    fn push(&mut self, byte: u8) {
        self.bytes.copy_within(1.., 0);
        self.bytes[7] = byte;
        self.filled = (self.filled + 1).min(8);
    }

    fn clear(&mut self) {
        *self = Self::default();
    }

    fn size(&self) -> u32 {
        u32::from_le_bytes([self.bytes[4], self.bytes[5], self.bytes[6], self.bytes[7]])
    }

    fn two_digits(hi: u8, lo: u8) -> Option<usize> {
        (hi.is_ascii_digit() && lo.is_ascii_digit())
            .then(|| ((hi - b'0') * 10 + (lo - b'0')) as usize)
    }

    /// Stream number of a `##dc`, `##wb`, `##db` or `##__` chunk.
    fn data_stream(&self) -> Option<usize> {
        if self.filled < 8 {
            return None;
        }
        let [a, b, c, d, ..] = self.bytes;
        match (c, d) {
            (b'd', b'c') | (b'w', b'b') | (b'd', b'b') | (b'_', b'_') => Self::two_digits(a, b),
            _ => None,
        }
    }

    /// Stream number of an OpenDML `ix##` index chunk.
    fn index_stream(&self) -> Option<usize> {
        if self.filled < 8 || self.bytes[0] != b'i' || self.bytes[1] != b'x' {
            return None;
        }
        Self::two_digits(self.bytes[2], self.bytes[3])
    }
}

// ============================================================================
// AVI Demuxer
// ============================================================================

#[derive(Debug)]
pub struct AviDemuxer {
    /// Type 1 DV: one interleaved stream exposed as video plus audio
    dv_interleaved: bool,
    stream_count: usize,
    clocks: Vec<StreamClock>,
    movi_end: u64,
    riff_end: u64,
    window: TagWindow,
    /// Bytes still to drop (index chunks, idx1, tail of a RIFF)
    skip_remaining: u64,
    /// Second copy of a DV chunk, handed out on the next call
    duplicate: Option<Packet>,
}

impl Default for AviDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl AviDemuxer {
    pub fn new() -> Self {
        Self {
            dv_interleaved: false,
            stream_count: 0,
            clocks: Vec::new(),
            movi_end: u64::MAX,
            riff_end: u64::MAX,
            window: TagWindow::default(),
            skip_remaining: 0,
            duplicate: None,
        }
    }

    pub fn read_header(&mut self, cursor: &mut ByteCursor) -> StepResult<HeaderInfo> {
        transact(cursor, |c| self.parse_header(c))
    }

    pub fn read_packet(&mut self, cursor: &mut ByteCursor) -> StepResult<Packet> {
        drive(cursor, |c| self.step(c))
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.skip_remaining = 0;
        self.duplicate = None;
        // Offsets are meaningless once the input has jumped
        self.movi_end = u64::MAX;
        self.riff_end = u64::MAX;
    }

    pub fn read_close(&mut self) {
        self.reset();
        self.clocks.clear();
        self.stream_count = 0;
    }

    // ========================================================================
    // Header
    // ========================================================================

    fn parse_header(&mut self, cursor: &mut ByteCursor) -> Parse<HeaderInfo> {
        let riff_end = read_riff(cursor)?;

        let mut main: Option<MainHeader> = None;
        let mut streams: Vec<Stream> = Vec::new();
        let mut clocks: Vec<StreamClock> = Vec::new();
        let mut metadata = Metadata::default();
        let mut strh_seen = 0usize;
        let mut dv_interleaved = false;

        let movi_end = loop {
            let tag = cursor.read_u32_le()?;
            let size = cursor.read_u32_le()?;

            match tag {
                LIST => {
                    let list_type = cursor.read_u32_le()?;
                    if list_type == MOVI {
                        break region_end(cursor.stream_position(), size, 4);
                    }
                    // Other lists (hdrl, strl, INFO) are walked into
                }
                AVIH => {
                    if size < AVIH_FIXED {
                        return Err(DemuxError::bad_header(format!("avih of {size} bytes")).into());
                    }
                    let microsec_per_frame = cursor.read_u32_le()?;
                    let bit_rate = cursor.read_u32_le()?.saturating_mul(8);
                    // padding granularity, flags, total and initial frames
                    cursor.skip(16)?;
                    let header = MainHeader {
                        microsec_per_frame,
                        bit_rate,
                        streams: cursor.read_u32_le()?,
                    };
                    cursor.skip((padded(size) - AVIH_FIXED as u64) as usize)?;

                    streams = (0..header.streams as usize)
                        .map(|i| Stream::new(i, MediaType::Data))
                        .collect();
                    clocks = vec![StreamClock::default(); streams.len()];
                    main = Some(header);
                }
                STRH => {
                    strh_seen += 1;
                    let index = strh_seen - 1;
                    if index >= streams.len() {
                        cursor.skip(padded(size) as usize)?;
                        continue;
                    }
                    let header = read_strh(cursor, size)?;
                    let frame_period = main.map(|m| m.microsec_per_frame).unwrap_or(0);

                    match header.fcc_type {
                        VIDS => {
                            configure_video(&mut streams[index], &mut clocks[index], &header, frame_period);
                        }
                        AUDS => {
                            configure_audio(&mut streams[index], &mut clocks[index], &header);
                        }
                        TXTS => {
                            streams[index].media_type = MediaType::Data;
                        }
                        IAVS | IVAS => {
                            if streams.len() != 1 {
                                return Err(DemuxError::bad_header(
                                    "interleaved DV requires exactly one declared stream",
                                )
                                .into());
                            }
                            if codec_from_fourcc(header.fcc_handler.to_le_bytes()) != CodecId::DvVideo {
                                return Err(DemuxError::bad_header("unknown DV handler").into());
                            }
                            dv_interleaved = true;
                            configure_video(&mut streams[0], &mut clocks[0], &header, frame_period);
                            streams[0].codec = CodecId::DvVideo;
                            streams[0].codec_tag = header.fcc_handler;

                            let mut audio = Stream::new(1, MediaType::Audio);
                            audio.codec = CodecId::DvAudio;
                            audio.duration_us = streams[0].duration_us;
                            streams.push(audio);
                            clocks.push(clocks[0]);
                        }
                        other => {
                            return Err(DemuxError::bad_header(format!(
                                "unknown stream type {:?}",
                                crate::codec::fourcc_to_string(other.to_le_bytes())
                            ))
                            .into());
                        }
                    }
                }
                STRF => {
                    let index = strh_seen.wrapping_sub(1);
                    let media_type = streams.get(index).map(|s| s.media_type);
                    match media_type {
                        Some(MediaType::Video) if !dv_interleaved => {
                            if size < BITMAP_INFO_SIZE {
                                return Err(DemuxError::bad_header(format!("strf of {size} bytes")).into());
                            }
                            let bitmap = read_bitmap_info(cursor)?;
                            let extra = (size - BITMAP_INFO_SIZE) as usize;
                            let extradata = cursor.read_bytes(extra)?;
                            if extra % 2 == 1 {
                                cursor.skip(1)?;
                            }
                            let stream = &mut streams[index];
                            bitmap.apply(stream);
                            stream.extradata = extradata;
                        }
                        Some(MediaType::Audio) if !dv_interleaved => {
                            let format = read_wave_format(cursor, size)?;
                            if size % 2 == 1 {
                                cursor.skip(1)?;
                            }
                            format.apply(&mut streams[index]);
                        }
                        _ => cursor.skip(padded(size) as usize)?,
                    }
                }
                _ if is_info_tag(tag) => {
                    let text = read_info_text(cursor, size)?;
                    if let Some(field) = info_field(&mut metadata, tag) {
                        Metadata::set(field, text);
                    }
                }
                _ => cursor.skip(padded(size) as usize)?,
            }
        };

        let Some(main) = main else {
            return Err(DemuxError::no_header("AVI without avih").into());
        };
        if strh_seen != main.streams as usize {
            return Err(DemuxError::bad_header(format!(
                "avih declares {} streams, found {}",
                main.streams, strh_seen
            ))
            .into());
        }

        tracing::debug!(
            streams = streams.len(),
            dv = dv_interleaved,
            bit_rate = main.bit_rate,
            movi_end,
            "AVI header parsed"
        );

        self.dv_interleaved = dv_interleaved;
        self.stream_count = streams.len();
        self.clocks = clocks;
        self.movi_end = movi_end;
        self.riff_end = riff_end;
        self.window.clear();
        self.skip_remaining = 0;
        self.duplicate = None;

        Ok(HeaderInfo { streams, metadata })
    }

    // ========================================================================
    // Packets
    // ========================================================================

    fn step(&mut self, cursor: &mut ByteCursor) -> Parse<Flow> {
        if let Some(packet) = self.duplicate.take() {
            return Ok(Flow::Packet(packet));
        }

        if self.skip_remaining > 0 {
            self.skip_remaining -= cursor.skip_partial(self.skip_remaining);
            return Ok(if self.skip_remaining > 0 { Flow::Wait } else { Flow::Continue });
        }

        let pos = cursor.stream_position();
        if pos >= self.movi_end {
            if pos < self.riff_end {
                self.skip_remaining = self.riff_end - pos;
                self.window.clear();
                return Ok(Flow::Continue);
            }
            return self.enter_extension(cursor);
        }

        let mut window = self.window;
        window.push(cursor.read_u8()?);
        let data_start = pos + 1;
        let size = window.size();
        let fits = data_start + size as u64 <= self.movi_end;

        if let Some(stream) = window.index_stream() {
            if stream < self.stream_count && fits {
                tracing::trace!(stream, size, "skipping OpenDML index chunk");
                self.window.clear();
                self.skip_remaining = padded(size);
                return Ok(Flow::Continue);
            }
        }

        if let Some(stream) = window.data_stream() {
            if stream < self.stream_count && fits {
                let data = cursor.read_bytes(size as usize)?;
                if size % 2 == 1 {
                    cursor.skip(1)?;
                }
                self.window.clear();
                return Ok(Flow::Packet(self.emit(stream, data)));
            }
        }

        self.window = window;
        Ok(Flow::Continue)
    }

    fn emit(&mut self, stream: usize, data: bytes::Bytes) -> Packet {
        let ts = self.clocks.get_mut(stream).and_then(|clock| clock.stamp(data.len()));
        let packet = Packet::new(stream, data)
            .with_timestamp(ts)
            .with_keyframe(true);

        if self.dv_interleaved && stream == 0 {
            let ts = self.clocks.get_mut(1).and_then(|clock| clock.stamp(packet.size()));
            let mut audio = packet.clone().with_timestamp(ts);
            audio.stream_index = 1;
            self.duplicate = Some(audio);
        }

        tracing::trace!(stream, size = packet.size(), pts = ?packet.pts_us, "AVI packet");
        packet
    }

    /// At the end of a RIFF: expect `RIFF....AVIX` followed by `LIST....movi`.
    fn enter_extension(&mut self, cursor: &mut ByteCursor) -> Parse<Flow> {
        let riff_end = read_riff(cursor)?;
        let tag = cursor.read_u32_le()?;
        let size = cursor.read_u32_le()?;
        let list_type = cursor.read_u32_le()?;
        if tag != LIST || list_type != MOVI {
            return Err(DemuxError::bad_format("OpenDML RIFF without LIST movi").into());
        }

        self.riff_end = riff_end;
        self.movi_end = region_end(cursor.stream_position(), size, 4);
        self.window.clear();
        tracing::debug!(movi_end = self.movi_end, "entering OpenDML AVIX list");
        Ok(Flow::Continue)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Read `RIFF <size> AVI ` (or `AVIX`) and return the absolute RIFF end.
fn read_riff(cursor: &mut ByteCursor) -> Parse<u64> {
    let start = cursor.stream_position();
    if cursor.read_u32_le()? != RIFF {
        return Err(DemuxError::bad_format("missing RIFF signature").into());
    }
    let size = cursor.read_u32_le()?;
    let form = cursor.read_u32_le()?;
    if form != AVI_ && form != AVIX {
        return Err(DemuxError::bad_format("RIFF form is not AVI").into());
    }
    Ok(region_end(start + 8, size, 0))
}

/// End of a region whose declared size already counts `consumed` bytes.
/// A zero size means "unknown", which leaves the region open.
fn region_end(data_start: u64, size: u32, consumed: u32) -> u64 {
    if size == 0 {
        u64::MAX
    } else {
        data_start + size.saturating_sub(consumed) as u64
    }
}

fn read_strh(cursor: &mut ByteCursor, size: u32) -> Parse<StreamHeader> {
    if size < STRH_MIN {
        return Err(DemuxError::bad_header(format!("strh of {size} bytes")).into());
    }
    let fcc_type = cursor.read_u32_le()?;
    let fcc_handler = cursor.read_u32_le()?;
    // flags, priority + language, initial frames
    cursor.skip(12)?;
    let scale = cursor.read_u32_le()?;
    let rate = cursor.read_u32_le()?;
    let _start = cursor.read_u32_le()?;
    let length = cursor.read_u32_le()?;

    let mut consumed = STRH_MIN as u64;
    let mut sample_size = 0;
    if size >= STRH_WITH_SAMPLE_SIZE {
        // suggested buffer size, quality
        cursor.skip(8)?;
        sample_size = cursor.read_u32_le()?;
        consumed = STRH_WITH_SAMPLE_SIZE as u64;
    }
    cursor.skip((padded(size) - consumed) as usize)?;

    Ok(StreamHeader {
        fcc_type,
        fcc_handler,
        scale,
        rate,
        length,
        sample_size,
    })
}

/// `count * scale / rate` seconds in microseconds, or `None` when the rate
/// is zero or the result does not fit.
fn span_us(count: u32, scale: u32, rate: u32) -> Option<i64> {
    if rate == 0 {
        return None;
    }
    let us = count as u128 * scale as u128 * 1_000_000 / rate as u128;
    i64::try_from(us).ok()
}

fn configure_video(stream: &mut Stream, clock: &mut StreamClock, header: &StreamHeader, frame_period: u32) {
    let rate = if header.scale != 0 && header.rate != 0 {
        Rational::new(header.rate, header.scale)
    } else if frame_period != 0 {
        Rational::new(1_000_000, frame_period)
    } else {
        Rational::new(25, 1)
    };

    stream.media_type = MediaType::Video;
    stream.codec_tag = header.fcc_handler;
    stream.codec = codec_from_fourcc(header.fcc_handler.to_le_bytes());
    stream.frame_rate = Some(rate);
    stream.duration_us = span_us(header.length, rate.den, rate.num);

    *clock = StreamClock {
        scale: rate.den,
        rate: rate.num,
        sample_size: 0,
        position: 0,
    };
}

fn configure_audio(stream: &mut Stream, clock: &mut StreamClock, header: &StreamHeader) {
    let scale = header.scale.max(1);
    stream.media_type = MediaType::Audio;
    stream.duration_us = span_us(header.length, scale, header.rate);

    *clock = StreamClock {
        scale,
        rate: header.rate,
        sample_size: header.sample_size,
        position: 0,
    };
}

pub fn probe(data: &[u8]) -> u32 {
    if data.len() >= 12 && &data[0..4] == b"RIFF" && matches!(&data[8..12], b"AVI " | b"AVIX") {
        PROBE_SCORE_MAX
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Step;
    use crate::fixtures::{avi_av, avi_dv, avi_opendml, avi_video_only};

    fn run(data: &[u8]) -> (HeaderInfo, Vec<Packet>) {
        let mut cursor = ByteCursor::from_slice(data);
        let mut avi = AviDemuxer::new();
        let header = avi.read_header(&mut cursor).expect("header").ready().expect("complete header");
        let mut packets = Vec::new();
        while let Step::Ready(packet) = avi.read_packet(&mut cursor).expect("packet") {
            packets.push(packet);
        }
        (header, packets)
    }

    #[test]
    fn test_probe_signature() {
        let file = avi_video_only(&[vec![1, 2, 3]]);
        assert_eq!(probe(&file), PROBE_SCORE_MAX);
        assert_eq!(probe(b"RIFF\0\0\0\0WAVEfmt "), 0);
    }

    #[test]
    fn test_header_describes_video_stream() {
        let (header, packets) = run(&avi_video_only(&[vec![0xAA; 10], vec![0xBB; 7]]));
        let video = &header.streams[0];
        assert_eq!(video.media_type, MediaType::Video);
        assert_eq!(video.codec, CodecId::Mpeg4);
        assert_eq!(video.width, 320);
        assert_eq!(video.frame_rate, Some(Rational::new(25, 1)));
        assert_eq!(header.metadata.title.as_deref(), Some("Fixture"));

        assert_eq!(packets.len(), 2);
        assert_eq!(packets[1].size(), 7);
        assert_eq!(packets[1].pts_us, Some(40_000));
        assert!(packets.iter().all(|p| p.keyframe));
    }

    #[test]
    fn test_truncated_header_restarts_from_beginning() {
        let file = avi_video_only(&[vec![1; 4]]);
        let mut cursor = ByteCursor::from_slice(&file[..60]);
        let mut avi = AviDemuxer::new();
        assert_eq!(avi.read_header(&mut cursor).expect("no error"), Step::NeedMoreData);
        assert_eq!(cursor.tell(), 0);
    }

    #[test]
    fn test_audio_clock_counts_samples() {
        let (header, packets) = run(&avi_av(&[
            (*b"00dc", vec![0; 100]),
            (*b"01wb", vec![0; 4410 * 4]),
            (*b"01wb", vec![0; 4410 * 4]),
        ]));
        assert_eq!(header.streams[1].codec, CodecId::PcmS16Le);
        let audio: Vec<_> = packets.iter().filter(|p| p.stream_index == 1).collect();
        assert_eq!(audio[0].pts_us, Some(0));
        assert_eq!(audio[1].pts_us, Some(100_000));
    }

    #[test]
    fn test_garbage_between_chunks_is_scanned_past() {
        let (_, packets) = run(&avi_av(&[
            (*b"JUNK", vec![0x30; 6]),
            (*b"00dc", vec![9; 3]),
            (*b"07wb", vec![1; 2]),
            (*b"01wb", vec![5; 8]),
        ]));
        let sizes: Vec<_> = packets.iter().map(|p| (p.stream_index, p.size())).collect();
        assert_eq!(sizes, vec![(0, 3), (1, 8)]);
    }

    #[test]
    fn test_dv_chunks_are_duplicated_for_audio() {
        let (header, packets) = run(&avi_dv(&[vec![7; 12]]));
        assert_eq!(header.streams.len(), 2);
        assert_eq!(header.streams[1].codec, CodecId::DvAudio);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].stream_index, 0);
        assert_eq!(packets[1].stream_index, 1);
        assert_eq!(packets[0].data, packets[1].data);
    }

    #[test]
    fn test_opendml_continues_into_avix() {
        let (_, packets) = run(&avi_opendml(&[vec![1; 5]], &[vec![2; 6], vec![3; 4]]));
        let sizes: Vec<_> = packets.iter().map(Packet::size).collect();
        assert_eq!(sizes, vec![5, 6, 4]);
    }

    #[test]
    fn test_duration_from_strh_length() {
        let (header, _) = run(&avi_video_only(&[vec![1; 4]]));
        assert_eq!(header.streams[0].duration_us, Some(400_000));
    }

    #[test]
    fn test_duration_too_large_is_left_unset() {
        let mut file = avi_video_only(&[vec![1; 4], vec![2; 4]]);
        let body = file.windows(4).position(|w| w == b"strh").expect("strh") + 8;
        file[body + 20..body + 24].copy_from_slice(&u32::MAX.to_le_bytes());
        file[body + 24..body + 28].copy_from_slice(&1u32.to_le_bytes());
        file[body + 32..body + 36].copy_from_slice(&u32::MAX.to_le_bytes());

        let (header, packets) = run(&file);
        assert_eq!(header.streams[0].duration_us, None);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[1].pts_us, Some(u32::MAX as i64 * 1_000_000));
    }

    #[test]
    fn test_stream_count_mismatch_is_bad_header() {
        let mut file = avi_video_only(&[vec![1; 4]]);
        // RIFF header, LIST hdrl, avih chunk header, then six u32 fields
        file[56] = 2;
        let mut cursor = ByteCursor::from_slice(&file);
        let err = AviDemuxer::new().read_header(&mut cursor).unwrap_err();
        assert!(matches!(err, DemuxError::BadHeader(_)));
    }
}
