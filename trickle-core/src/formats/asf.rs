// ASF DEMUXER - GUID objects and multi-payload packets
//
// The header object is a list of GUID-tagged objects ending at the data
// object. The data object is a run of fixed-size physical packets, each
// carrying one or more payloads; a payload is a fragment of a media object
// that may span several physical packets.
//
// Packet parsing is split into committed steps (packet header, payload
// header, payload body, padding) so a fragment boundary can fall anywhere
// in the input.

use bytes::{Bytes, BytesMut};

use crate::cursor::{ByteCursor, ReadResult};
use crate::error::{DemuxError, Halt, Parse, StepResult};
use crate::formats::riff::{read_bitmap_info, read_wave_format, BITMAP_INFO_SIZE};
use crate::formats::{drive, transact, Flow, HeaderInfo};
use crate::metadata::Metadata;
use crate::packet::Packet;
use crate::registry::PROBE_SCORE_MAX;
use crate::stream::{MediaType, Stream};

// ============================================================================
// GUIDs (stored byte order)
// ============================================================================

pub(crate) type Guid = [u8; 16];

pub(crate) const HEADER: Guid = [
    0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62, 0xCE, 0x6C,
];
pub(crate) const DATA_OBJECT: Guid = [
    0x36, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62, 0xCE, 0x6C,
];
pub(crate) const CONTENT_DESCRIPTION: Guid = [
    0x33, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62, 0xCE, 0x6C,
];
pub(crate) const FILE_PROPERTIES: Guid = [
    0xA1, 0xDC, 0xAB, 0x8C, 0x47, 0xA9, 0xCF, 0x11, 0x8E, 0xE4, 0x00, 0xC0, 0x0C, 0x20, 0x53, 0x65,
];
pub(crate) const STREAM_PROPERTIES: Guid = [
    0x91, 0x07, 0xDC, 0xB7, 0xB7, 0xA9, 0xCF, 0x11, 0x8E, 0xE6, 0x00, 0xC0, 0x0C, 0x20, 0x53, 0x65,
];
pub(crate) const AUDIO_MEDIA: Guid = [
    0x40, 0x9E, 0x69, 0xF8, 0x4D, 0x5B, 0xCF, 0x11, 0xA8, 0xFD, 0x00, 0x80, 0x5F, 0x5C, 0x44, 0x2B,
];
pub(crate) const VIDEO_MEDIA: Guid = [
    0xC0, 0xEF, 0x19, 0xBC, 0x4D, 0x5B, 0xCF, 0x11, 0xA8, 0xFD, 0x00, 0x80, 0x5F, 0x5C, 0x44, 0x2B,
];
const CONTENT_ENCRYPTION: Guid = [
    0xFB, 0xB3, 0x11, 0x22, 0x23, 0xBD, 0xD2, 0x11, 0xB4, 0xB7, 0x00, 0xA0, 0xC9, 0x55, 0xFC, 0x6E,
];
const EXTENDED_CONTENT_ENCRYPTION: Guid = [
    0x14, 0xE6, 0x8A, 0x29, 0x22, 0x26, 0x17, 0x4C, 0xB9, 0x35, 0xDA, 0xE0, 0x7E, 0xE9, 0x28, 0x9C,
];
pub(crate) const EXTENDED_CONTENT_DESCRIPTION: Guid = [
    0x40, 0xA4, 0xD0, 0xD2, 0x07, 0xE3, 0xD2, 0x11, 0x97, 0xF0, 0x00, 0xA0, 0xC9, 0x5E, 0xA8, 0x50,
];
const CODEC_LIST: Guid = [
    0x40, 0x52, 0xD1, 0x86, 0x1D, 0x31, 0xD0, 0x11, 0xA3, 0xA4, 0x00, 0xA0, 0xC9, 0x03, 0x48, 0xF6,
];

/// GUID + size
const OBJECT_HEADER_SIZE: u64 = 24;
/// Header object: GUID, size, object count, two reserved bytes
const HEADER_OBJECT_SIZE: u64 = 30;
/// Data object: GUID, size, file id, packet count, reserved
const DATA_OBJECT_HEADER_SIZE: u64 = 50;

const STREAM_SLOTS: usize = 128;

/// Byte width of a field announced by a 2-bit length-type code.
pub(crate) fn width_for_code(code: u8) -> usize {
    const WIDTHS: [usize; 4] = [0, 1, 2, 4];
    WIDTHS[(code & 3) as usize]
}

/// Read a field whose width comes from a 2-bit code; absent fields take
/// `default`.
fn read_coded(cursor: &mut ByteCursor, code: u8, default: u32) -> ReadResult<u32> {
    Ok(match width_for_code(code) {
        1 => cursor.read_u8()? as u32,
        2 => cursor.read_u16_le()? as u32,
        4 => cursor.read_u32_le()?,
        _ => default,
    })
}

fn read_guid(cursor: &mut ByteCursor) -> ReadResult<Guid> {
    let raw = cursor.read_bytes(16)?;
    let mut guid = [0u8; 16];
    guid.copy_from_slice(&raw);
    Ok(guid)
}

// ============================================================================
// Per-stream state
// ============================================================================

/// Audio spread-spectrum interleave grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Descramble {
    pub span: u8,
    pub packet_size: u16,
    pub chunk_size: u16,
}

impl Descramble {
    fn is_active(&self) -> bool {
        self.span > 1 && self.chunk_size > 0 && self.packet_size / self.chunk_size > 1
    }

    /// Undo the row/column interleave of a complete media object.
    pub(crate) fn apply(&self, data: &[u8]) -> Option<Bytes> {
        let chunk = self.chunk_size as usize;
        let span = self.span as usize;
        let per_packet = self.packet_size as usize / chunk;
        if data.len() % chunk != 0 {
            return None;
        }

        let mut out = BytesMut::with_capacity(data.len());
        for off in 0..data.len() / chunk {
            let row = off / span;
            let col = off % span;
            let idx = row + col * per_packet;
            let src = data.get(idx * chunk..(idx + 1) * chunk)?;
            out.extend_from_slice(src);
        }
        Some(out.freeze())
    }
}

/// Object being reassembled for one stream.
#[derive(Debug)]
struct Partial {
    data: Vec<u8>,
    size: usize,
    seq: u32,
    pts_us: i64,
    keyframe: bool,
}

#[derive(Debug, Default)]
struct AsfStream {
    index: usize,
    descramble: Descramble,
    partial: Option<Partial>,
}

impl AsfStream {
    fn assembled(&self) -> usize {
        self.partial.as_ref().map_or(0, |p| p.data.len())
    }
}

// ============================================================================
// Packet state
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct PacketHeader {
    flags: u8,
    property: u8,
    segsizetype: u8,
    segments: u32,
    /// Payload bytes still unread in this physical packet
    size_left: i64,
    padding: u64,
    send_time: u32,
}

impl PacketHeader {
    fn multiple_payloads(&self) -> bool {
        self.flags & 0x01 != 0
    }

    fn is_exhausted(&self) -> bool {
        self.segments == 0 || self.size_left <= 0
    }
}

#[derive(Debug, Clone, Copy)]
struct Payload {
    stream_id: u8,
    keyframe: bool,
    seq: u32,
    frag_offset: u32,
    frag_size: usize,
    obj_size: u32,
    timestamp_ms: u32,
    compressed: Option<Compressed>,
}

/// Replicated-data length 1: the payload is a run of small objects, each
/// prefixed by a size byte, stamped at regular intervals.
#[derive(Debug, Clone, Copy)]
struct Compressed {
    time_ms: u32,
    delta_ms: u32,
    bytes_left: usize,
}

// ============================================================================
// Demuxer
// ============================================================================

#[derive(Debug)]
pub struct AsfDemuxer {
    packet_size: u32,
    min_packet_size: u32,
    preroll_ms: u32,
    streams: Vec<AsfStream>,
    /// ASF stream number to `streams` slot
    slots: [Option<usize>; STREAM_SLOTS],
    data_end: Option<u64>,
    packet: Option<PacketHeader>,
    payload: Option<Payload>,
    skip_remaining: u64,
    /// Largest header or media object accepted, from `max_buffer_size`
    max_object_size: Option<usize>,
}

impl Default for AsfDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl AsfDemuxer {
    pub fn new() -> Self {
        Self {
            packet_size: 0,
            min_packet_size: 0,
            preroll_ms: 0,
            streams: Vec::new(),
            slots: [None; STREAM_SLOTS],
            data_end: None,
            packet: None,
            payload: None,
            skip_remaining: 0,
            max_object_size: None,
        }
    }

    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            max_object_size: limit,
            ..Self::new()
        }
    }

    pub fn read_header(&mut self, cursor: &mut ByteCursor) -> StepResult<HeaderInfo> {
        transact(cursor, |c| self.parse_header(c))
    }

    pub fn read_packet(&mut self, cursor: &mut ByteCursor) -> StepResult<Packet> {
        drive(cursor, |c| self.step(c))
    }

    pub fn reset(&mut self) {
        // Byte offsets no longer line up with the data object
        self.data_end = None;
        self.packet = None;
        self.payload = None;
        self.skip_remaining = 0;
        for stream in &mut self.streams {
            stream.partial = None;
        }
    }

    pub fn read_close(&mut self) {
        self.reset();
        self.streams.clear();
        self.slots = [None; STREAM_SLOTS];
    }

    // ========================================================================
    // Header
    // ========================================================================

    fn parse_header(&mut self, cursor: &mut ByteCursor) -> Parse<HeaderInfo> {
        let header_start = cursor.stream_position();
        if read_guid(cursor)? != HEADER {
            return Err(DemuxError::bad_format("missing ASF header object").into());
        }
        let header_size = cursor.read_u64_le()?;
        let _object_count = cursor.read_u32_le()?;
        cursor.skip(2)?;
        if header_size < HEADER_OBJECT_SIZE {
            return Err(DemuxError::bad_header(format!("header object of {header_size} bytes")).into());
        }
        let header_end = header_start
            .checked_add(header_size)
            .filter(|end| end.checked_add(DATA_OBJECT_HEADER_SIZE).is_some())
            .ok_or_else(|| DemuxError::bad_header(format!("header object of {header_size} bytes")))?;
        if let Some(limit) = self.max_object_size {
            if header_size > limit as u64 {
                return Err(DemuxError::bad_header(format!(
                    "header object of {header_size} bytes exceeds the {limit} byte buffer limit"
                ))
                .into());
            }
        }

        // Parse only once every header object and the data object preamble
        // are buffered.
        let needed = header_size - HEADER_OBJECT_SIZE + DATA_OBJECT_HEADER_SIZE;
        if (cursor.available() as u64) < needed {
            if cursor.is_eof() {
                return Err(DemuxError::bad_header("input ended inside the ASF header").into());
            }
            return Err(Halt::NeedMoreData);
        }

        let mut file_props: Option<FileProperties> = None;
        let mut streams: Vec<Stream> = Vec::new();
        let mut asf_streams: Vec<AsfStream> = Vec::new();
        let mut slots = [None; STREAM_SLOTS];
        let mut metadata = Metadata::default();

        let data_object_start = loop {
            let object_start = cursor.stream_position();
            let guid = read_guid(cursor)?;
            let size = cursor.read_u64_le()?;
            if size < OBJECT_HEADER_SIZE {
                return Err(DemuxError::bad_header(format!("object of {size} bytes")).into());
            }
            if object_start >= header_end {
                if guid != DATA_OBJECT {
                    return Err(DemuxError::bad_header("no data object after the ASF header").into());
                }
                break object_start;
            }
            if object_start.checked_add(size).map_or(true, |end| end > header_end) {
                return Err(DemuxError::bad_header(format!(
                    "object of {size} bytes at {object_start} runs past the header end at {header_end}"
                ))
                .into());
            }

            match guid {
                DATA_OBJECT => {
                    return Err(DemuxError::bad_header("data object inside the ASF header").into());
                }
                FILE_PROPERTIES => file_props = Some(read_file_properties(cursor)?),
                STREAM_PROPERTIES => {
                    let body = size - OBJECT_HEADER_SIZE;
                    if let Some((number, mut stream, descramble)) =
                        read_stream_properties(cursor, body, streams.len())?
                    {
                        if let Some(slot) = slots.get_mut(number as usize) {
                            *slot = Some(asf_streams.len());
                        }
                        stream.id = number as u32;
                        asf_streams.push(AsfStream {
                            index: stream.index,
                            descramble,
                            partial: None,
                        });
                        streams.push(stream);
                    }
                }
                CONTENT_DESCRIPTION => read_content_description(cursor, &mut metadata)?,
                EXTENDED_CONTENT_DESCRIPTION => read_extended_description(cursor, &mut metadata)?,
                CODEC_LIST => read_codec_list(cursor, &mut metadata)?,
                CONTENT_ENCRYPTION | EXTENDED_CONTENT_ENCRYPTION => {
                    return Err(DemuxError::Encrypted.into());
                }
                _ => {}
            }

            let consumed = cursor.stream_position() - object_start;
            if consumed > size {
                return Err(DemuxError::bad_header(format!(
                    "object overran its declared size ({consumed} > {size})"
                ))
                .into());
            }
            cursor.skip((size - consumed) as usize)?;
        };

        // Data object preamble
        let data_size = cursor.read_u64_le()?;
        let _file_id = read_guid(cursor)?;
        let total_packets = cursor.read_u64_le()?;
        cursor.skip(2)?;

        let Some(props) = file_props else {
            return Err(DemuxError::no_header("ASF without file properties").into());
        };
        if streams.is_empty() {
            return Err(DemuxError::no_header("ASF without audio or video streams").into());
        }
        if props.max_packet_size == 0 {
            return Err(DemuxError::bad_header("zero packet size").into());
        }

        if let Some(duration_us) = props.duration_us() {
            for stream in &mut streams {
                stream.duration_us = Some(duration_us);
            }
        }

        tracing::debug!(
            streams = streams.len(),
            packet_size = props.max_packet_size,
            preroll_ms = props.preroll_ms,
            packets = total_packets,
            "ASF header parsed"
        );

        self.packet_size = props.max_packet_size;
        self.min_packet_size = props.min_packet_size;
        self.preroll_ms = props.preroll_ms;
        self.streams = asf_streams;
        self.slots = slots;
        self.data_end = data_object_start
            .checked_add(data_size)
            .filter(|_| data_size >= DATA_OBJECT_HEADER_SIZE);
        self.packet = None;
        self.payload = None;
        self.skip_remaining = 0;

        Ok(HeaderInfo { streams, metadata })
    }

    // ========================================================================
    // Packets
    // ========================================================================

    fn step(&mut self, cursor: &mut ByteCursor) -> Parse<Flow> {
        if self.skip_remaining > 0 {
            self.skip_remaining -= cursor.skip_partial(self.skip_remaining);
            return Ok(if self.skip_remaining > 0 { Flow::Wait } else { Flow::Continue });
        }

        if let Some(payload) = self.payload {
            return match payload.compressed {
                Some(run) => self.read_compressed(cursor, payload, run),
                None => self.read_fragment(cursor, payload),
            };
        }

        match self.packet {
            Some(packet) if packet.is_exhausted() => {
                self.skip_remaining = packet.size_left.max(0) as u64 + packet.padding;
                self.packet = None;
                Ok(Flow::Continue)
            }
            Some(packet) => self.read_payload_header(cursor, packet),
            None => {
                if self.data_end.is_some_and(|end| cursor.stream_position() >= end) {
                    // Index objects and anything else after the data object
                    cursor.skip_partial(cursor.available() as u64);
                    return Ok(Flow::Wait);
                }
                self.packet = Some(self.read_packet_header(cursor)?);
                Ok(Flow::Continue)
            }
        }
    }

    fn read_packet_header(&self, cursor: &mut ByteCursor) -> Parse<PacketHeader> {
        let start = cursor.stream_position();

        let mut flags = cursor.read_u8()?;
        if flags & 0x80 != 0 {
            // Error correction data precedes the real flags byte
            let ec_length = (flags & 0x0F) as usize;
            cursor.skip(ec_length)?;
            flags = cursor.read_u8()?;
        }
        let property = cursor.read_u8()?;

        let packet_length = read_coded(cursor, flags >> 5, self.packet_size)?;
        let _sequence = read_coded(cursor, flags >> 1, 0)?;
        let mut padding = read_coded(cursor, flags >> 3, 0)? as u64;
        let send_time = cursor.read_u32_le()?;
        let _duration = cursor.read_u16_le()?;

        let (segsizetype, segments) = if flags & 0x01 != 0 {
            let segsizetype = cursor.read_u8()?;
            (segsizetype, (segsizetype & 0x3F) as u32)
        } else {
            (0x80, 1)
        };

        let header_len = (cursor.stream_position() - start) as i64;
        let size_left = packet_length as i64 - padding as i64 - header_len;
        if packet_length < self.min_packet_size {
            padding += (self.min_packet_size - packet_length) as u64;
        }

        tracing::trace!(packet_length, padding, size_left, segments, "ASF packet");

        Ok(PacketHeader {
            flags,
            property,
            segsizetype,
            segments,
            size_left,
            padding,
            send_time,
        })
    }

    fn read_payload_header(&mut self, cursor: &mut ByteCursor, mut packet: PacketHeader) -> Parse<Flow> {
        let start = cursor.stream_position();

        let number = cursor.read_u8()?;
        let seq = read_coded(cursor, packet.property >> 4, 0)?;
        let mut frag_offset = read_coded(cursor, packet.property >> 2, 0)?;
        let replic = read_coded(cursor, packet.property, 0)?;

        let mut obj_size = 0;
        let mut timestamp_ms = packet.send_time;
        let mut compressed = None;
        if replic > 1 {
            if replic < 8 {
                return Err(DemuxError::bad_format(format!("replicated data of {replic} bytes")).into());
            }
            obj_size = cursor.read_u32_le()?;
            timestamp_ms = cursor.read_u32_le()?;
            cursor.skip(replic as usize - 8)?;
        } else {
            // The offset field holds the presentation time of the run
            let time_ms = frag_offset;
            frag_offset = 0;
            if replic == 1 {
                let delta_ms = cursor.read_u8()? as u32;
                compressed = Some(Compressed {
                    time_ms,
                    delta_ms,
                    bytes_left: 0,
                });
            }
        }

        let header_len = (cursor.stream_position() - start) as i64;
        let frag_size = if packet.multiple_payloads() {
            read_coded(cursor, packet.segsizetype >> 6, 0)? as i64
        } else {
            packet.size_left - header_len
        };
        let header_len = (cursor.stream_position() - start) as i64;

        packet.segments -= 1;
        packet.size_left -= header_len;

        if frag_size < 0 || frag_size > packet.size_left {
            tracing::warn!(frag_size, left = packet.size_left, "ASF payload overruns its packet");
            packet.segments = 0;
            self.packet = Some(packet);
            return Ok(Flow::Continue);
        }
        let frag_size = frag_size as usize;

        let stream_id = number & 0x7F;
        if self.slot(stream_id).is_none() {
            tracing::trace!(stream_id, frag_size, "skipping payload for unknown stream");
            packet.size_left -= frag_size as i64;
            self.packet = Some(packet);
            self.skip_remaining = frag_size as u64;
            return Ok(Flow::Continue);
        }

        if let Some(run) = compressed.as_mut() {
            run.bytes_left = frag_size;
        } else if replic == 0 {
            obj_size = frag_size as u32;
        }

        self.packet = Some(packet);
        self.payload = Some(Payload {
            stream_id,
            keyframe: number & 0x80 != 0,
            seq,
            frag_offset,
            frag_size,
            obj_size,
            timestamp_ms,
            compressed,
        });
        Ok(Flow::Continue)
    }

    fn read_fragment(&mut self, cursor: &mut ByteCursor, payload: Payload) -> Parse<Flow> {
        let slot = self.slot(payload.stream_id).ok_or_else(|| {
            DemuxError::bad_format(format!("payload for unmapped stream {}", payload.stream_id))
        })?;

        if payload.obj_size == 0 {
            tracing::trace!(stream_id = payload.stream_id, "skipping empty ASF object");
            self.consume_payload(payload.frag_size);
            self.skip_remaining = payload.frag_size as u64;
            return Ok(Flow::Continue);
        }
        if let Some(limit) = self.max_object_size {
            if payload.obj_size as usize > limit {
                return Err(DemuxError::OutOfMemory {
                    requested: payload.obj_size as usize,
                }
                .into());
            }
        }

        let stream = &self.streams[slot];
        let continues = payload.frag_offset as usize == stream.assembled()
            && (payload.frag_offset == 0
                || stream.partial.as_ref().is_some_and(|p| p.seq == payload.seq));
        let overflows = payload.frag_offset as usize + payload.frag_size > payload.obj_size as usize;

        if !continues || overflows {
            // Cannot continue the current object: drop it
            if stream.partial.is_some() {
                tracing::warn!(
                    stream = stream.index,
                    offset = payload.frag_offset,
                    "dropping incomplete ASF object"
                );
            }
            self.streams[slot].partial = None;
            if payload.frag_offset != 0 || overflows {
                self.consume_payload(payload.frag_size);
                self.skip_remaining = payload.frag_size as u64;
                return Ok(Flow::Continue);
            }
        }

        let data = cursor.read_bytes(payload.frag_size)?;
        self.consume_payload(payload.frag_size);

        let pts_us = self.pts_us(payload.timestamp_ms);
        let stream = &mut self.streams[slot];
        let partial = stream.partial.get_or_insert_with(|| Partial {
            data: Vec::new(),
            size: payload.obj_size as usize,
            seq: payload.seq,
            pts_us,
            keyframe: payload.keyframe,
        });
        let requested = partial.data.len() + data.len();
        partial
            .data
            .try_reserve(data.len())
            .map_err(|_| DemuxError::OutOfMemory { requested })?;
        partial.data.extend_from_slice(&data);

        if partial.data.len() < partial.size {
            return Ok(Flow::Continue);
        }

        let Some(done) = stream.partial.take() else {
            return Ok(Flow::Continue);
        };
        let descrambled = if stream.descramble.is_active() {
            let out = stream.descramble.apply(&done.data);
            if out.is_none() {
                tracing::warn!(stream = stream.index, "ASF object does not fit its descramble grid");
            }
            out
        } else {
            None
        };
        let data = descrambled.unwrap_or_else(|| Bytes::from(done.data));

        Ok(Flow::Packet(
            Packet::new(stream.index, data)
                .with_timestamp(Some(done.pts_us))
                .with_keyframe(done.keyframe),
        ))
    }

    fn read_compressed(&mut self, cursor: &mut ByteCursor, payload: Payload, run: Compressed) -> Parse<Flow> {
        let slot = self.slot(payload.stream_id).ok_or_else(|| {
            DemuxError::bad_format(format!("payload for unmapped stream {}", payload.stream_id))
        })?;

        if run.bytes_left == 0 {
            self.payload = None;
            return Ok(Flow::Continue);
        }

        let size = cursor.peek(1)?[0] as usize;
        if size > run.bytes_left - 1 {
            tracing::debug!(size, left = run.bytes_left, "truncated compressed ASF payload");
            self.consume_packet_bytes(run.bytes_left);
            self.payload = None;
            self.skip_remaining = run.bytes_left as u64;
            return Ok(Flow::Continue);
        }

        cursor.skip(1)?;
        let data = cursor.read_bytes(size)?;

        self.consume_packet_bytes(1 + size);
        let next = Compressed {
            time_ms: run.time_ms.wrapping_add(run.delta_ms),
            delta_ms: run.delta_ms,
            bytes_left: run.bytes_left - 1 - size,
        };
        self.payload = Some(Payload {
            compressed: Some(next),
            ..payload
        });
        if data.is_empty() {
            return Ok(Flow::Continue);
        }

        let pts_us = self.pts_us(run.time_ms);
        let stream = &mut self.streams[slot];
        stream.partial = None;
        Ok(Flow::Packet(
            Packet::new(stream.index, data)
                .with_timestamp(Some(pts_us))
                .with_keyframe(payload.keyframe),
        ))
    }

    /// Account for a finished payload body.
    fn consume_payload(&mut self, frag_size: usize) {
        self.consume_packet_bytes(frag_size);
        self.payload = None;
    }

    fn consume_packet_bytes(&mut self, n: usize) {
        if let Some(packet) = self.packet.as_mut() {
            packet.size_left -= n as i64;
        }
    }

    fn slot(&self, stream_id: u8) -> Option<usize> {
        self.slots.get(stream_id as usize).copied().flatten()
    }

    fn pts_us(&self, timestamp_ms: u32) -> i64 {
        (timestamp_ms as i64 - self.preroll_ms as i64) * 1000
    }
}

// ============================================================================
// Header objects
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct FileProperties {
    /// 100ns units
    play_duration: u64,
    preroll_ms: u32,
    min_packet_size: u32,
    max_packet_size: u32,
}

impl FileProperties {
    fn duration_us(&self) -> Option<i64> {
        let play_us = (self.play_duration / 10) as i64;
        let duration = play_us - self.preroll_ms as i64 * 1000;
        (self.play_duration > 0 && duration > 0).then_some(duration)
    }
}

fn read_file_properties(cursor: &mut ByteCursor) -> Parse<FileProperties> {
    let _file_id = read_guid(cursor)?;
    let _file_size = cursor.read_u64_le()?;
    let _created = cursor.read_u64_le()?;
    let _packets = cursor.read_u64_le()?;
    let play_duration = cursor.read_u64_le()?;
    let _send_duration = cursor.read_u64_le()?;
    let preroll_ms = cursor.read_u64_le()? as u32;
    let _flags = cursor.read_u32_le()?;
    let min_packet_size = cursor.read_u32_le()?;
    let max_packet_size = cursor.read_u32_le()?;
    let _max_bitrate = cursor.read_u32_le()?;

    Ok(FileProperties {
        play_duration,
        preroll_ms,
        min_packet_size,
        max_packet_size,
    })
}

/// Returns None for stream types other than audio and video.
fn read_stream_properties(
    cursor: &mut ByteCursor,
    body: u64,
    index: usize,
) -> Parse<Option<(u8, Stream, Descramble)>> {
    let start = cursor.stream_position();
    let kind = read_guid(cursor)?;
    let _error_correction = read_guid(cursor)?;
    let _time_offset = cursor.read_u64_le()?;
    let type_specific_len = cursor.read_u32_le()?;
    let _error_correction_len = cursor.read_u32_le()?;
    let number = (cursor.read_u16_le()? & 0x7F) as u8;
    cursor.skip(4)?;

    let mut descramble = Descramble::default();
    let stream = match kind {
        AUDIO_MEDIA => {
            let mut stream = Stream::new(index, MediaType::Audio);
            read_wave_format(cursor, type_specific_len)?.apply(&mut stream);

            let used = cursor.stream_position() - start;
            if body >= used + 8 {
                descramble.span = cursor.read_u8()?;
                descramble.packet_size = cursor.read_u16_le()?;
                descramble.chunk_size = cursor.read_u16_le()?;
                let _data_size = cursor.read_u16_le()?;
                let _silence = cursor.read_u8()?;
            }
            if descramble.span > 1 && !descramble.is_active() {
                descramble.span = 0;
            }
            stream
        }
        VIDEO_MEDIA => {
            let mut stream = Stream::new(index, MediaType::Video);
            let _width = cursor.read_u32_le()?;
            let _height = cursor.read_u32_le()?;
            cursor.skip(1)?;
            let format_size = cursor.read_u16_le()? as u32;
            read_bitmap_info(cursor)?.apply(&mut stream);
            if format_size > BITMAP_INFO_SIZE {
                stream.extradata = cursor.read_bytes((format_size - BITMAP_INFO_SIZE) as usize)?;
            }
            stream
        }
        _ => {
            tracing::warn!(number, "skipping ASF stream that is neither audio nor video");
            return Ok(None);
        }
    };

    tracing::debug!(
        number,
        codec = stream.codec.name(),
        descramble = descramble.is_active(),
        "ASF stream properties"
    );
    Ok(Some((number, stream, descramble)))
}

fn read_content_description(cursor: &mut ByteCursor, metadata: &mut Metadata) -> Parse<()> {
    let title_len = cursor.read_u16_le()? as usize;
    let author_len = cursor.read_u16_le()? as usize;
    let copyright_len = cursor.read_u16_le()? as usize;
    let comment_len = cursor.read_u16_le()? as usize;
    let rating_len = cursor.read_u16_le()? as usize;

    Metadata::set(&mut metadata.title, cursor.read_utf16le(title_len)?);
    Metadata::set(&mut metadata.author, cursor.read_utf16le(author_len)?);
    Metadata::set(&mut metadata.copyright, cursor.read_utf16le(copyright_len)?);
    Metadata::set(&mut metadata.comment, cursor.read_utf16le(comment_len)?);
    cursor.skip(rating_len)?;
    Ok(())
}

/// Typed value of an extended content descriptor, rendered as text.
fn read_descriptor_value(cursor: &mut ByteCursor, kind: u16, len: usize) -> Parse<Option<String>> {
    let value = match (kind, len) {
        (0, _) => Some(cursor.read_utf16le(len)?),
        (2 | 3, 4) => Some(cursor.read_u32_le()?.to_string()),
        (4, 8) => Some(cursor.read_u64_le()?.to_string()),
        (5, 2) => Some(cursor.read_u16_le()?.to_string()),
        _ => {
            cursor.skip(len)?;
            None
        }
    };
    Ok(value)
}

fn read_extended_description(cursor: &mut ByteCursor, metadata: &mut Metadata) -> Parse<()> {
    let count = cursor.read_u16_le()?;
    for _ in 0..count {
        let name_len = cursor.read_u16_le()? as usize;
        let name = cursor.read_utf16le(name_len)?;
        let kind = cursor.read_u16_le()?;
        let value_len = cursor.read_u16_le()? as usize;
        let Some(value) = read_descriptor_value(cursor, kind, value_len)? else {
            continue;
        };

        match name.as_str() {
            "WM/AlbumTitle" => Metadata::set(&mut metadata.album, value),
            "WM/TrackNumber" => Metadata::set(&mut metadata.track, value),
            // Zero-based
            "WM/Track" if metadata.track.is_none() => {
                let track = value.parse::<u32>().map(|n| (n + 1).to_string()).unwrap_or(value);
                Metadata::set(&mut metadata.track, track);
            }
            "WM/Year" => Metadata::set(&mut metadata.year, value),
            "WM/Genre" => Metadata::set(&mut metadata.genre, value),
            "WM/Track" => {}
            _ if !value.is_empty() => {
                metadata.extra.insert(name, value);
            }
            _ => {}
        }
    }
    Ok(())
}

fn read_codec_list(cursor: &mut ByteCursor, metadata: &mut Metadata) -> Parse<()> {
    let _reserved = read_guid(cursor)?;
    let count = cursor.read_u32_le()?;
    for n in 0..count {
        let _kind = cursor.read_u16_le()?;
        let name_chars = cursor.read_u16_le()? as usize;
        let name = cursor.read_utf16le(name_chars * 2)?;
        let description_chars = cursor.read_u16_le()? as usize;
        let description = cursor.read_utf16le(description_chars * 2)?;
        let info_len = cursor.read_u16_le()? as usize;
        cursor.skip(info_len)?;

        tracing::debug!(codec = %name, %description, "ASF codec entry");
        if !name.is_empty() {
            metadata.extra.insert(format!("codec.{n}"), name);
        }
    }
    Ok(())
}

pub fn probe(data: &[u8]) -> u32 {
    if data.len() > 32 && data[..16] == HEADER {
        PROBE_SCORE_MAX
    } else {
        0
    }
}
