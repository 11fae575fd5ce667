//! # Ogg/Vorbis Demuxer
//!
//! Two levels of framing:
//!
//! ```text
//!  bytes ──► pages ("OggS", lacing table, body) ──► packets (joined laces)
//! ```
//!
//! The header pass collects the three Vorbis header packets of the first
//! logical stream (identification, comment, setup). Afterwards the cursor
//! is rewound to where the header pass began, so those same pages are read
//! again by the packet pass and the header packets are emitted as ordinary
//! packets for the decoder.

use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};
use once_cell::sync::Lazy;

use crate::codec::CodecId;
use crate::cursor::{ByteCursor, ReadResult};
use crate::error::{DemuxError, Parse, StepResult};
use crate::formats::{drive, transact, Flow, HeaderInfo};
use crate::metadata::Metadata;
use crate::packet::Packet;
use crate::registry::PROBE_SCORE_MAX;
use crate::stream::{MediaType, Stream};

// ============================================================================
// Page Layout
// ============================================================================

const CAPTURE: &[u8; 4] = b"OggS";
const PAGE_HEADER_LEN: usize = 27;
const CRC_OFFSET: usize = 22;

const FLAG_CONTINUED: u8 = 0x01;
const FLAG_BOS: u8 = 0x02;

const VORBIS_IDENT: u8 = 1;
const VORBIS_COMMENT: u8 = 3;
const VORBIS_SETUP: u8 = 5;

static CRC_TABLE: Lazy<[u32; 256]> = Lazy::new(|| {
    let mut table = [0u32; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        let mut r = (i as u32) << 24;
        for _ in 0..8 {
            r = if r & 0x8000_0000 != 0 {
                (r << 1) ^ 0x04c1_1db7
            } else {
                r << 1
            };
        }
        *entry = r;
    }
    table
});

/// Ogg page checksum: CRC-32, polynomial 0x04c11db7, no reflection, zero init.
fn page_crc(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |crc, &byte| {
        (crc << 8) ^ CRC_TABLE[(((crc >> 24) as u8) ^ byte) as usize]
    })
}

#[derive(Debug, Clone)]
struct Page {
    header_type: u8,
    granule: i64,
    serial: u32,
    lacing: Vec<u8>,
    body: Bytes,
}

impl Page {
    fn is_bos(&self) -> bool {
        self.header_type & FLAG_BOS != 0
    }

    fn is_continued(&self) -> bool {
        self.header_type & FLAG_CONTINUED != 0
    }
}

enum PageRead {
    Page(Page),
    /// Bytes were dropped while hunting for a capture pattern
    Resync,
}

/// Read one page, or drop bytes that cannot start one.
fn read_page(cursor: &mut ByteCursor, verify_crc: bool) -> Parse<PageRead> {
    let unread = cursor.unread();
    if unread.len() >= 4 && &unread[..4] != CAPTURE {
        let skip = unread
            .windows(4)
            .position(|w| w == CAPTURE)
            .unwrap_or(unread.len() - 3);
        cursor.skip(skip)?;
        tracing::trace!(skip, "ogg resync");
        return Ok(PageRead::Resync);
    }

    let header = cursor.peek(PAGE_HEADER_LEN)?;
    let version = header[4];
    let segments = header[26] as usize;
    if version != 0 {
        cursor.skip(1)?;
        return Ok(PageRead::Resync);
    }

    let lacing = cursor.peek(PAGE_HEADER_LEN + segments)?[PAGE_HEADER_LEN..].to_vec();
    let body_len: usize = lacing.iter().map(|&l| l as usize).sum();
    let page_len = PAGE_HEADER_LEN + segments + body_len;
    let raw = cursor.peek(page_len)?;

    if verify_crc {
        let stored = u32::from_le_bytes([
            raw[CRC_OFFSET],
            raw[CRC_OFFSET + 1],
            raw[CRC_OFFSET + 2],
            raw[CRC_OFFSET + 3],
        ]);
        let mut zeroed = raw.to_vec();
        zeroed[CRC_OFFSET..CRC_OFFSET + 4].fill(0);
        if page_crc(&zeroed) != stored {
            tracing::warn!(stored, "ogg page checksum mismatch, resyncing");
            cursor.skip(1)?;
            return Ok(PageRead::Resync);
        }
    }

    cursor.skip(5)?;
    let header_type = cursor.read_u8()?;
    let granule = cursor.read_u64_le()? as i64;
    let serial = cursor.read_u32_le()?;
    let _sequence = cursor.read_u32_le()?;
    let _crc = cursor.read_u32_le()?;
    cursor.skip(1 + segments)?;
    let body = cursor.read_bytes(body_len)?;

    Ok(PageRead::Page(Page {
        header_type,
        granule,
        serial,
        lacing,
        body,
    }))
}

/// Joins lacing segments into packets across page boundaries.
#[derive(Debug, Default)]
struct PacketAssembler {
    partial: BytesMut,
    active: bool,
}

impl PacketAssembler {
    fn clear(&mut self) {
        self.partial.clear();
        self.active = false;
    }

    /// Packets completed on `page`, in order.
    fn push_page(&mut self, page: &Page) -> Vec<Bytes> {
        // A continuation with nothing to continue: drop up to the first packet end
        let mut skipping = page.is_continued() && !self.active;
        if !page.is_continued() && self.active {
            tracing::warn!(serial = page.serial, "ogg packet truncated by a fresh page");
            self.clear();
        }

        let mut packets = Vec::new();
        let mut offset = 0usize;
        for &lace in &page.lacing {
            let end = offset + lace as usize;
            if !skipping {
                self.partial.extend_from_slice(&page.body[offset..end]);
                self.active = true;
            }
            offset = end;

            if lace < 255 {
                if skipping {
                    skipping = false;
                } else {
                    packets.push(self.partial.split().freeze());
                    self.active = false;
                }
            }
        }
        packets
    }
}

// ============================================================================
// Vorbis Headers
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct VorbisIdent {
    channels: u8,
    sample_rate: u32,
    bitrate_max: i32,
    bitrate_nominal: i32,
    bitrate_min: i32,
}

fn check_signature(packet: &[u8], kind: u8) -> Result<(), DemuxError> {
    if packet.len() < 7 || packet[0] != kind || &packet[1..7] != b"vorbis" {
        return Err(DemuxError::bad_format(format!(
            "expected Vorbis header packet type {kind}"
        )));
    }
    Ok(())
}

fn truncated(what: &str) -> DemuxError {
    DemuxError::bad_header(format!("truncated Vorbis {what} header"))
}

fn parse_ident(packet: &[u8]) -> Result<VorbisIdent, DemuxError> {
    check_signature(packet, VORBIS_IDENT)?;
    let mut c = ByteCursor::from_slice(&packet[7..]);
    let version = c.read_u32_le().map_err(|_| truncated("identification"))?;
    if version != 0 {
        return Err(DemuxError::bad_header(format!("Vorbis version {version}")));
    }
    let ident = read_ident(&mut c).map_err(|_| truncated("identification"))?;
    if ident.channels == 0 || ident.sample_rate == 0 {
        return Err(DemuxError::bad_header("Vorbis identification with no channels or rate"));
    }
    Ok(ident)
}

fn read_ident(c: &mut ByteCursor) -> ReadResult<VorbisIdent> {
    Ok(VorbisIdent {
        channels: c.read_u8()?,
        sample_rate: c.read_u32_le()?,
        bitrate_max: c.read_u32_le()? as i32,
        bitrate_nominal: c.read_u32_le()? as i32,
        bitrate_min: c.read_u32_le()? as i32,
    })
}

fn read_string(c: &mut ByteCursor) -> ReadResult<String> {
    let len = c.read_u32_le()? as usize;
    let raw = c.read_bytes(len)?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

fn parse_comments(packet: &[u8], metadata: &mut Metadata) -> Result<(), DemuxError> {
    check_signature(packet, VORBIS_COMMENT)?;
    let mut c = ByteCursor::from_slice(&packet[7..]);

    let vendor = read_string(&mut c).map_err(|_| truncated("comment"))?;
    metadata.extra.insert("vendor".to_string(), vendor);

    let count = c.read_u32_le().map_err(|_| truncated("comment"))?;
    let mut date = None;
    for _ in 0..count {
        let entry = read_string(&mut c).map_err(|_| truncated("comment"))?;
        let Some((key, value)) = entry.split_once('=') else {
            continue;
        };
        match key.to_ascii_lowercase().as_str() {
            "title" => Metadata::set(&mut metadata.title, value),
            "artist" => Metadata::set(&mut metadata.author, value),
            "album" => Metadata::set(&mut metadata.album, value),
            "tracknum" | "tracknumber" => Metadata::set(&mut metadata.track, value),
            "year" => Metadata::set(&mut metadata.year, value),
            "date" => date = Some(value.to_string()),
            "genre" => Metadata::set(&mut metadata.genre, value),
            "comment" | "description" => Metadata::set(&mut metadata.comment, value),
            "copyright" => Metadata::set(&mut metadata.copyright, value),
            other => {
                metadata.extra.insert(other.to_string(), value.to_string());
            }
        }
    }
    if metadata.year.is_none() {
        if let Some(date) = date {
            Metadata::set(&mut metadata.year, date);
        }
    }
    Ok(())
}

/// Header packets as Xiph extradata: each prefixed by its u16 BE length.
fn xiph_extradata(headers: &[Bytes]) -> Bytes {
    let mut out = BytesMut::new();
    for packet in headers {
        out.put_u16(packet.len().min(u16::MAX as usize) as u16);
        out.extend_from_slice(packet);
    }
    out.freeze()
}

// ============================================================================
// Ogg Demuxer
// ============================================================================

#[derive(Debug)]
pub struct OggDemuxer {
    verify_crc: bool,
    serial: Option<u32>,
    sample_rate: u32,
    assembler: PacketAssembler,
    pending: VecDeque<Packet>,
}

impl OggDemuxer {
    pub fn new(verify_crc: bool) -> Self {
        Self {
            verify_crc,
            serial: None,
            sample_rate: 0,
            assembler: PacketAssembler::default(),
            pending: VecDeque::new(),
        }
    }

    pub fn read_header(&mut self, cursor: &mut ByteCursor) -> StepResult<HeaderInfo> {
        transact(cursor, |c| self.parse_header(c))
    }

    pub fn read_packet(&mut self, cursor: &mut ByteCursor) -> StepResult<Packet> {
        drive(cursor, |c| self.step(c))
    }

    pub fn reset(&mut self) {
        self.assembler.clear();
        self.pending.clear();
    }

    pub fn read_close(&mut self) {
        self.reset();
        self.serial = None;
    }

    fn parse_header(&mut self, cursor: &mut ByteCursor) -> Parse<HeaderInfo> {
        let start = cursor.tell();
        let mut serial = None;
        let mut assembler = PacketAssembler::default();
        let mut headers: Vec<Bytes> = Vec::with_capacity(3);

        while headers.len() < 3 {
            let page = match read_page(cursor, self.verify_crc)? {
                PageRead::Page(page) => page,
                PageRead::Resync => continue,
            };
            match serial {
                None if page.is_bos() => serial = Some(page.serial),
                // Skip until a logical stream opens
                None => continue,
                Some(wanted) if wanted != page.serial => continue,
                Some(_) => {}
            }
            headers.extend(assembler.push_page(&page));
            if let Some(first) = headers.first() {
                check_signature(first, VORBIS_IDENT)?;
            }
        }
        headers.truncate(3);

        let ident = parse_ident(&headers[0])?;
        let mut metadata = Metadata::default();
        parse_comments(&headers[1], &mut metadata)?;
        check_signature(&headers[2], VORBIS_SETUP)?;

        let serial = serial.unwrap_or_default();
        let mut stream = Stream::new(0, MediaType::Audio);
        stream.id = serial;
        stream.codec = CodecId::Vorbis;
        stream.sample_rate = ident.sample_rate;
        stream.channels = ident.channels as u16;
        stream.bit_rate = ident.bitrate_nominal.max(0) as u32;
        stream.extradata = xiph_extradata(&headers);

        tracing::debug!(
            serial,
            sample_rate = ident.sample_rate,
            channels = ident.channels,
            bitrate_max = ident.bitrate_max,
            bitrate_min = ident.bitrate_min,
            "Vorbis headers parsed"
        );

        // Rewind so the packet pass sees the header pages too
        cursor.seek(start)?;
        self.serial = Some(serial);
        self.sample_rate = ident.sample_rate;
        self.reset();

        Ok(HeaderInfo {
            streams: vec![stream],
            metadata,
        })
    }

    fn step(&mut self, cursor: &mut ByteCursor) -> Parse<Flow> {
        if let Some(packet) = self.pending.pop_front() {
            return Ok(Flow::Packet(packet));
        }

        let page = match read_page(cursor, self.verify_crc)? {
            PageRead::Page(page) => page,
            PageRead::Resync => return Ok(Flow::Continue),
        };
        if Some(page.serial) != self.serial {
            tracing::trace!(serial = page.serial, "skipping page of another logical stream");
            return Ok(Flow::Continue);
        }

        let packets = self.assembler.push_page(&page);
        let last = packets.len().saturating_sub(1);
        for (i, data) in packets.into_iter().enumerate() {
            let ts = (i == last && page.granule >= 0 && self.sample_rate > 0)
                .then(|| (page.granule as i128 * 1_000_000 / self.sample_rate as i128) as i64);
            self.pending.push_back(Packet::new(0, data).with_timestamp(ts).with_keyframe(true));
        }
        Ok(Flow::Continue)
    }
}

pub fn probe(data: &[u8]) -> u32 {
    if data.len() >= 4 && &data[..4] == CAPTURE {
        PROBE_SCORE_MAX
    } else {
        0
    }
}

#[cfg(test)]
pub(crate) fn crc_for_tests(data: &[u8]) -> u32 {
    page_crc(data)
}
