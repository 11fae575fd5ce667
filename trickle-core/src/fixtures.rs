//! Byte-exact container builders for tests.
//!
//! Every builder returns a complete file image; tests slice it however they
//! like to simulate network-sized reads.

use crate::cursor::ByteCursor;
use crate::formats::asf::{
    Guid, AUDIO_MEDIA, CONTENT_DESCRIPTION, DATA_OBJECT, EXTENDED_CONTENT_DESCRIPTION,
    FILE_PROPERTIES, HEADER, STREAM_PROPERTIES, VIDEO_MEDIA,
};
use crate::formats::ogg::crc_for_tests;

fn finish(cursor: ByteCursor) -> Vec<u8> {
    cursor.unread().to_vec()
}

// ============================================================================
// RIFF
// ============================================================================

/// `tag size body [pad]`
fn chunk(tag: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut c = ByteCursor::new();
    c.put_tag(tag);
    c.put_u32_le(body.len() as u32);
    c.put_bytes(body);
    if body.len() % 2 == 1 {
        c.put_u8(0);
    }
    finish(c)
}

/// `LIST size kind children...` (or `RIFF`)
fn list(outer: &[u8; 4], kind: &[u8; 4], children: &[Vec<u8>]) -> Vec<u8> {
    let body: Vec<u8> = children.concat();
    let mut c = ByteCursor::new();
    c.put_tag(outer);
    c.put_u32_le(4 + body.len() as u32);
    c.put_tag(kind);
    c.put_bytes(&body);
    finish(c)
}

fn info_list(title: &str) -> Vec<u8> {
    let mut text = title.as_bytes().to_vec();
    text.push(0);
    list(b"LIST", b"INFO", &[chunk(b"INAM", &text)])
}

// ============================================================================
// WAV
// ============================================================================

/// PCM S16LE stereo 44.1 kHz titled "Tone". The data chunk declares
/// `declared_size` bytes and carries `actual` bytes of a ramp.
pub(crate) fn wav_file(declared_size: u32, actual: usize) -> Vec<u8> {
    let mut fmt = ByteCursor::new();
    fmt.put_u16_le(1);
    fmt.put_u16_le(2);
    fmt.put_u32_le(44_100);
    fmt.put_u32_le(176_400);
    fmt.put_u16_le(4);
    fmt.put_u16_le(16);

    let samples: Vec<u8> = (0..actual).map(|i| (i % 251) as u8).collect();

    let mut c = ByteCursor::new();
    c.put_tag(b"RIFF");
    c.put_u32_le(0);
    c.put_tag(b"WAVE");
    c.put_bytes(&chunk(b"fmt ", fmt.unread()));
    c.put_bytes(&info_list("Tone"));
    c.put_tag(b"data");
    c.put_u32_le(declared_size);
    c.put_bytes(&samples);

    let riff_size = (c.write_pos() - 8) as u32;
    c.patch_u32_le(4, riff_size).expect("riff size");
    finish(c)
}

// ============================================================================
// AVI
// ============================================================================

fn avih(streams: u32, frames: u32) -> Vec<u8> {
    let mut c = ByteCursor::new();
    c.put_u32_le(40_000); // 25 fps
    c.put_u32_le(0);
    c.put_u32_le(0);
    c.put_u32_le(0x10);
    c.put_u32_le(frames);
    c.put_u32_le(0);
    c.put_u32_le(streams);
    c.put_u32_le(0);
    c.put_u32_le(320);
    c.put_u32_le(240);
    c.put_bytes(&[0; 16]);
    chunk(b"avih", c.unread())
}

fn strh(kind: &[u8; 4], handler: &[u8; 4], scale: u32, rate: u32, length: u32, sample_size: u32) -> Vec<u8> {
    let mut c = ByteCursor::new();
    c.put_tag(kind);
    c.put_tag(handler);
    c.put_u32_le(0);
    c.put_u32_le(0);
    c.put_u32_le(0);
    c.put_u32_le(scale);
    c.put_u32_le(rate);
    c.put_u32_le(0);
    c.put_u32_le(length);
    c.put_u32_le(0);
    c.put_u32_le(u32::MAX);
    c.put_u32_le(sample_size);
    c.put_bytes(&[0; 8]);
    chunk(b"strh", c.unread())
}

fn strf_video(compression: &[u8; 4]) -> Vec<u8> {
    let mut c = ByteCursor::new();
    c.put_u32_le(40);
    c.put_u32_le(320);
    c.put_u32_le(240);
    c.put_u16_le(1);
    c.put_u16_le(24);
    c.put_tag(compression);
    c.put_bytes(&[0; 20]);
    chunk(b"strf", c.unread())
}

fn strf_pcm() -> Vec<u8> {
    let mut c = ByteCursor::new();
    c.put_u16_le(1);
    c.put_u16_le(2);
    c.put_u32_le(44_100);
    c.put_u32_le(176_400);
    c.put_u16_le(4);
    c.put_u16_le(16);
    chunk(b"strf", c.unread())
}

fn video_strl() -> Vec<u8> {
    list(
        b"LIST",
        b"strl",
        &[strh(b"vids", b"DIVX", 1, 25, 10, 0), strf_video(b"XVID")],
    )
}

fn movi(chunks: &[(&[u8; 4], &[u8])]) -> Vec<u8> {
    let body: Vec<Vec<u8>> = chunks.iter().map(|(tag, data)| chunk(tag, data)).collect();
    list(b"LIST", b"movi", &body)
}

fn idx1(entries: usize) -> Vec<u8> {
    chunk(b"idx1", &vec![0; entries * 16])
}

fn video_chunks(frames: &[Vec<u8>]) -> Vec<(&'static [u8; 4], &[u8])> {
    frames.iter().map(|f| (b"00dc", f.as_slice())).collect()
}

/// One MPEG-4 video stream at 25 fps, titled "Fixture", with an idx1.
pub(crate) fn avi_video_only(frames: &[Vec<u8>]) -> Vec<u8> {
    let hdrl = list(b"LIST", b"hdrl", &[avih(1, frames.len() as u32), video_strl()]);
    list(
        b"RIFF",
        b"AVI ",
        &[hdrl, info_list("Fixture"), movi(&video_chunks(frames)), idx1(frames.len())],
    )
}

/// Video stream 0 plus PCM S16LE stereo 44.1 kHz as stream 1. Chunks are
/// written to movi exactly as given.
pub(crate) fn avi_av(chunks: &[([u8; 4], Vec<u8>)]) -> Vec<u8> {
    let audio_strl = list(
        b"LIST",
        b"strl",
        &[strh(b"auds", &[0; 4], 1, 44_100, 0, 4), strf_pcm()],
    );
    let hdrl = list(b"LIST", b"hdrl", &[avih(2, 0), video_strl(), audio_strl]);
    let body: Vec<(&[u8; 4], &[u8])> = chunks.iter().map(|(tag, data)| (tag, data.as_slice())).collect();
    list(b"RIFF", b"AVI ", &[hdrl, movi(&body), idx1(chunks.len())])
}

/// Type 1 DV: a single `iavs` stream.
pub(crate) fn avi_dv(frames: &[Vec<u8>]) -> Vec<u8> {
    let strl = list(
        b"LIST",
        b"strl",
        &[strh(b"iavs", b"dvsd", 1, 25, frames.len() as u32, 0), chunk(b"strf", &[0; 32])],
    );
    let hdrl = list(b"LIST", b"hdrl", &[avih(1, frames.len() as u32), strl]);
    list(b"RIFF", b"AVI ", &[hdrl, movi(&video_chunks(frames))])
}

/// OpenDML: the first RIFF holds `first`, an `AVIX` RIFF holds `second`.
pub(crate) fn avi_opendml(first: &[Vec<u8>], second: &[Vec<u8>]) -> Vec<u8> {
    let total = (first.len() + second.len()) as u32;
    let hdrl = list(b"LIST", b"hdrl", &[avih(1, total), video_strl()]);
    let mut file = list(b"RIFF", b"AVI ", &[hdrl, movi(&video_chunks(first)), idx1(first.len())]);
    file.extend(list(b"RIFF", b"AVIX", &[movi(&video_chunks(second))]));
    file
}

// ============================================================================
// Ogg
// ============================================================================

/// One page with an explicit lacing table.
pub(crate) fn ogg_page_raw(serial: u32, flags: u8, seq: u32, granule: i64, lacing: &[u8], body: &[u8]) -> Vec<u8> {
    let mut c = ByteCursor::new();
    c.put_tag(b"OggS");
    c.put_u8(0);
    c.put_u8(flags);
    c.put_u64_le(granule as u64);
    c.put_u32_le(serial);
    c.put_u32_le(seq);
    c.put_u32_le(0);
    c.put_u8(lacing.len() as u8);
    c.put_bytes(lacing);
    c.put_bytes(body);

    let crc = crc_for_tests(c.unread());
    c.patch_u32_le(22, crc).expect("crc slot");
    finish(c)
}

/// One page holding complete `packets`.
pub(crate) fn ogg_page(serial: u32, flags: u8, seq: u32, granule: i64, packets: &[&[u8]]) -> Vec<u8> {
    let mut lacing: Vec<u8> = Vec::new();
    for packet in packets {
        lacing.extend(std::iter::repeat(255).take(packet.len() / 255));
        lacing.push((packet.len() % 255) as u8);
    }
    ogg_page_raw(serial, flags, seq, granule, &lacing, &packets.concat())
}

fn vorbis_packet(kind: u8, body: &[u8]) -> Vec<u8> {
    let mut packet = vec![kind];
    packet.extend_from_slice(b"vorbis");
    packet.extend_from_slice(body);
    packet
}

/// Vorbis stereo 44.1 kHz, serial 0x0100. The identification packet has its
/// own BOS page, comment and setup share the second, and each audio packet
/// gets a page whose granule advances by 4410 samples.
pub(crate) fn ogg_vorbis(comments: &[&str], audio: &[Vec<u8>]) -> Vec<u8> {
    const SERIAL: u32 = 0x0100;

    let mut ident = ByteCursor::new();
    ident.put_u32_le(0);
    ident.put_u8(2);
    ident.put_u32_le(44_100);
    ident.put_u32_le(0);
    ident.put_u32_le(128_000);
    ident.put_u32_le(0);
    ident.put_u8(0xB8);
    ident.put_u8(1);
    let ident = vorbis_packet(1, ident.unread());

    let vendor = b"trickle fixture";
    let mut comment = ByteCursor::new();
    comment.put_u32_le(vendor.len() as u32);
    comment.put_bytes(vendor);
    comment.put_u32_le(comments.len() as u32);
    for entry in comments {
        comment.put_u32_le(entry.len() as u32);
        comment.put_bytes(entry.as_bytes());
    }
    comment.put_u8(1);
    let comment = vorbis_packet(3, comment.unread());

    let setup = vorbis_packet(5, &[0x42; 24]);

    let mut file = ogg_page(SERIAL, 0x02, 0, 0, &[ident.as_slice()]);
    file.extend(ogg_page(SERIAL, 0, 1, 0, &[comment.as_slice(), setup.as_slice()]));
    for (i, packet) in audio.iter().enumerate() {
        let granule = 4410 * (i as i64 + 1);
        file.extend(ogg_page(SERIAL, 0, 2 + i as u32, granule, &[packet.as_slice()]));
    }
    file
}

// ============================================================================
// ASF
// ============================================================================

pub(crate) const ASF_PACKET_SIZE: u32 = 2048;

fn utf16z(text: &str) -> Vec<u8> {
    let mut c = ByteCursor::new();
    c.put_utf16le(text);
    finish(c)
}

fn asf_object(guid: &Guid, body: &[u8]) -> Vec<u8> {
    let mut c = ByteCursor::new();
    c.put_bytes(guid);
    c.put_u64_le(24 + body.len() as u64);
    c.put_bytes(body);
    finish(c)
}

fn asf_stream_properties(kind: &Guid, number: u16, type_specific: &[u8], error_correction: &[u8]) -> Vec<u8> {
    let mut c = ByteCursor::new();
    c.put_bytes(kind);
    c.put_bytes(&[0; 16]);
    c.put_u64_le(0);
    c.put_u32_le(type_specific.len() as u32);
    c.put_u32_le(error_correction.len() as u32);
    c.put_u16_le(number);
    c.put_u32_le(0);
    c.put_bytes(type_specific);
    c.put_bytes(error_correction);
    asf_object(&STREAM_PROPERTIES, c.unread())
}

/// One payload of a physical packet.
#[derive(Debug, Clone)]
pub(crate) struct AsfPayload {
    stream: u8,
    object: u8,
    offset: u32,
    data: Vec<u8>,
    object_size: u32,
    pts_ms: u32,
}

impl AsfPayload {
    /// Keyframe fragment of media object `object` starting at `offset`.
    pub(crate) fn fragment(stream: u8, object: u8, offset: u32, data: &[u8], object_size: u32, pts_ms: u32) -> Self {
        Self {
            stream,
            object,
            offset,
            data: data.to_vec(),
            object_size,
            pts_ms,
        }
    }
}

/// A padded physical packet of `ASF_PACKET_SIZE` bytes. More than one
/// payload switches on the multiple-payloads layout with u16 lengths.
pub(crate) fn asf_packet(payloads: &[AsfPayload]) -> Vec<u8> {
    let multiple = payloads.len() > 1;

    let mut c = ByteCursor::new();
    c.put_u8(0x82);
    c.put_u16_le(0);
    c.put_u8(if multiple { 0x11 } else { 0x10 });
    c.put_u8(0x5D);
    let padding_at = c.write_pos();
    c.put_u16_le(0);
    c.put_u32_le(payloads.first().map_or(0, |p| p.pts_ms));
    c.put_u16_le(0);
    if multiple {
        c.put_u8(0x80 | payloads.len() as u8);
    }

    for payload in payloads {
        c.put_u8(0x80 | payload.stream);
        c.put_u8(payload.object);
        c.put_u32_le(payload.offset);
        c.put_u8(8);
        c.put_u32_le(payload.object_size);
        c.put_u32_le(payload.pts_ms);
        if multiple {
            c.put_u16_le(payload.data.len() as u16);
        }
        c.put_bytes(&payload.data);
    }

    let padding = ASF_PACKET_SIZE as usize - c.write_pos();
    let mut packet = finish(c);
    packet[padding_at..padding_at + 2].copy_from_slice(&(padding as u16).to_le_bytes());
    packet.resize(ASF_PACKET_SIZE as usize, 0);
    packet
}

/// MS-MPEG4v3 240x180 video as stream 1 and WMAv2 stereo audio as stream 2,
/// with a 1000 ms preroll, a 5 s play duration and "Clip" by "Someone" from
/// "Demo Album".
pub(crate) fn asf_file(packets: &[Vec<u8>]) -> Vec<u8> {
    let mut props = ByteCursor::new();
    props.put_bytes(&[0x11; 16]);
    props.put_u64_le(0);
    props.put_u64_le(0);
    props.put_u64_le(packets.len() as u64);
    props.put_u64_le(50_000_000);
    props.put_u64_le(40_000_000);
    props.put_u64_le(1_000);
    props.put_u32_le(0x02);
    props.put_u32_le(ASF_PACKET_SIZE);
    props.put_u32_le(ASF_PACKET_SIZE);
    props.put_u32_le(256_000);

    let mut video = ByteCursor::new();
    video.put_u32_le(240);
    video.put_u32_le(180);
    video.put_u8(2);
    video.put_u16_le(40);
    video.put_u32_le(40);
    video.put_u32_le(240);
    video.put_u32_le(180);
    video.put_u16_le(1);
    video.put_u16_le(24);
    video.put_tag(b"MP43");
    video.put_bytes(&[0; 20]);

    let mut audio = ByteCursor::new();
    audio.put_u16_le(0x0161);
    audio.put_u16_le(2);
    audio.put_u32_le(44_100);
    audio.put_u32_le(16_000);
    audio.put_u16_le(2973);
    audio.put_u16_le(16);
    audio.put_u16_le(10);
    audio.put_bytes(&[0; 10]);

    let mut spread = ByteCursor::new();
    spread.put_u8(1);
    spread.put_u16_le(2973);
    spread.put_u16_le(2973);
    spread.put_u16_le(1);
    spread.put_u8(0);

    let title = utf16z("Clip");
    let author = utf16z("Someone");
    let mut description = ByteCursor::new();
    description.put_u16_le(title.len() as u16);
    description.put_u16_le(author.len() as u16);
    description.put_u16_le(0);
    description.put_u16_le(0);
    description.put_u16_le(0);
    description.put_bytes(&title);
    description.put_bytes(&author);

    let name = utf16z("WM/AlbumTitle");
    let value = utf16z("Demo Album");
    let mut extended = ByteCursor::new();
    extended.put_u16_le(1);
    extended.put_u16_le(name.len() as u16);
    extended.put_bytes(&name);
    extended.put_u16_le(0);
    extended.put_u16_le(value.len() as u16);
    extended.put_bytes(&value);

    let objects = [
        asf_object(&FILE_PROPERTIES, props.unread()),
        asf_stream_properties(&VIDEO_MEDIA, 1, video.unread(), &[]),
        asf_stream_properties(&AUDIO_MEDIA, 2, audio.unread(), spread.unread()),
        asf_object(&CONTENT_DESCRIPTION, description.unread()),
        asf_object(&EXTENDED_CONTENT_DESCRIPTION, extended.unread()),
    ]
    .concat();

    let mut c = ByteCursor::new();
    c.put_bytes(&HEADER);
    c.put_u64_le(30 + objects.len() as u64);
    c.put_u32_le(5);
    c.put_u8(0x01);
    c.put_u8(0x02);
    c.put_bytes(&objects);

    let data: Vec<u8> = packets.concat();
    c.put_bytes(&DATA_OBJECT);
    c.put_u64_le(50 + data.len() as u64);
    c.put_bytes(&[0x11; 16]);
    c.put_u64_le(packets.len() as u64);
    c.put_u16_le(0x0101);
    c.put_bytes(&data);
    finish(c)
}
