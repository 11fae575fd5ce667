// WAV DEMUXER
//
// RIFF 'WAVE': walk chunks until `fmt ` and then `data`, then hand out
// fixed-size slices of the data chunk. No timestamps are derived.

use crate::cursor::ByteCursor;
use crate::error::{DemuxError, Halt, Parse, StepResult};
use crate::formats::riff::{
    info_field, is_info_tag, padded, read_info_text, read_wave_format, LIST, RIFF,
};
use crate::formats::{drive, transact, Flow, HeaderInfo};
use crate::metadata::Metadata;
use crate::packet::Packet;
use crate::registry::PROBE_SCORE_MAX;
use crate::stream::{MediaType, Stream};

const WAVE: u32 = 0x45564157; // "WAVE"
const FMT_: u32 = 0x20746D66; // "fmt "
const DATA: u32 = 0x61746164; // "data"
const INFO: u32 = 0x4F464E49; // "INFO"

#[derive(Debug)]
pub struct WavDemuxer {
    packet_size: usize,
    /// Bytes left in the data chunk; None while its length is unknown
    data_remaining: Option<u64>,
}

impl WavDemuxer {
    pub fn new(packet_size: usize) -> Self {
        Self {
            packet_size: packet_size.max(1),
            data_remaining: None,
        }
    }

    pub fn read_header(&mut self, cursor: &mut ByteCursor) -> StepResult<HeaderInfo> {
        transact(cursor, |c| self.parse_header(c))
    }

    pub fn read_packet(&mut self, cursor: &mut ByteCursor) -> StepResult<Packet> {
        drive(cursor, |c| self.step(c))
    }

    pub fn reset(&mut self) {
        self.data_remaining = None;
    }

    pub fn read_close(&mut self) {
        self.data_remaining = Some(0);
    }

    fn parse_header(&mut self, cursor: &mut ByteCursor) -> Parse<HeaderInfo> {
        if cursor.read_u32_le()? != RIFF {
            return Err(DemuxError::bad_format("missing RIFF signature").into());
        }
        let _riff_size = cursor.read_u32_le()?;
        if cursor.read_u32_le()? != WAVE {
            return Err(DemuxError::bad_format("RIFF form is not WAVE").into());
        }

        let mut stream: Option<Stream> = None;
        let mut metadata = Metadata::default();

        let data_size = loop {
            let tag = cursor.read_u32_le()?;
            let size = cursor.read_u32_le()?;

            match tag {
                FMT_ => {
                    let format = read_wave_format(cursor, size)?;
                    if size % 2 == 1 {
                        cursor.skip(1)?;
                    }
                    let mut audio = Stream::new(0, MediaType::Audio);
                    format.apply(&mut audio);
                    stream = Some(audio);
                }
                DATA => break size,
                LIST if cursor.peek_u32_le()? == INFO => {
                    cursor.skip(4)?;
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

        let Some(mut stream) = stream else {
            return Err(DemuxError::no_header("data chunk before fmt").into());
        };

        self.data_remaining = match data_size {
            0 | 0xFFFF_FFFF => None,
            size => Some(size as u64),
        };
        if let (Some(size), true) = (self.data_remaining, stream.bit_rate > 0) {
            stream.duration_us = Some((size as u128 * 8_000_000 / stream.bit_rate as u128) as i64);
        }

        tracing::debug!(
            codec = stream.codec.name(),
            sample_rate = stream.sample_rate,
            channels = stream.channels,
            data_size,
            "WAV header parsed"
        );

        Ok(HeaderInfo {
            streams: vec![stream],
            metadata,
        })
    }

    fn step(&mut self, cursor: &mut ByteCursor) -> Parse<Flow> {
        let want = match self.data_remaining {
            Some(0) => {
                // Trailing chunks after the samples carry nothing we emit
                cursor.skip_partial(cursor.available() as u64);
                return Ok(Flow::Wait);
            }
            Some(remaining) => remaining.min(self.packet_size as u64) as usize,
            None if cursor.available() >= self.packet_size => self.packet_size,
            None if cursor.is_eof() && cursor.available() > 0 => cursor.available(),
            None => return Err(Halt::NeedMoreData),
        };

        let data = cursor.read_bytes(want)?;
        if let Some(remaining) = self.data_remaining.as_mut() {
            *remaining -= want as u64;
        }
        Ok(Flow::Packet(Packet::new(0, data)))
    }
}

pub fn probe(data: &[u8]) -> u32 {
    if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE" {
        PROBE_SCORE_MAX
    } else {
        0
    }
}
