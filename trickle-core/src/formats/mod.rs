//! Container parsers and the contract they share.
//!
//! Every parser is a resumable state machine over a [`ByteCursor`]:
//!
//! - `read_header` restarts from the cursor position it was first called
//!   at until it succeeds, so it never leaves half-built streams behind.
//! - `read_packet` advances in small committed steps. A step that runs out
//!   of bytes is rolled back to where it started; everything already
//!   committed (scan windows, partially reassembled objects, pending skips)
//!   lives in the parser struct, not on the stack.

pub mod asf;
pub mod avi;
pub mod ogg;
pub(crate) mod riff;
pub mod wav;

use crate::config::DemuxConfig;
use crate::cursor::ByteCursor;
use crate::error::{settle, Halt, Parse, Step, StepResult};
use crate::metadata::Metadata;
use crate::packet::Packet;
use crate::registry::ContainerKind;
use crate::stream::Stream;

use self::asf::AsfDemuxer;
use self::avi::AviDemuxer;
use self::ogg::OggDemuxer;
use self::wav::WavDemuxer;

/// What a successful `read_header` hands to the session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderInfo {
    pub streams: Vec<Stream>,
    pub metadata: Metadata,
}

/// Result of one committed packet-reading step.
pub(crate) enum Flow {
    Packet(Packet),
    /// Progress was made; keep stepping
    Continue,
    /// Progress was committed but nothing more can happen without input
    Wait,
}

/// Run `step` until it yields a packet, rolling back a step that ran dry.
pub(crate) fn drive<F>(cursor: &mut ByteCursor, mut step: F) -> StepResult<Packet>
where
    F: FnMut(&mut ByteCursor) -> Parse<Flow>,
{
    loop {
        let mark = cursor.tell();
        match step(cursor) {
            Ok(Flow::Packet(packet)) => return Ok(Step::Ready(packet)),
            Ok(Flow::Continue) => continue,
            Ok(Flow::Wait) => return Ok(Step::NeedMoreData),
            Err(Halt::NeedMoreData) => {
                cursor.seek(mark)?;
                return Ok(Step::NeedMoreData);
            }
            Err(Halt::Fatal(err)) => return Err(err),
        }
    }
}

/// Run `parse` as one all-or-nothing unit.
pub(crate) fn transact<T, F>(cursor: &mut ByteCursor, parse: F) -> StepResult<T>
where
    F: FnOnce(&mut ByteCursor) -> Parse<T>,
{
    let mark = cursor.tell();
    let result = parse(cursor);
    if matches!(result, Err(Halt::NeedMoreData)) {
        cursor.seek(mark)?;
    }
    settle(result)
}

/// Per-format parser state, one variant per supported container.
#[derive(Debug)]
pub enum FormatParser {
    Avi(AviDemuxer),
    Asf(AsfDemuxer),
    Ogg(OggDemuxer),
    Wav(WavDemuxer),
}

impl FormatParser {
    pub fn for_kind(kind: ContainerKind, config: &DemuxConfig) -> Self {
        match kind {
            ContainerKind::Avi => Self::Avi(AviDemuxer::new()),
            ContainerKind::Asf => Self::Asf(AsfDemuxer::with_limit(config.max_buffer_size)),
            ContainerKind::Ogg => Self::Ogg(OggDemuxer::new(config.verify_ogg_crc)),
            ContainerKind::Wav => Self::Wav(WavDemuxer::new(config.wav_packet_size)),
        }
    }

    pub fn kind(&self) -> ContainerKind {
        match self {
            Self::Avi(_) => ContainerKind::Avi,
            Self::Asf(_) => ContainerKind::Asf,
            Self::Ogg(_) => ContainerKind::Ogg,
            Self::Wav(_) => ContainerKind::Wav,
        }
    }

    pub fn read_header(&mut self, cursor: &mut ByteCursor) -> StepResult<HeaderInfo> {
        match self {
            Self::Avi(parser) => parser.read_header(cursor),
            Self::Asf(parser) => parser.read_header(cursor),
            Self::Ogg(parser) => parser.read_header(cursor),
            Self::Wav(parser) => parser.read_header(cursor),
        }
    }

    pub fn read_packet(&mut self, cursor: &mut ByteCursor) -> StepResult<Packet> {
        match self {
            Self::Avi(parser) => parser.read_packet(cursor),
            Self::Asf(parser) => parser.read_packet(cursor),
            Self::Ogg(parser) => parser.read_packet(cursor),
            Self::Wav(parser) => parser.read_packet(cursor),
        }
    }

    /// Forget partially assembled packet state after the input jumped.
    pub fn reset(&mut self) {
        match self {
            Self::Avi(parser) => parser.reset(),
            Self::Asf(parser) => parser.reset(),
            Self::Ogg(parser) => parser.reset(),
            Self::Wav(parser) => parser.reset(),
        }
    }

    pub fn read_close(&mut self) {
        match self {
            Self::Avi(parser) => parser.read_close(),
            Self::Asf(parser) => parser.read_close(),
            Self::Ogg(parser) => parser.read_close(),
            Self::Wav(parser) => parser.read_close(),
        }
    }
}
