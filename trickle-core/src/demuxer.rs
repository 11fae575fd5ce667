//! Push-driven demuxing session.
//!
//! A [`Demuxer`] owns one [`ByteCursor`] and one format parser. Input is
//! pushed in with [`Demuxer::feed`]; each call parses the header once
//! enough bytes have arrived, then drains every complete packet. Running
//! out of input is never an error, the next `feed` simply picks up where
//! the parser stopped.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::DemuxConfig;
use crate::cursor::ByteCursor;
use crate::error::{DemuxError, Result, Step};
use crate::formats::{FormatParser, HeaderInfo};
use crate::metadata::Metadata;
use crate::packet::Packet;
use crate::registry::{FormatDescriptor, FormatRegistry};
use crate::sink::PacketSink;
use crate::stream::Stream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    AwaitingHeader,
    Streaming,
    /// A fatal error or `close()`; every later call fails
    Terminated,
}

#[derive(Debug)]
pub struct Demuxer {
    descriptor: FormatDescriptor,
    parser: FormatParser,
    cursor: ByteCursor,
    config: DemuxConfig,
    state: SessionState,
    header: Option<HeaderInfo>,
    packets_out: u64,
}

impl Demuxer {
    /// Open a session for the format registered under `hint`, an extension
    /// or file name.
    pub fn open(registry: &FormatRegistry, hint: &str, config: DemuxConfig) -> Result<Self> {
        let descriptor = registry
            .find_by_extension(hint)
            .ok_or_else(|| DemuxError::UnknownFormat(hint.to_string()))?;
        tracing::info!(format = descriptor.name, hint, "opened demuxer by extension");
        Ok(Self::with_descriptor(descriptor.clone(), config))
    }

    /// Open a session for whichever format scores highest on `data`. The
    /// bytes are only inspected; feed them afterwards.
    pub fn open_probe(registry: &FormatRegistry, data: &[u8], config: DemuxConfig) -> Result<Self> {
        let (descriptor, score) = registry
            .probe(data)
            .ok_or_else(|| DemuxError::UnknownFormat(format!("{} probed bytes", data.len())))?;
        tracing::info!(format = descriptor.name, score, "opened demuxer by probe");
        Ok(Self::with_descriptor(descriptor.clone(), config))
    }

    pub fn with_descriptor(descriptor: FormatDescriptor, config: DemuxConfig) -> Self {
        Self {
            parser: FormatParser::for_kind(descriptor.kind, &config),
            cursor: ByteCursor::with_limit(config.max_buffer_size),
            descriptor,
            config,
            state: SessionState::AwaitingHeader,
            header: None,
            packets_out: 0,
        }
    }

    // ========================================================================
    // Input
    // ========================================================================

    /// Append `data` and return every packet that became complete.
    ///
    /// A fatal error ends the session and discards the packets this call
    /// had already produced. Use [`feed_into`](Self::feed_into) to keep
    /// them.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Packet>> {
        let mut packets = Vec::new();
        self.feed_into(data, &mut packets)?;
        Ok(packets)
    }

    /// Like [`feed`](Self::feed), handing packets to `sink` as they are
    /// produced. Returns how many were sent. Packets sent before a fatal
    /// error stay with the sink.
    pub fn feed_into<S>(&mut self, data: &[u8], sink: &mut S) -> Result<usize>
    where
        S: PacketSink + ?Sized,
    {
        self.ensure_live()?;
        if let Err(err) = self.cursor.append(data) {
            return Err(self.terminate(err));
        }
        let sent = self.pump(sink)?;
        if self.config.compact_after_feed {
            self.cursor.discard_consumed();
        }
        Ok(sent)
    }

    /// Mark the end of input and flush whatever only completes at EOF.
    pub fn finish(&mut self) -> Result<Vec<Packet>> {
        self.ensure_live()?;
        self.cursor.set_eof();
        let mut packets = Vec::new();
        self.pump(&mut packets)?;
        if self.state == SessionState::AwaitingHeader {
            tracing::warn!(
                format = self.descriptor.name,
                buffered = self.cursor.available(),
                "input ended before a complete header"
            );
        }
        Ok(packets)
    }

    /// Drop buffered input and any half-assembled packet, e.g. after the
    /// caller seeked. The parsed header and streams are kept.
    pub fn reset(&mut self) -> Result<()> {
        self.ensure_live()?;
        tracing::debug!(dropped = self.cursor.available(), "demuxer reset");
        self.cursor.clear();
        self.parser.reset();
        Ok(())
    }

    pub fn close(&mut self) {
        if self.state != SessionState::Terminated {
            tracing::debug!(
                format = self.descriptor.name,
                packets = self.packets_out,
                "demuxer closed"
            );
        }
        self.parser.read_close();
        self.cursor.clear();
        self.state = SessionState::Terminated;
    }

    fn pump<S>(&mut self, sink: &mut S) -> Result<usize>
    where
        S: PacketSink + ?Sized,
    {
        if self.state == SessionState::AwaitingHeader {
            match self.parser.read_header(&mut self.cursor) {
                Ok(Step::Ready(header)) => {
                    tracing::debug!(
                        format = self.descriptor.name,
                        streams = header.streams.len(),
                        "header parsed"
                    );
                    self.header = Some(header);
                    self.state = SessionState::Streaming;
                }
                Ok(Step::NeedMoreData) => return Ok(0),
                Err(err) => return Err(self.terminate(err)),
            }
        }

        let mut sent = 0;
        loop {
            let packet = match self.parser.read_packet(&mut self.cursor) {
                Ok(Step::Ready(packet)) => packet,
                Ok(Step::NeedMoreData) => break,
                Err(err) => return Err(self.terminate(err)),
            };

            let streams = self.header.as_ref().map_or(&[][..], |h| &h.streams[..]);
            match streams.get(packet.stream_index) {
                Some(stream) => {
                    sink.send(stream, packet);
                    sent += 1;
                    self.packets_out += 1;
                }
                None => {
                    tracing::warn!(stream = packet.stream_index, "packet for undeclared stream dropped");
                }
            }
        }

        Ok(sent)
    }

    fn ensure_live(&self) -> Result<()> {
        match self.state {
            SessionState::Terminated => Err(DemuxError::Terminated),
            _ => Ok(()),
        }
    }

    fn terminate(&mut self, err: DemuxError) -> DemuxError {
        tracing::warn!(format = self.descriptor.name, error = %err, "demuxer terminated");
        self.state = SessionState::Terminated;
        err
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn has_header(&self) -> bool {
        self.header.is_some()
    }

    /// Metadata as a flat key/value map.
    pub fn header_info(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.metadata()?.to_map())
    }

    pub fn metadata(&self) -> Result<&Metadata> {
        self.header
            .as_ref()
            .map(|h| &h.metadata)
            .ok_or(DemuxError::HeaderNotRead)
    }

    pub fn streams(&self) -> Result<&[Stream]> {
        self.header
            .as_ref()
            .map(|h| h.streams.as_slice())
            .ok_or(DemuxError::HeaderNotRead)
    }

    pub fn format_name(&self) -> &'static str {
        self.descriptor.name
    }

    pub fn descriptor(&self) -> &FormatDescriptor {
        &self.descriptor
    }

    pub fn is_terminated(&self) -> bool {
        self.state == SessionState::Terminated
    }

    /// Unread bytes currently held by the session.
    pub fn buffered(&self) -> usize {
        self.cursor.available()
    }

    pub fn packets_emitted(&self) -> u64 {
        self.packets_out
    }
}

// ============================================================================
// Shared session
// ============================================================================

/// A session that several threads may feed, one call at a time.
#[derive(Debug, Clone)]
pub struct SharedDemuxer {
    inner: Arc<Mutex<Demuxer>>,
}

impl SharedDemuxer {
    pub fn new(demuxer: Demuxer) -> Self {
        Self {
            inner: Arc::new(Mutex::new(demuxer)),
        }
    }

    pub fn feed(&self, data: &[u8]) -> Result<Vec<Packet>> {
        self.inner.lock().feed(data)
    }

    pub fn finish(&self) -> Result<Vec<Packet>> {
        self.inner.lock().finish()
    }

    pub fn reset(&self) -> Result<()> {
        self.inner.lock().reset()
    }

    pub fn close(&self) {
        self.inner.lock().close();
    }

    pub fn header_info(&self) -> Result<BTreeMap<String, String>> {
        self.inner.lock().header_info()
    }

    pub fn streams(&self) -> Result<Vec<Stream>> {
        self.inner.lock().streams().map(<[Stream]>::to_vec)
    }

    /// Run `f` with exclusive access to the session.
    pub fn with<R>(&self, f: impl FnOnce(&mut Demuxer) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{
        asf_file, asf_packet, avi_av, avi_dv, avi_opendml, avi_video_only, ogg_vorbis, wav_file,
        AsfPayload,
    };
    use crate::registry::ContainerKind;

    fn open(hint: &str) -> Demuxer {
        Demuxer::open(&FormatRegistry::with_defaults(), hint, DemuxConfig::default()).expect("open")
    }

    fn feed_all(hint: &str, chunks: &[&[u8]]) -> Vec<Packet> {
        let mut demuxer = open(hint);
        let mut packets = Vec::new();
        for chunk in chunks {
            packets.extend(demuxer.feed(chunk).expect("feed"));
        }
        packets.extend(demuxer.finish().expect("finish"));
        packets
    }

    /// Feeding `file` split at every offset matches a single feed.
    fn assert_chunking_invariant(hint: &str, file: &[u8]) {
        let whole = feed_all(hint, &[file]);
        assert!(!whole.is_empty(), "{hint} fixture produced no packets");

        for split in 1..file.len() {
            let (a, b) = file.split_at(split);
            assert_eq!(feed_all(hint, &[a, b]), whole, "{hint} split at {split}");
        }
        for size in [1, 3, 7, 64, 509] {
            let chunks: Vec<&[u8]> = file.chunks(size).collect();
            assert_eq!(feed_all(hint, &chunks), whole, "{hint} in {size}-byte chunks");
        }
    }

    #[test]
    fn test_open_by_extension_and_probe() {
        let registry = FormatRegistry::with_defaults();
        let demuxer = Demuxer::open(&registry, "clip.WMV", DemuxConfig::default()).expect("open");
        assert_eq!(demuxer.descriptor().kind, ContainerKind::Asf);

        let wav = wav_file(16, 16);
        let demuxer = Demuxer::open_probe(&registry, &wav, DemuxConfig::default()).expect("probe");
        assert_eq!(demuxer.format_name(), "wav");

        let err = Demuxer::open(&registry, "mkv", DemuxConfig::default()).unwrap_err();
        assert!(matches!(err, DemuxError::UnknownFormat(_)));
    }

    #[test]
    fn test_avi_split_mid_movi_header() {
        let file = avi_video_only(&[vec![0x42; 100]]);
        // Cut inside "LIST....movi"
        let movi = file.windows(4).position(|w| w == b"movi").expect("movi");
        let (first, second) = file.split_at(movi - 2);

        let mut demuxer = open("avi");
        assert!(demuxer.feed(first).expect("feed").is_empty());
        assert!(!demuxer.has_header());

        let packets = demuxer.feed(second).expect("feed");
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].size(), 100);
        assert_eq!(packets[0].stream_index, 0);
    }

    #[test]
    fn test_asf_reassembly_waits_for_second_fragment() {
        let object: Vec<u8> = (0..500u32).map(|i| i as u8).collect();
        let packet = asf_packet(&[
            AsfPayload::fragment(2, 1, 0, &object[..200], 500, 1_200),
            AsfPayload::fragment(2, 1, 200, &object[200..], 500, 1_200),
        ]);
        let file = asf_file(&[packet]);
        let second_body = file
            .windows(4)
            .position(|w| w == &object[200..204])
            .expect("second fragment");

        let mut demuxer = open("wma");
        assert!(demuxer.feed(&file[..second_body + 150]).expect("feed").is_empty());
        let packets = demuxer.feed(&file[second_body + 150..]).expect("feed");
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].size(), 500);
        assert_eq!(packets[0].data.as_ref(), object.as_slice());
        assert_eq!(packets[0].stream_index, 1);
    }

    #[test]
    fn test_ogg_metadata_then_packets_from_start() {
        let file = ogg_vorbis(&["ARTIST=Test", "ALBUM=Demo"], &[vec![1; 40]]);
        let mut demuxer = open("ogg");
        assert!(matches!(demuxer.header_info(), Err(DemuxError::HeaderNotRead)));

        let packets = demuxer.feed(&file).expect("feed");
        let info = demuxer.header_info().expect("header info");
        assert_eq!(info.get("author").map(String::as_str), Some("Test"));
        assert_eq!(info.get("album").map(String::as_str), Some("Demo"));

        // Header packets are emitted again for the decoder
        assert_eq!(packets.len(), 4);
        assert_eq!(&packets[0].data[1..7], b"vorbis");
    }

    #[test]
    fn test_wav_single_feed_slices() {
        let packets = feed_all("wav", &[&wav_file(10_000, 10_000)]);
        let sizes: Vec<_> = packets.iter().map(Packet::size).collect();
        assert_eq!(sizes, vec![4096, 4096, 1808]);
    }

    #[test]
    fn test_chunking_invariance_avi() {
        let file = avi_av(&[
            (*b"00dc", vec![1; 33]),
            (*b"01wb", vec![2; 64]),
            (*b"00dc", vec![3; 17]),
            (*b"01wb", vec![4; 64]),
        ]);
        assert_chunking_invariant("avi", &file);
        assert_chunking_invariant("avi", &avi_dv(&[vec![7; 12], vec![8; 5]]));
        assert_chunking_invariant("avi", &avi_opendml(&[vec![1; 5]], &[vec![2; 6], vec![3; 4]]));
    }

    fn asf_with_oversized_second_object() -> Vec<u8> {
        let first = asf_packet(&[AsfPayload::fragment(2, 1, 0, &[2; 64], 64, 1_000)]);
        let second = asf_packet(&[AsfPayload::fragment(2, 2, 0, &[3; 40], 0xFFFF_FF00, 1_050)]);
        asf_file(&[first, second])
    }

    fn limited_asf() -> Demuxer {
        let config = DemuxConfig {
            max_buffer_size: Some(64 * 1024),
            ..DemuxConfig::default()
        };
        Demuxer::open(&FormatRegistry::with_defaults(), "asf", config).expect("open")
    }

    #[test]
    fn test_fatal_error_keeps_packets_already_sent_to_sink() {
        let file = asf_with_oversized_second_object();

        let mut demuxer = limited_asf();
        let mut sink: Vec<Packet> = Vec::new();
        let err = demuxer.feed_into(&file, &mut sink).unwrap_err();
        assert!(matches!(err, DemuxError::OutOfMemory { .. }));
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].size(), 64);
        assert_eq!(demuxer.packets_emitted(), 1);
        assert!(demuxer.is_terminated());

        let mut demuxer = limited_asf();
        assert!(demuxer.feed(&file).is_err());
        assert_eq!(demuxer.packets_emitted(), 1);
        assert_eq!(demuxer.feed(&[]), Err(DemuxError::Terminated));
    }

    #[test]
    fn test_chunking_invariance_asf() {
        let first = asf_packet(&[
            AsfPayload::fragment(1, 1, 0, &[1; 300], 700, 1_000),
            AsfPayload::fragment(2, 1, 0, &[2; 64], 64, 1_000),
        ]);
        let second = asf_packet(&[
            AsfPayload::fragment(1, 1, 300, &[1; 400], 700, 1_000),
            AsfPayload::fragment(2, 2, 0, &[3; 64], 64, 1_046),
        ]);
        assert_chunking_invariant("asf", &asf_file(&[first, second]));
    }

    #[test]
    fn test_chunking_invariance_ogg() {
        let file = ogg_vorbis(&["TITLE=Chunks"], &[vec![5; 90], vec![6; 400], vec![7; 12]]);
        assert_chunking_invariant("ogg", &file);
    }

    #[test]
    fn test_chunking_invariance_wav() {
        let config = DemuxConfig {
            wav_packet_size: 300,
            ..DemuxConfig::default()
        };
        let file = wav_file(1000, 1000);
        let registry = FormatRegistry::with_defaults();
        let whole = {
            let mut demuxer = Demuxer::open(&registry, "wav", config.clone()).expect("open");
            demuxer.feed(&file).expect("feed")
        };
        assert_eq!(whole.len(), 4);

        for split in 1..file.len() {
            let mut demuxer = Demuxer::open(&registry, "wav", config.clone()).expect("open");
            let mut packets = demuxer.feed(&file[..split]).expect("feed");
            packets.extend(demuxer.feed(&file[split..]).expect("feed"));
            assert_eq!(packets, whole, "split at {split}");
        }
    }

    #[test]
    fn test_timestamps_do_not_decrease_per_stream() {
        let file = avi_av(&[
            (*b"00dc", vec![0; 10]),
            (*b"01wb", vec![0; 400]),
            (*b"00dc", vec![0; 10]),
            (*b"01wb", vec![0; 800]),
            (*b"00dc", vec![0; 10]),
        ]);
        let chunks: Vec<&[u8]> = file.chunks(37).collect();
        let packets = feed_all("avi", &chunks);

        let mut last: BTreeMap<usize, i64> = BTreeMap::new();
        for packet in &packets {
            let Some(dts) = packet.dts_us else { continue };
            if let Some(prev) = last.insert(packet.stream_index, dts) {
                assert!(dts >= prev, "stream {} went back in time", packet.stream_index);
            }
        }
        assert_eq!(last.len(), 2);
    }

    #[test]
    fn test_fatal_error_terminates_session() {
        let mut demuxer = open("wav");
        let err = demuxer.feed(b"RIFF\x04\0\0\0AVI junk").unwrap_err();
        assert!(matches!(err, DemuxError::BadFormat(_)));
        assert!(demuxer.is_terminated());
        assert_eq!(demuxer.feed(b"more").unwrap_err(), DemuxError::Terminated);
    }

    #[test]
    fn test_buffer_limit_is_out_of_memory() {
        let config = DemuxConfig {
            max_buffer_size: Some(64),
            ..DemuxConfig::default()
        };
        let mut demuxer = Demuxer::open(&FormatRegistry::with_defaults(), "avi", config).expect("open");
        let err = demuxer.feed(&[0u8; 65]).unwrap_err();
        assert!(matches!(err, DemuxError::OutOfMemory { .. }));
        assert!(demuxer.is_terminated());
    }

    #[test]
    fn test_reset_drops_buffered_bytes_but_keeps_streams() {
        let file = wav_file(10_000, 10_000);
        let header_len = file.len() - 10_000;
        let mut demuxer = open("wav");
        demuxer.feed(&file[..header_len + 100]).expect("feed");
        assert_eq!(demuxer.buffered(), 100);

        demuxer.reset().expect("reset");
        assert_eq!(demuxer.buffered(), 0);
        assert_eq!(demuxer.streams().expect("streams").len(), 1);
    }

    #[test]
    fn test_feed_into_closure_sink() {
        let file = avi_av(&[(*b"00dc", vec![1; 8]), (*b"01wb", vec![2; 8])]);
        let mut demuxer = open("avi");
        let mut kinds = Vec::new();
        let sent = demuxer
            .feed_into(&file, &mut |stream: &Stream, packet: Packet| {
                kinds.push((stream.is_audio(), packet.size()));
            })
            .expect("feed");
        assert_eq!(sent, 2);
        assert_eq!(kinds, vec![(false, 8), (true, 8)]);
    }

    #[test]
    fn test_shared_demuxer_serializes_feeds() {
        let file = wav_file(8192, 8192);
        let shared = SharedDemuxer::new(open("wav"));
        let (a, b) = file.split_at(file.len() / 2);

        let worker = {
            let shared = shared.clone();
            let a = a.to_vec();
            std::thread::spawn(move || shared.feed(&a).expect("feed").len())
        };
        let first = worker.join().expect("thread");
        let second = shared.feed(b).expect("feed").len();

        assert_eq!(first + second, 2);
        assert_eq!(shared.with(|d| d.packets_emitted()), 2);
        shared.close();
        assert_eq!(shared.feed(b"x").unwrap_err(), DemuxError::Terminated);
    }

    #[test]
    fn test_close_then_feed_is_terminated() {
        let mut demuxer = open("ogg");
        demuxer.close();
        assert!(matches!(demuxer.finish(), Err(DemuxError::Terminated)));
        assert!(matches!(demuxer.reset(), Err(DemuxError::Terminated)));
    }
}
