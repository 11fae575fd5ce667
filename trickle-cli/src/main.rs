//! # Trickle
//!
//! Feeds a media file through one demuxing session in fixed-size chunks
//! and prints the header and a per-stream packet summary as JSON.
//!
//! ```bash
//! trickle clip.wmv
//! trickle song.ogg --chunk 512 --config demux.json
//! RUST_LOG=trickle_core=trace trickle movie.avi
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use trickle_core::{DemuxConfig, Demuxer, FormatRegistry, Packet, Stream};

const DEFAULT_CHUNK: usize = 64 * 1024;

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, PartialEq)]
struct AppOptions {
    input: PathBuf,
    config: Option<PathBuf>,
    chunk_size: usize,
}

impl AppOptions {
    fn from_args(args: &[String]) -> Result<Self> {
        let mut input = None;
        let mut config = None;
        let mut chunk_size = DEFAULT_CHUNK;

        let mut iter = args.iter().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" => {
                    let path = iter.next().context("--config needs a path")?;
                    config = Some(PathBuf::from(path));
                }
                "--chunk" => {
                    let value = iter.next().context("--chunk needs a size")?;
                    chunk_size = value
                        .parse()
                        .with_context(|| format!("invalid chunk size {value:?}"))?;
                    if chunk_size == 0 {
                        bail!("chunk size must be positive");
                    }
                }
                other if other.starts_with("--") => bail!("unknown option {other}"),
                other => input = Some(PathBuf::from(other)),
            }
        }

        let input = input.context("usage: trickle <file> [--chunk N] [--config file.json]")?;
        Ok(Self { input, config, chunk_size })
    }

    fn load_config(&self) -> Result<DemuxConfig> {
        match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                DemuxConfig::from_json(&text).with_context(|| format!("parsing {}", path.display()))
            }
            None => Ok(DemuxConfig::default()),
        }
    }
}

// ============================================================================
// Report
// ============================================================================

#[derive(Debug, Default, Serialize)]
struct StreamSummary {
    packets: u64,
    bytes: u64,
    keyframes: u64,
    first_pts_us: Option<i64>,
    last_pts_us: Option<i64>,
}

impl StreamSummary {
    fn record(&mut self, packet: &Packet) {
        self.packets += 1;
        self.bytes += packet.size() as u64;
        if packet.keyframe {
            self.keyframes += 1;
        }
        if let Some(pts) = packet.pts_us {
            self.first_pts_us.get_or_insert(pts);
            self.last_pts_us = Some(pts);
        }
    }
}

#[derive(Debug, Serialize)]
struct StreamReport<'a> {
    index: usize,
    id: u32,
    media_type: trickle_core::MediaType,
    codec: trickle_core::CodecId,
    width: u32,
    height: u32,
    sample_rate: u32,
    channels: u16,
    extradata_len: usize,
    summary: &'a StreamSummary,
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    file: String,
    format: &'static str,
    header: BTreeMap<String, String>,
    streams: Vec<StreamReport<'a>>,
}

// ============================================================================
// Driver
// ============================================================================

fn open_session(registry: &FormatRegistry, path: &Path, head: &[u8], config: DemuxConfig) -> Result<Demuxer> {
    let hint = path.to_string_lossy();
    match Demuxer::open(registry, &hint, config.clone()) {
        Ok(demuxer) => Ok(demuxer),
        Err(_) => {
            tracing::debug!("no extension match for {}, probing", path.display());
            Demuxer::open_probe(registry, head, config)
                .with_context(|| format!("cannot identify {}", path.display()))
        }
    }
}

fn run(options: &AppOptions) -> Result<()> {
    let config = options.load_config()?;
    let registry = FormatRegistry::with_defaults();

    let mut file = File::open(&options.input)
        .with_context(|| format!("opening {}", options.input.display()))?;
    let mut chunk = vec![0u8; options.chunk_size];
    let mut filled = read_chunk(&mut file, &mut chunk)?;

    let mut demuxer = open_session(&registry, &options.input, &chunk[..filled], config)?;
    let mut summaries: BTreeMap<usize, StreamSummary> = BTreeMap::new();

    while filled > 0 {
        let mut sink = |stream: &Stream, packet: Packet| {
            summaries.entry(stream.index).or_default().record(&packet);
        };
        demuxer
            .feed_into(&chunk[..filled], &mut sink)
            .with_context(|| format!("demuxing {}", options.input.display()))?;
        filled = read_chunk(&mut file, &mut chunk)?;
    }
    for packet in demuxer.finish().context("flushing at end of input")? {
        summaries.entry(packet.stream_index).or_default().record(&packet);
    }

    let header = demuxer.header_info().context("file ended before the header")?;
    let empty = StreamSummary::default();
    let streams = demuxer
        .streams()?
        .iter()
        .map(|stream| StreamReport {
            index: stream.index,
            id: stream.id,
            media_type: stream.media_type,
            codec: stream.codec,
            width: stream.width,
            height: stream.height,
            sample_rate: stream.sample_rate,
            channels: stream.channels,
            extradata_len: stream.extradata.len(),
            summary: summaries.get(&stream.index).unwrap_or(&empty),
        })
        .collect();

    let report = Report {
        file: options.input.display().to_string(),
        format: demuxer.format_name(),
        header,
        streams,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    demuxer.close();
    Ok(())
}

/// Fill `buf` as far as the file allows; 0 means end of file.
fn read_chunk(file: &mut File, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("reading input"),
        }
    }
    Ok(filled)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("trickle=info,trickle_core=info")),
        )
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let options = AppOptions::from_args(&args)?;
    tracing::info!("Trickle v{} reading {}", trickle_core::VERSION, options.input.display());

    run(&options)
}
