//! # Trickle Core
//!
//! Incremental container demuxer for AVI, ASF, Ogg/Vorbis and WAV.
//!
//! Bytes arrive in arbitrary pieces through [`Demuxer::feed`]; whenever a
//! parser runs out of input mid-structure it rolls back and waits for the
//! next piece, so splitting a file at any byte boundary yields the same
//! packets as feeding it whole.

// ============================================================================
// Input
// ============================================================================
pub mod cursor;
pub mod config;
pub mod error;

// ============================================================================
// Media Model
// ============================================================================
pub mod codec;
pub mod stream;
pub mod packet;
pub mod metadata;

// ============================================================================
// Container Demuxers
// ============================================================================
pub mod formats;
pub mod registry;

// ============================================================================
// Session
// ============================================================================
pub mod demuxer;
pub mod sink;

#[cfg(test)]
mod fixtures;

pub use codec::CodecId;
pub use config::DemuxConfig;
pub use cursor::ByteCursor;
pub use demuxer::{Demuxer, SharedDemuxer};
pub use error::{DemuxError, NeedMoreData, Result, Step, StepResult};
pub use formats::HeaderInfo;
pub use metadata::Metadata;
pub use packet::Packet;
pub use registry::{ContainerKind, FormatDescriptor, FormatRegistry, PROBE_SCORE_MAX};
pub use sink::{MuxSink, PacketSink};
pub use stream::{MediaType, Rational, Stream};

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
