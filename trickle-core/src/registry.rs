//! # Format Registry
//!
//! Flat table of container descriptors. A session picks its parser either
//! by file extension or by probing the first bytes of input; probe ties go
//! to whichever descriptor was registered first.

use serde::Serialize;

use crate::formats::{asf, avi, ogg, wav};

/// Probe score of an unambiguous signature match.
pub const PROBE_SCORE_MAX: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Avi,
    Asf,
    Ogg,
    Wav,
}

/// Scores a prefix of the input in `0..=PROBE_SCORE_MAX`.
pub type ProbeFn = fn(&[u8]) -> u32;

#[derive(Debug, Clone, Serialize)]
pub struct FormatDescriptor {
    pub kind: ContainerKind,
    pub name: &'static str,
    pub long_name: &'static str,
    /// Comma-separated, lowercase
    pub video_extensions: &'static str,
    pub audio_extensions: &'static str,
    #[serde(skip)]
    pub probe: ProbeFn,
}

impl FormatDescriptor {
    pub fn extensions(&self) -> impl Iterator<Item = &'static str> {
        self.video_extensions
            .split(',')
            .chain(self.audio_extensions.split(','))
            .filter(|ext| !ext.is_empty())
    }

    pub fn matches_extension(&self, ext: &str) -> bool {
        self.extensions().any(|known| known.eq_ignore_ascii_case(ext))
    }
}

pub const AVI: FormatDescriptor = FormatDescriptor {
    kind: ContainerKind::Avi,
    name: "avi",
    long_name: "Audio Video Interleave",
    video_extensions: "avi",
    audio_extensions: "",
    probe: avi::probe,
};

pub const ASF: FormatDescriptor = FormatDescriptor {
    kind: ContainerKind::Asf,
    name: "asf",
    long_name: "Advanced Systems Format",
    video_extensions: "asf,wmv",
    audio_extensions: "wma",
    probe: asf::probe,
};

pub const OGG: FormatDescriptor = FormatDescriptor {
    kind: ContainerKind::Ogg,
    name: "ogg",
    long_name: "Ogg Vorbis",
    video_extensions: "",
    audio_extensions: "ogg,oga",
    probe: ogg::probe,
};

pub const WAV: FormatDescriptor = FormatDescriptor {
    kind: ContainerKind::Wav,
    name: "wav",
    long_name: "RIFF WAVE",
    video_extensions: "",
    audio_extensions: "wav",
    probe: wav::probe,
};

/// Strip a path or leading dot down to the bare extension.
fn bare_extension(hint: &str) -> &str {
    match hint.rfind('.') {
        Some(dot) => &hint[dot + 1..],
        None => hint,
    }
}

#[derive(Debug, Clone, Default)]
pub struct FormatRegistry {
    formats: Vec<FormatDescriptor>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// AVI, ASF, Ogg and WAV, in that order.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for descriptor in [AVI, ASF, OGG, WAV] {
            registry.register(descriptor);
        }
        registry
    }

    /// Add a descriptor; a second registration of the same kind replaces
    /// the first in place.
    pub fn register(&mut self, descriptor: FormatDescriptor) {
        match self.formats.iter_mut().find(|known| known.kind == descriptor.kind) {
            Some(slot) => *slot = descriptor,
            None => self.formats.push(descriptor),
        }
    }

    /// Accepts "wmv", ".wmv" or "clip.WMV".
    pub fn find_by_extension(&self, hint: &str) -> Option<&FormatDescriptor> {
        let ext = bare_extension(hint);
        if ext.is_empty() {
            return None;
        }
        self.formats.iter().find(|desc| desc.matches_extension(ext))
    }

    pub fn find_by_kind(&self, kind: ContainerKind) -> Option<&FormatDescriptor> {
        self.formats.iter().find(|desc| desc.kind == kind)
    }

    /// Best-scoring descriptor for `data`, with its score.
    pub fn probe(&self, data: &[u8]) -> Option<(&FormatDescriptor, u32)> {
        let mut best: Option<(&FormatDescriptor, u32)> = None;
        for desc in &self.formats {
            let score = (desc.probe)(data);
            if score > best.map_or(0, |(_, s)| s) {
                best = Some((desc, score));
            }
        }
        best
    }

    pub fn iter(&self) -> impl Iterator<Item = &FormatDescriptor> {
        self.formats.iter()
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    pub fn video_extensions(&self) -> Vec<&'static str> {
        self.formats
            .iter()
            .flat_map(|desc| desc.video_extensions.split(','))
            .filter(|ext| !ext.is_empty())
            .collect()
    }

    pub fn audio_extensions(&self) -> Vec<&'static str> {
        self.formats
            .iter()
            .flat_map(|desc| desc.audio_extensions.split(','))
            .filter(|ext| !ext.is_empty())
            .collect()
    }
}
