//! Error taxonomy for demuxing sessions.
//!
//! "Not enough bytes yet" is kept out of [`DemuxError`]: byte
//! reads fail with the zero-sized [`NeedMoreData`] and parsers report it as
//! [`Step::NeedMoreData`], so the engine can tell "come back later" apart
//! from "give up" by type alone.

use thiserror::Error;

/// Session-fatal demuxing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DemuxError {
    /// Signature or structure violates the container grammar
    #[error("The format of file is wrong: {0}")]
    BadFormat(String),

    /// Header present but internally inconsistent
    #[error("The header of the file is corrupted: {0}")]
    BadHeader(String),

    /// Expected header missing entirely
    #[error("There is no header in a file where it should be: {0}")]
    NoHeader(String),

    #[error("The stream is encrypted and cannot be processed by codec")]
    Encrypted,

    /// Buffer growth or packet allocation failed
    #[error("Out of memory: cannot grow buffer to {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("No registered format matches {0:?}")]
    UnknownFormat(String),

    #[error("Seek to {pos} outside buffered window 0..={limit}")]
    InvalidSeek { pos: usize, limit: usize },

    #[error("Header has not been read yet")]
    HeaderNotRead,

    #[error("Session terminated by an earlier error or close")]
    Terminated,
}

impl DemuxError {
    pub fn bad_format(msg: impl Into<String>) -> Self {
        Self::BadFormat(msg.into())
    }

    pub fn bad_header(msg: impl Into<String>) -> Self {
        Self::BadHeader(msg.into())
    }

    pub fn no_header(msg: impl Into<String>) -> Self {
        Self::NoHeader(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, DemuxError>;

/// Returned by cursor reads when fewer bytes are buffered than requested.
/// The cursor position is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Need more data")]
pub struct NeedMoreData;

/// Outcome of one resumable parser call.
#[derive(Debug, Clone, PartialEq)]
pub enum Step<T> {
    Ready(T),
    NeedMoreData,
}

impl<T> Step<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Step::Ready(_))
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Step::Ready(value) => Some(value),
            Step::NeedMoreData => None,
        }
    }
}

pub type StepResult<T> = Result<Step<T>>;

// ============================================================================
// Parser-internal short circuit
// ============================================================================

/// Lets parser internals use `?` on both cursor reads and fatal errors.
/// Converted to a [`StepResult`] at the parser boundary by [`settle`].
#[derive(Debug)]
pub(crate) enum Halt {
    NeedMoreData,
    Fatal(DemuxError),
}

impl From<NeedMoreData> for Halt {
    fn from(_: NeedMoreData) -> Self {
        Halt::NeedMoreData
    }
}

impl From<DemuxError> for Halt {
    fn from(err: DemuxError) -> Self {
        Halt::Fatal(err)
    }
}

pub(crate) type Parse<T> = std::result::Result<T, Halt>;

pub(crate) fn settle<T>(result: Parse<T>) -> StepResult<T> {
    match result {
        Ok(value) => Ok(Step::Ready(value)),
        Err(Halt::NeedMoreData) => Ok(Step::NeedMoreData),
        Err(Halt::Fatal(err)) => Err(err),
    }
}
