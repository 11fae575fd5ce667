//! # ByteCursor - Growable In-Memory Stream
//!
//! Every parser reads from one of these. Input arrives through
//! [`ByteCursor::append`]; parsers pull little/big-endian integers, tags and
//! byte runs from the read position.
//!
//! ```text
//!   discarded        read_pos            write_pos      capacity
//!  ◄─────────►┌──────────┬──────────────────┬──────────────┐
//!   (gone)    │ consumed │     unread       │    spare     │
//!             └──────────┴──────────────────┴──────────────┘
//! ```
//!
//! Reads are all-or-nothing: when fewer bytes are buffered than a read needs
//! it returns [`NeedMoreData`] and the read position stays where it was.
//! When an append does not fit, the unread region slides to offset 0 before
//! the arena grows, so consumed input never piles up across feeds.

use bytes::{Buf, Bytes};

use crate::error::{DemuxError, NeedMoreData, Result};

pub type ReadResult<T> = std::result::Result<T, NeedMoreData>;

#[derive(Debug, Default)]
pub struct ByteCursor {
    /// Arena; `buf.len()` is the write position
    buf: Vec<u8>,
    read_pos: usize,
    /// Bytes slid out of the arena since the session started
    discarded: u64,
    eof: bool,
    /// Upper bound on unread bytes accepted by `append`
    limit: Option<usize>,
    reallocations: usize,
}

impl ByteCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Build a cursor over existing bytes, positioned at 0.
    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            buf: data.to_vec(),
            ..Self::default()
        }
    }

    // ========================================================================
    // Input
    // ========================================================================

    /// Copy `data` onto the tail, sliding unread bytes to the front and
    /// growing the arena when the spare room is too small.
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let unread = self.available();
        let needed = unread
            .checked_add(data.len())
            .ok_or(DemuxError::OutOfMemory { requested: usize::MAX })?;

        if let Some(limit) = self.limit {
            if needed > limit {
                return Err(DemuxError::OutOfMemory { requested: needed });
            }
        }

        if self.buf.capacity() - self.buf.len() < data.len() {
            self.slide();
            let before = self.buf.capacity();
            self.buf
                .try_reserve(data.len())
                .map_err(|_| DemuxError::OutOfMemory { requested: needed })?;
            if self.buf.capacity() != before {
                self.reallocations += 1;
                tracing::trace!(capacity = self.buf.capacity(), unread, "cursor grew");
            }
        }

        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Drop the consumed prefix and move unread bytes to offset 0.
    fn slide(&mut self) {
        if self.read_pos == 0 {
            return;
        }
        self.buf.drain(..self.read_pos);
        self.discarded += self.read_pos as u64;
        self.read_pos = 0;
    }

    /// Compaction hook for parsers that have fully consumed a packet.
    pub fn discard_consumed(&mut self) {
        self.slide();
    }

    /// Forget everything buffered, consumed or not.
    pub fn clear(&mut self) {
        self.discarded += self.buf.len() as u64;
        self.buf.clear();
        self.read_pos = 0;
        self.eof = false;
    }

    pub fn set_eof(&mut self) {
        self.eof = true;
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    // ========================================================================
    // Position
    // ========================================================================

    pub fn available(&self) -> usize {
        self.buf.len() - self.read_pos
    }

    /// Read position within the buffered window.
    pub fn tell(&self) -> usize {
        self.read_pos
    }

    pub fn write_pos(&self) -> usize {
        self.buf.len()
    }

    /// Absolute offset of the read position since the session started.
    pub fn stream_position(&self) -> u64 {
        self.discarded + self.read_pos as u64
    }

    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.buf.len() {
            return Err(DemuxError::InvalidSeek {
                pos,
                limit: self.buf.len(),
            });
        }
        self.read_pos = pos;
        Ok(())
    }

    pub fn reallocations(&self) -> usize {
        self.reallocations
    }

    // ========================================================================
    // Reads
    // ========================================================================

    fn take(&mut self, n: usize) -> ReadResult<&[u8]> {
        if self.available() < n {
            return Err(NeedMoreData);
        }
        let start = self.read_pos;
        self.read_pos += n;
        Ok(&self.buf[start..start + n])
    }

    pub fn peek(&self, n: usize) -> ReadResult<&[u8]> {
        if self.available() < n {
            return Err(NeedMoreData);
        }
        Ok(&self.buf[self.read_pos..self.read_pos + n])
    }

    pub fn peek_u32_le(&self) -> ReadResult<u32> {
        let mut raw = self.peek(4)?;
        Ok(raw.get_u32_le())
    }

    /// Everything between the read and write positions.
    pub fn unread(&self) -> &[u8] {
        &self.buf[self.read_pos..]
    }

    pub fn read_u8(&mut self) -> ReadResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> ReadResult<u16> {
        let mut raw = self.take(2)?;
        Ok(raw.get_u16_le())
    }

    pub fn read_u32_le(&mut self) -> ReadResult<u32> {
        let mut raw = self.take(4)?;
        Ok(raw.get_u32_le())
    }

    pub fn read_u64_le(&mut self) -> ReadResult<u64> {
        let mut raw = self.take(8)?;
        Ok(raw.get_u64_le())
    }

    pub fn read_u16_be(&mut self) -> ReadResult<u16> {
        let mut raw = self.take(2)?;
        Ok(raw.get_u16())
    }

    pub fn read_u32_be(&mut self) -> ReadResult<u32> {
        let mut raw = self.take(4)?;
        Ok(raw.get_u32())
    }

    pub fn read_u64_be(&mut self) -> ReadResult<u64> {
        let mut raw = self.take(8)?;
        Ok(raw.get_u64())
    }

    /// Read a FourCC.
    pub fn read_tag(&mut self) -> ReadResult<[u8; 4]> {
        let raw = self.take(4)?;
        Ok([raw[0], raw[1], raw[2], raw[3]])
    }

    pub fn read_bytes(&mut self, n: usize) -> ReadResult<Bytes> {
        Ok(Bytes::copy_from_slice(self.take(n)?))
    }

    /// Decode `len` bytes of UTF-16LE, dropping trailing NULs.
    pub fn read_utf16le(&mut self, len: usize) -> ReadResult<String> {
        let raw = self.take(len)?;
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let text = String::from_utf16_lossy(&units);
        Ok(text.trim_end_matches('\0').to_string())
    }

    pub fn skip(&mut self, n: usize) -> ReadResult<()> {
        self.take(n).map(|_| ())
    }

    /// Skip up to `n` bytes, returning how many were actually buffered.
    pub fn skip_partial(&mut self, n: u64) -> u64 {
        let step = n.min(self.available() as u64);
        self.read_pos += step as usize;
        step
    }

    // ========================================================================
    // Writes
    // ========================================================================
    //
    // Puts extend the write position directly and ignore the append limit.

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_u16_le(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_u32_le(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_u64_le(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_u16_be(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_u32_be(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_u64_be(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_tag(&mut self, tag: &[u8; 4]) {
        self.buf.extend_from_slice(tag);
    }

    pub fn put_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Encode `text` as NUL-terminated UTF-16LE; returns the byte length.
    pub fn put_utf16le(&mut self, text: &str) -> usize {
        let start = self.buf.len();
        for unit in text.encode_utf16().chain(std::iter::once(0)) {
            self.put_u16_le(unit);
        }
        self.buf.len() - start
    }

    /// Overwrite four bytes at buffer offset `pos` (size back-patching).
    pub fn patch_u32_le(&mut self, pos: usize, value: u32) -> Result<()> {
        let limit = self.buf.len();
        let slot = self
            .buf
            .get_mut(pos..pos + 4)
            .ok_or(DemuxError::InvalidSeek { pos, limit })?;
        slot.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }
}
