//! Output batcher: coalesces response bytes into length-prefixed chunks
//! before they hit the connection.
//!
//! Grounded on the teacher's `WriteBuffer` (buffer small writes, flush in
//! large aligned chunks to cut syscall count) but chunk-framed instead of
//! raw: the first 4 bytes of the accumulation buffer are a placeholder for
//! the big-endian payload length, patched in place once the chunk is
//! known to be complete.
//!
//! The batcher does not own the connection — the server loop does, and
//! passes it in on `send`/`flush` — because the same connection is also
//! read from by the frame reader.

use crate::codec::BLOCK_SIZE;
use crate::error::ServerError;
use crate::protocol::{ChunkHeader, CHUNK_HEADER_LEN};
use log::warn;
use std::io::Write;

/// A chunk is flushed once its accumulated payload exceeds this many
/// bytes (31 blocks' worth), or when the caller explicitly asks to flush.
pub const FLUSH_THRESHOLD: usize = 31 * BLOCK_SIZE;

#[derive(Default)]
pub struct OutputBatcher {
    /// `buf[0..CHUNK_HEADER_LEN]` is a placeholder, patched with the
    /// payload length at flush time; `buf[CHUNK_HEADER_LEN..]` is the
    /// accumulated payload.
    buf: Vec<u8>,
}

impl OutputBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_header_reserved(&mut self) {
        if self.buf.is_empty() {
            self.buf.extend_from_slice(&[0u8; CHUNK_HEADER_LEN]);
        }
    }

    fn payload_len(&self) -> usize {
        self.buf.len().saturating_sub(CHUNK_HEADER_LEN)
    }

    /// Append `bytes` to the pending chunk, flushing immediately if
    /// `flush` is set or the size threshold has been crossed.
    pub fn send<W: Write>(
        &mut self,
        conn: &mut W,
        bytes: &[u8],
        flush: bool,
    ) -> Result<(), ServerError> {
        self.ensure_header_reserved();
        self.buf.extend_from_slice(bytes);
        if flush || self.payload_len() > FLUSH_THRESHOLD {
            self.flush(conn)?;
        }
        Ok(())
    }

    /// Write the chunk header (patched with the true payload length) and
    /// the accumulated payload, then clear internal state. A no-op if
    /// nothing is pending.
    ///
    /// A write failure here is logged, not propagated: the protocol
    /// design treats outbound write errors as non-fatal — the next
    /// inbound read is expected to surface the broken connection.
    pub fn flush<W: Write>(&mut self, conn: &mut W) -> Result<(), ServerError> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let payload_len = self.payload_len() as u32;
        let header = ChunkHeader { payload_len };
        let mut framed = Vec::with_capacity(self.buf.len());
        header.write(&mut framed)?;
        framed.extend_from_slice(&self.buf[CHUNK_HEADER_LEN..]);

        let result = conn.write_all(&framed).and_then(|_| conn.flush());
        self.buf.clear();
        if let Err(e) = result {
            warn!("output batcher: write to connection failed: {e}");
        }
        Ok(())
    }
}
