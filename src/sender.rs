//! Block sender: reads one block, chooses a compressed or raw wire form,
//! and hands the encoded record to the output batcher.

use crate::batcher::OutputBatcher;
use crate::codec;
use crate::file::{BlockSource, File};
use crate::protocol::ResponseHeader;
use log::error;
use std::io::Write;

/// Outcome of [`send_block`]. Not a `Result` — all three outcomes are
/// expected, steady-state results the caller dispatches on; only I/O
/// failures writing to the connection are swallowed further down in
/// [`crate::batcher::OutputBatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Skipped,
    Error,
}

/// Encode and send one block of `file`, unless it is out of range
/// (`Error`) or already sent (`Skipped`).
///
/// `on_sent(compressed, payload_len)` runs exactly once, right before the
/// record is handed to the batcher, iff the outcome is going to be `Sent`.
/// It exists so a caller (the server loop) can accumulate per-session
/// statistics without `SendOutcome` itself having to carry anything beyond
/// the three outcomes the protocol design calls for.
pub fn send_block<S: BlockSource, W: Write>(
    file: &mut File<S>,
    batcher: &mut OutputBatcher,
    conn: &mut W,
    block_idx: u32,
    flush: bool,
    mut on_sent: impl FnMut(bool, usize),
) -> SendOutcome {
    if block_idx >= file.block_count() {
        error!(
            "send_block: block {block_idx} out of range for file {} ({} blocks)",
            file.path,
            file.block_count()
        );
        return SendOutcome::Error;
    }
    if file.is_sent(block_idx) {
        return SendOutcome::Skipped;
    }

    let raw = match file.read_block(block_idx) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("send_block: {e}");
            return SendOutcome::Error;
        }
    };

    let (compression, payload) = if file.is_already_compressed(block_idx) {
        (ResponseHeader::COMPRESSION_NONE, raw)
    } else {
        match codec::compress_block(&raw) {
            Ok(encoded) if encoded.compressed => (ResponseHeader::COMPRESSION_LZ4, encoded.payload),
            Ok(_) => (ResponseHeader::COMPRESSION_NONE, raw),
            Err(e) => {
                error!("send_block: compression failed: {e}");
                return SendOutcome::Error;
            }
        }
    };

    let header = ResponseHeader {
        file_id: file.id,
        compression,
        block_idx,
        block_size: payload.len() as u16,
    };

    file.mark_sent(block_idx);
    on_sent(compression == ResponseHeader::COMPRESSION_LZ4, payload.len());

    let mut record = Vec::with_capacity(crate::protocol::RESPONSE_HEADER_LEN + payload.len());
    if let Err(e) = header.write(&mut record) {
        error!("send_block: failed to encode response header: {e}");
        return SendOutcome::Error;
    }
    record.extend_from_slice(&payload);

    if let Err(e) = batcher.send(conn, &record, flush) {
        error!("send_block: batcher rejected record: {e}");
        return SendOutcome::Error;
    }

    SendOutcome::Sent
}

/// Emit the end-of-stream sentinel and force a flush.
pub fn send_done<W: Write>(batcher: &mut OutputBatcher, conn: &mut W) {
    let mut record = Vec::with_capacity(crate::protocol::RESPONSE_HEADER_LEN);
    // The sentinel is always well-formed; encoding it cannot fail.
    ResponseHeader::sentinel().write(&mut record).unwrap();
    if let Err(e) = batcher.send(conn, &record, true) {
        error!("send_done: batcher rejected sentinel: {e}");
    }
}
