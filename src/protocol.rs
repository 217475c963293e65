//! Wire records: the inbound [`RequestCommand`], the outbound
//! [`ResponseHeader`] and [`ChunkHeader`], and the magic that demarcates a
//! request inside an otherwise free-form byte stream.
//!
//! # Endianness
//! Every field is big-endian. This is frozen for the protocol and never
//! negotiated — see [`crate::codec`].

use crate::codec::{self, BLOCK_SIZE};
use crate::error::ServerError;
use std::io::{self, Write};

/// 4-byte magic ("INCR") that precedes every inbound [`RequestCommand`].
pub const MAGIC: u32 = 0x494E_4352;

/// Byte length of the magic.
pub const MAGIC_LEN: usize = 4;

/// Byte length of a [`RequestCommand`] once decoded from the wire.
pub const REQUEST_LEN: usize = 8;

/// Byte length of magic + request, i.e. the minimum span the frame reader
/// needs buffered before it can extract a request.
pub const FRAMED_REQUEST_LEN: usize = MAGIC_LEN + REQUEST_LEN;

/// Byte length of a [`ResponseHeader`] on the wire.
pub const RESPONSE_HEADER_LEN: usize = 10;

/// Byte length of a [`ChunkHeader`] on the wire.
pub const CHUNK_HEADER_LEN: usize = 4;

/// `file_id` value marking the end-of-stream sentinel response.
pub const SENTINEL_FILE_ID: i16 = -1;

/// One-shot transport-level readiness token, written before the framing
/// loop begins. Not part of the framed protocol itself (see Design Notes
/// in the protocol specification).
pub const HANDSHAKE_TOKEN: &[u8; 4] = b"okay";

/// A decoded inbound request.
///
/// Modeled as a tagged union rather than a flat struct whose trailing 4
/// bytes are "sometimes a block index, sometimes ignored" — the wire
/// format is the union, but the in-memory representation stays a sum type
/// so a caller can't misread an ignored payload as meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestCommand {
    ServingComplete,
    BlockMissing { file_id: i16, block_idx: i32 },
    Prefetch { file_id: i16 },
    Destroy,
    /// A syntactically well-formed record whose `kind` is none of the
    /// four known values. The frame reader still extracts and returns
    /// it; it is the server loop's job to log and drop it (the
    /// "Any other kind" branch of the dispatch table).
    Unknown(i16),
}

const KIND_SERVING_COMPLETE: i16 = 0;
const KIND_BLOCK_MISSING: i16 = 1;
const KIND_PREFETCH: i16 = 2;
const KIND_DESTROY: i16 = 3;

impl RequestCommand {
    /// Decode the 8 bytes that follow the magic. `raw` must be exactly
    /// [`REQUEST_LEN`] bytes.
    pub fn decode(raw: &[u8; REQUEST_LEN]) -> Self {
        let mut cur = io::Cursor::new(&raw[..]);
        // Fields are fixed-width and the slice is exactly REQUEST_LEN
        // bytes, so these reads cannot fail.
        let kind = codec::read_i16(&mut cur).unwrap();
        let file_id = codec::read_i16(&mut cur).unwrap();
        let payload = codec::read_i32(&mut cur).unwrap();
        match kind {
            KIND_SERVING_COMPLETE => RequestCommand::ServingComplete,
            KIND_BLOCK_MISSING => RequestCommand::BlockMissing {
                file_id,
                block_idx: payload,
            },
            KIND_PREFETCH => RequestCommand::Prefetch { file_id },
            KIND_DESTROY => RequestCommand::Destroy,
            other => RequestCommand::Unknown(other),
        }
    }
}

/// 10-byte response record header, always followed by `block_size` bytes
/// of payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub file_id: i16,
    pub compression: u16,
    pub block_idx: u32,
    pub block_size: u16,
}

impl ResponseHeader {
    pub const COMPRESSION_NONE: u16 = 0;
    pub const COMPRESSION_LZ4: u16 = 1;

    /// The `file_id=-1, block_size=0` sentinel marking "all expected
    /// blocks delivered".
    pub fn sentinel() -> Self {
        Self {
            file_id: SENTINEL_FILE_ID,
            compression: Self::COMPRESSION_NONE,
            block_idx: 0,
            block_size: 0,
        }
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<(), ServerError> {
        codec::write_i16(w, self.file_id)?;
        codec::write_u16(w, self.compression)?;
        codec::write_u32(w, self.block_idx)?;
        codec::write_u16(w, self.block_size)?;
        Ok(())
    }
}

/// 4-byte big-endian payload-length prefix that frames a batch of
/// concatenated [`ResponseHeader`]+payload records on the outbound side.
pub struct ChunkHeader {
    pub payload_len: u32,
}

impl ChunkHeader {
    pub fn write<W: Write>(&self, w: &mut W) -> Result<(), ServerError> {
        codec::write_u32(w, self.payload_len)?;
        Ok(())
    }
}

/// Assert the protocol's block-size assumption holds where it matters:
/// a `u16` can always carry a `block_size` since it never exceeds
/// [`BLOCK_SIZE`].
const _: () = assert!(BLOCK_SIZE <= u16::MAX as usize);
