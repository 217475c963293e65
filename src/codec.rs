//! Big-endian integer (de)serialization and LZ4 block compression.
//!
//! Every numeric field on the wire is big-endian; this is non-negotiable
//! and there is no host-byte-order fallback anywhere in the crate. The
//! compression half wraps `lz4_flex`'s block API (not its frame API — the
//! wire format carries its own 10-byte [`crate::protocol::ResponseHeader`]
//! rather than an LZ4 frame header) with the bound-checked acceptance rule
//! from the protocol design.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::error::ServerError;

/// Block size in bytes. Every block request addresses exactly one window
/// of this size, except the final block of a file whose size is not a
/// multiple of it.
pub const BLOCK_SIZE: usize = 4096;

/// A compressed block must be strictly smaller than this many bytes to be
/// worth sending over the raw form (`⌊4096 × 0.95⌋`).
pub const COMPRESSION_ACCEPT_THRESHOLD: usize = (BLOCK_SIZE * 95) / 100;

/// Write a big-endian `i16`.
pub fn write_i16<W: Write>(w: &mut W, v: i16) -> io::Result<()> {
    w.write_i16::<BigEndian>(v)
}

/// Write a big-endian `u16`.
pub fn write_u16<W: Write>(w: &mut W, v: u16) -> io::Result<()> {
    w.write_u16::<BigEndian>(v)
}

/// Write a big-endian `i32`.
pub fn write_i32<W: Write>(w: &mut W, v: i32) -> io::Result<()> {
    w.write_i32::<BigEndian>(v)
}

/// Write a big-endian `u32`.
pub fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_u32::<BigEndian>(v)
}

/// Read a big-endian `i16`.
pub fn read_i16<R: Read>(r: &mut R) -> io::Result<i16> {
    r.read_i16::<BigEndian>()
}

/// Read a big-endian `i32`.
pub fn read_i32<R: Read>(r: &mut R) -> io::Result<i32> {
    r.read_i32::<BigEndian>()
}

/// Read a big-endian `u32`.
pub fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    r.read_u32::<BigEndian>()
}

/// Outcome of [`compress_block`]: whether the compressed form was worth
/// sending, and the bytes to actually transmit.
pub struct EncodedBlock {
    pub compressed: bool,
    pub payload: Vec<u8>,
}

/// Compress one block of raw data and decide whether to keep the
/// compressed form or fall back to the raw bytes.
///
/// Applies the acceptance rule of the protocol design: the compressed form
/// is used iff it is strictly smaller than [`COMPRESSION_ACCEPT_THRESHOLD`]
/// bytes. Callers that already know the data is incompressible (the
/// "already compressed" hook on [`crate::file::File`]) should skip this
/// call entirely and send the raw bytes with `compressed: false`.
pub fn compress_block(raw: &[u8]) -> Result<EncodedBlock, ServerError> {
    let bound = lz4_flex::block::get_maximum_output_size(raw.len()).max(BLOCK_SIZE);
    let mut scratch = vec![0u8; bound];
    let written = lz4_flex::block::compress_into(raw, &mut scratch)
        .map_err(|e| ServerError::Codec(e.to_string()))?;

    if written > 0 && written < COMPRESSION_ACCEPT_THRESHOLD {
        scratch.truncate(written);
        Ok(EncodedBlock {
            compressed: true,
            payload: scratch,
        })
    } else {
        Ok(EncodedBlock {
            compressed: false,
            payload: raw.to_vec(),
        })
    }
}

/// Decompress an LZ4 block payload, given the known decompressed length
/// (the client always knows this: it is 4096 except for a file's final
/// block, which the client derives from the file size it already holds).
pub fn decompress_block(payload: &[u8], decompressed_len: usize) -> Result<Vec<u8>, ServerError> {
    let mut out = vec![0u8; decompressed_len];
    let written = lz4_flex::block::decompress_into(payload, &mut out)
        .map_err(|e| ServerError::Codec(e.to_string()))?;
    out.truncate(written);
    Ok(out)
}
