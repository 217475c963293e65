//! A served file: a positional-read handle, its size, and the per-block
//! "sent" bitmap that drives completion detection and miss/prefetch
//! dedup.
//!
//! The bitset and its cardinality counter are kept coherent through a
//! single mutator ([`File::mark_sent`]) rather than being updated
//! independently at each call site — see the bitset/counter duplication
//! note in the protocol design.

use crate::codec::BLOCK_SIZE;
use crate::error::ServerError;
use std::io;

/// Anything the server can read fixed-size windows out of at an
/// arbitrary byte offset, the way `pread(2)` does. Implemented for
/// `std::fs::File` on unix; test doubles implement it directly over an
/// in-memory buffer.
pub trait BlockSource {
    /// Read up to `buf.len()` bytes starting at `offset`, returning the
    /// number of bytes actually read. A short read is only legal at
    /// end-of-file.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
}

#[cfg(unix)]
impl BlockSource for std::fs::File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        use std::os::unix::fs::FileExt;
        // `read_at` on a plain `File` can return a short read near EOF
        // without it being an error; read in a loop only up to what is
        // actually available.
        let mut total = 0;
        loop {
            match FileExt::read_at(self, &mut buf[total..], offset + total as u64) {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    if total == buf.len() {
                        break;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }
}

/// In-memory [`BlockSource`], used by tests and by the demo launcher's
/// `--stdio` smoke path.
pub struct MemBlockSource(pub Vec<u8>);

impl BlockSource for MemBlockSource {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let offset = offset as usize;
        if offset >= self.0.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.0.len() - offset);
        buf[..n].copy_from_slice(&self.0[offset..offset + n]);
        Ok(n)
    }
}

/// A minimal growable bitset, just large enough for "is block *i* sent".
/// Cardinality is tracked by the owning [`File`], not recomputed from the
/// bits, but every mutation goes through [`File::mark_sent`] so the two
/// never drift.
struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    fn with_len(bits: u32) -> Self {
        let words = (bits as usize).div_ceil(64);
        Self {
            words: vec![0u64; words],
        }
    }

    fn get(&self, idx: u32) -> bool {
        let idx = idx as usize;
        (self.words[idx / 64] >> (idx % 64)) & 1 != 0
    }

    /// Returns `true` if the bit was newly set (was previously clear).
    fn set(&mut self, idx: u32) -> bool {
        let idx = idx as usize;
        let word = &mut self.words[idx / 64];
        let mask = 1u64 << (idx % 64);
        let was_set = *word & mask != 0;
        *word |= mask;
        !was_set
    }

    fn popcount(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }
}

/// A single file being served: its identity, its positional-read handle,
/// and session-local delivery state.
pub struct File<S: BlockSource> {
    pub id: i16,
    pub path: String,
    pub size: u64,
    handle: S,
    block_count: u32,
    sent: BitSet,
    sent_count: u32,
    /// Optional predicate: returns `true` when a block is already in a
    /// format the client recognizes without further repacking (e.g. a
    /// pre-compressed container entry), in which case LZ4 is skipped
    /// entirely. Defaults to "never".
    already_compressed: Box<dyn Fn(u32) -> bool>,
}

impl<S: BlockSource> File<S> {
    pub fn new(id: i16, path: impl Into<String>, size: u64, handle: S) -> Self {
        let block_count = ceil_div(size, BLOCK_SIZE as u64) as u32;
        Self {
            id,
            path: path.into(),
            size,
            handle,
            block_count,
            sent: BitSet::with_len(block_count),
            sent_count: 0,
            already_compressed: Box::new(|_| false),
        }
    }

    /// Install a custom "already compressed" hook. See the type-level
    /// documentation.
    pub fn with_already_compressed_hook(mut self, hook: impl Fn(u32) -> bool + 'static) -> Self {
        self.already_compressed = Box::new(hook);
        self
    }

    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    pub fn sent_count(&self) -> u32 {
        self.sent_count
    }

    pub fn is_sent(&self, block_idx: u32) -> bool {
        self.sent.get(block_idx)
    }

    pub fn is_fully_sent(&self) -> bool {
        self.sent_count == self.block_count
    }

    pub fn is_already_compressed(&self, block_idx: u32) -> bool {
        (self.already_compressed)(block_idx)
    }

    /// Mark `block_idx` sent, incrementing the cardinality counter iff the
    /// bit was not already set. The only way `sent`/`sent_count` are ever
    /// mutated — see the module documentation.
    pub fn mark_sent(&mut self, block_idx: u32) {
        if self.sent.set(block_idx) {
            self.sent_count += 1;
        }
    }

    /// Read up to one block's worth of bytes at `block_idx`. A short read
    /// is only legal for the final block of the file.
    pub fn read_block(&self, block_idx: u32) -> Result<Vec<u8>, ServerError> {
        let offset = block_idx as u64 * BLOCK_SIZE as u64;
        let expected = if block_idx + 1 == self.block_count {
            (self.size - offset) as usize
        } else {
            BLOCK_SIZE
        };
        let mut buf = vec![0u8; expected];
        let n = self
            .handle
            .read_at(&mut buf, offset)
            .map_err(|source| ServerError::FileRead {
                path: self.path.clone(),
                block_idx,
                source,
            })?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Invariant #1 of the protocol design: `sent_count == popcount(sent)`.
    /// Exposed for property tests; never used on the hot path.
    #[cfg(test)]
    pub(crate) fn check_invariant(&self) -> bool {
        self.sent.popcount() == self.sent_count
    }
}

fn ceil_div(n: u64, d: u64) -> u64 {
    n.div_ceil(d)
}
