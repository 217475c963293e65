//! Error taxonomy for the server core.
//!
//! Mirrors the disposition table of the protocol design: most variants are
//! logged and swallowed by the caller rather than propagated, but every
//! fallible component still returns a proper `Result` so the call site
//! decides how to react instead of the component deciding for it.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("LZ4 compression error: {0}")]
    Codec(String),

    #[error("block index {block_idx} out of range for file {file_id} ({block_count} blocks)")]
    InvalidBlockIndex {
        file_id: i16,
        block_idx: i32,
        block_count: u32,
    },

    #[error("unknown file id {0}")]
    InvalidFileId(i16),

    #[error("failed to read block {block_idx} of {path}: {source}")]
    FileRead {
        path: String,
        block_idx: u32,
        #[source]
        source: std::io::Error,
    },
}
