//! # incr-serve — host-side server for an incremental file-delivery protocol
//!
//! Protocol guarantees (frozen):
//! - All numeric fields are big-endian; never negotiated
//! - Every inbound request is demarcated by a 4-byte magic embedded in an
//!   otherwise free-form byte stream; non-protocol bytes are forwarded
//!   verbatim to a log sink
//! - Blocks are 4096 bytes except a file's final, possibly-short block
//! - A block is sent compressed only if doing so strictly beats a 95%
//!   margin; otherwise it is sent raw — compression never inflates
//! - Outbound records are batched into length-prefixed chunks before
//!   hitting the connection
//! - The core is single-threaded and owns exactly one connection per
//!   session; there is no multi-client multiplexing

pub mod batcher;
pub mod codec;
pub mod conn;
pub mod error;
pub mod file;
pub mod prefetch;
pub mod protocol;
pub mod reader;
pub mod sender;
pub mod server;

pub use conn::Connection;
pub use error::ServerError;
pub use file::{BlockSource, File};
pub use protocol::{RequestCommand, ResponseHeader};
pub use sender::SendOutcome;
pub use server::Server;
