//! Frame reader: pulls request records out of an inbound stream that
//! freely interleaves binary protocol frames with arbitrary log text, and
//! forwards the non-protocol bytes to a log sink.
//!
//! The magic scan only ever considers full 4-byte windows (`buf.windows(4)`
//! naturally stops at `len - 4`), so a magic whose last byte hasn't arrived
//! yet is never matched early and is never skipped either — every byte
//! before the first *fully present* magic is forwarded, and at most 3
//! trailing bytes are held back for the next read. This resolves the
//! off-by-one left open by the reference implementation's `bcur + 4 <
//! bsize` bound in favor of the more live of the two legal choices (see
//! the protocol design's open questions).
//!
//! Like the output batcher, the reader does not own the connection: the
//! server loop does, and passes it in on every call, because the same
//! connection is also written to by the output batcher.

use crate::conn::Connection;
use crate::protocol::{RequestCommand, FRAMED_REQUEST_LEN, MAGIC, MAGIC_LEN, REQUEST_LEN};
use log::{debug, warn};
use std::io::{self, Write};
use std::time::Duration;

/// Idle timeout for a blocking poll.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Stand-in for "no wait": `set_read_timeout` rejects an exact zero
/// duration, so a non-blocking poll asks for the smallest nonzero one
/// instead.
const IMMEDIATE_TIMEOUT: Duration = Duration::from_nanos(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Request(RequestCommand),
    /// Nothing to report this call; the caller should do other work
    /// (e.g. run a prefetch pass) and call again.
    None,
    /// The session is over: a `DESTROY` was received or synthesized, or
    /// the connection failed/closed.
    Terminal,
}

pub struct FrameReader<L: Write> {
    log_sink: L,
    buf: Vec<u8>,
}

impl<L: Write> FrameReader<L> {
    pub fn new(log_sink: L) -> Self {
        Self {
            log_sink,
            buf: Vec::new(),
        }
    }

    fn forward_to_log(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        if let Err(e) = self.log_sink.write_all(&self.buf[..len]) {
            warn!("frame reader: log sink write failed: {e}");
        }
        self.buf.drain(..len);
    }

    fn find_magic(&self) -> Option<usize> {
        let magic_bytes = MAGIC.to_be_bytes();
        self.buf.windows(MAGIC_LEN).position(|w| w == magic_bytes)
    }

    /// Read one request, or report that there isn't one yet, or that the
    /// session has ended. `blocking` selects between a 300s wait and an
    /// immediate return; `serving_complete` tells the reader whether an
    /// idle timeout should be treated as terminal.
    pub fn read_request<C: Connection>(
        &mut self,
        conn: &mut C,
        blocking: bool,
        serving_complete: bool,
    ) -> ReadOutcome {
        loop {
            match self.find_magic() {
                Some(pos) => {
                    self.forward_to_log(pos);
                    if self.buf.len() >= FRAMED_REQUEST_LEN {
                        let raw: [u8; REQUEST_LEN] = self.buf[MAGIC_LEN..FRAMED_REQUEST_LEN]
                            .try_into()
                            .expect("slice length matches REQUEST_LEN");
                        self.buf.drain(..FRAMED_REQUEST_LEN);
                        return ReadOutcome::Request(RequestCommand::decode(&raw));
                    }
                    // Magic present but the request tail hasn't arrived
                    // yet; fall through and poll for more.
                }
                None => {
                    // No full magic window anywhere in the buffer. Every
                    // byte except a possible partial magic at the tail is
                    // safe to forward.
                    let keep_tail = (MAGIC_LEN - 1).min(self.buf.len());
                    let forward_len = self.buf.len() - keep_tail;
                    self.forward_to_log(forward_len);
                }
            }

            let timeout = if blocking {
                IDLE_TIMEOUT
            } else {
                IMMEDIATE_TIMEOUT
            };
            if let Err(e) = conn.set_read_timeout(Some(timeout)) {
                warn!("frame reader: failed to set read timeout: {e}");
            }

            let mut chunk = [0u8; 8192];
            match conn.read(&mut chunk) {
                Ok(0) => {
                    self.flush_residual_to_log();
                    return ReadOutcome::Terminal;
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    continue;
                }
                Err(e) if is_timeout(&e) => {
                    if blocking && serving_complete {
                        debug!("frame reader: idle timeout after serving complete, terminating");
                        return ReadOutcome::Terminal;
                    }
                    if blocking {
                        warn!("frame reader: idle timeout ({IDLE_TIMEOUT:?}) without data");
                    }
                    return ReadOutcome::None;
                }
                Err(e) => {
                    warn!("frame reader: connection read failed: {e}");
                    self.flush_residual_to_log();
                    return ReadOutcome::Terminal;
                }
            }
        }
    }

    fn flush_residual_to_log(&mut self) {
        let len = self.buf.len();
        self.forward_to_log(len);
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}
