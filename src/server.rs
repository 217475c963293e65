//! The server loop: arbitrates between answering inbound requests and
//! draining the prefetch queue, detects completion, and owns the single
//! connection shared by the frame reader and the output batcher.
//!
//! Grounded on the teacher's top-level `run()` driver (open input, loop
//! dispatching on a small command enum, log a summary on exit) but
//! reshaped around the two-sided read/write arbitration this protocol
//! needs instead of the teacher's one-shot batch pass.

use crate::batcher::OutputBatcher;
use crate::conn::Connection;
use crate::error::ServerError;
use crate::file::{BlockSource, File};
use crate::prefetch::PrefetchQueue;
use crate::protocol::{RequestCommand, HANDSHAKE_TOKEN};
use crate::reader::{FrameReader, ReadOutcome};
use crate::sender::{self, SendOutcome};
use log::{error, info, warn};
use std::collections::HashSet;
use std::io::Write;
use std::time::Instant;

#[derive(Default)]
struct Stats {
    miss_count: u64,
    unique_miss_count: u64,
    compressed_count: u64,
    uncompressed_count: u64,
    bytes_sent: u64,
}

impl Stats {
    fn record_sent(&mut self, compressed: bool, len: usize) {
        if compressed {
            self.compressed_count += 1;
        } else {
            self.uncompressed_count += 1;
        }
        self.bytes_sent += len as u64;
    }
}

/// The server's session state: file table, prefetch queue, and the
/// bookkeeping needed for the completion/statistics logic of the steady
/// state loop. Does not own the connection or the log sink directly on
/// every call — those are threaded through explicitly wherever both a
/// reader and a writer might need them in the same iteration.
pub struct Server<S: BlockSource> {
    files: Vec<File<S>>,
    prefetch: PrefetchQueue,
    requested_prefetch: HashSet<i16>,
    serving_complete: bool,
    done_sent: bool,
    start_time: Option<Instant>,
    stats: Stats,
}

impl<S: BlockSource> Server<S> {
    pub fn new(files: Vec<File<S>>) -> Self {
        Self {
            files,
            prefetch: PrefetchQueue::new(),
            requested_prefetch: HashSet::new(),
            serving_complete: false,
            done_sent: false,
            start_time: None,
            stats: Stats::default(),
        }
    }

    fn all_fully_sent(&self) -> bool {
        self.files.iter().all(File::is_fully_sent)
    }

    /// Drive the session to completion over `conn`, multiplexing
    /// non-protocol bytes to `log_sink`. Takes ownership of both per the
    /// launcher contract and returns whether the session ended cleanly.
    pub fn serve<C: Connection, L: Write>(mut self, mut conn: C, log_sink: L) -> bool {
        if let Err(e) = conn.write_all(HANDSHAKE_TOKEN) {
            error!("server: handshake write failed: {e}");
            return false;
        }

        let mut reader = FrameReader::new(log_sink);
        let mut batcher = OutputBatcher::new();

        loop {
            if !self.done_sent && self.prefetch.is_empty() && self.all_fully_sent() {
                sender::send_done(&mut batcher, &mut conn);
                self.done_sent = true;
                info!("server: all blocks delivered, sentinel sent");
            }

            let blocking = self.prefetch.is_empty();
            if blocking {
                if let Err(e) = batcher.flush(&mut conn) {
                    error!("server: pre-block flush failed: {e}");
                    return false;
                }
            }

            match reader.read_request(&mut conn, blocking, self.serving_complete) {
                ReadOutcome::None => {}
                ReadOutcome::Terminal => {
                    let _ = batcher.flush(&mut conn);
                    return true;
                }
                ReadOutcome::Request(cmd) => {
                    if self.start_time.is_none() {
                        self.start_time = Some(Instant::now());
                    }
                    if !self.dispatch(cmd, &mut batcher, &mut conn) {
                        let _ = batcher.flush(&mut conn);
                        return true;
                    }
                }
            }

            self.run_prefetch_pass(&mut batcher, &mut conn);
        }
    }

    /// Returns `false` when the session should end (DESTROY observed).
    fn dispatch<C: Connection>(
        &mut self,
        cmd: RequestCommand,
        batcher: &mut OutputBatcher,
        conn: &mut C,
    ) -> bool {
        match cmd {
            RequestCommand::Destroy => return false,
            RequestCommand::ServingComplete => {
                self.serving_complete = true;
                self.log_statistics();
            }
            RequestCommand::BlockMissing { file_id, block_idx } => {
                // Validate file_id and block_idx before any state changes:
                // an invalid miss is logged and dropped with no effect on
                // miss_count or anything else (scenario S6).
                let Some(idx) = self.files.iter().position(|f| f.id == file_id) else {
                    warn!("server: {}", ServerError::InvalidFileId(file_id));
                    return true;
                };
                let block_count = self.files[idx].block_count();
                if block_idx < 0 || block_idx as u32 >= block_count {
                    warn!(
                        "server: {}",
                        ServerError::InvalidBlockIndex {
                            file_id,
                            block_idx,
                            block_count,
                        }
                    );
                    return true;
                }
                self.stats.miss_count += 1;
                let block_idx = block_idx as u32;
                let outcome = {
                    let file = &mut self.files[idx];
                    let stats = &mut self.stats;
                    sender::send_block(file, batcher, conn, block_idx, true, |c, n| {
                        stats.record_sent(c, n)
                    })
                };
                if outcome == SendOutcome::Sent {
                    self.stats.unique_miss_count += 1;
                    let block_count = self.files[idx].block_count();
                    self.prefetch.push_front(crate::prefetch::PrefetchState::readahead(
                        file_id, block_idx, block_count,
                    ));
                }
            }
            RequestCommand::Prefetch { file_id } => {
                let idx = if file_id < 0 {
                    None
                } else {
                    self.files.iter().position(|f| f.id == file_id)
                };
                let Some(idx) = idx else {
                    warn!("server: {}", ServerError::InvalidFileId(file_id));
                    return true;
                };
                if !self.requested_prefetch.insert(file_id) {
                    warn!("server: duplicate PREFETCH for file {file_id}, dropping");
                    return true;
                }
                let block_count = self.files[idx].block_count();
                self.prefetch
                    .push_back(crate::prefetch::PrefetchState::full_file(file_id, block_count));
            }
            RequestCommand::Unknown(kind) => {
                warn!("server: dropping request of unknown kind {kind}");
            }
        }
        true
    }

    fn run_prefetch_pass<C: Connection>(&mut self, batcher: &mut OutputBatcher, conn: &mut C) {
        let files = &mut self.files;
        let stats = &mut self.stats;
        self.prefetch.run_pass(|file_id, idx| {
            let Some(file) = files.iter_mut().find(|f| f.id == file_id) else {
                return SendOutcome::Error;
            };
            sender::send_block(file, batcher, conn, idx, false, |c, n| stats.record_sent(c, n))
        });
    }

    fn log_statistics(&self) {
        let elapsed = self
            .start_time
            .map(|t| t.elapsed())
            .unwrap_or_default();
        info!(
            "serving complete: elapsed={elapsed:?} misses={} unique_misses={} compressed={} uncompressed={} bytes_sent={}",
            self.stats.miss_count,
            self.stats.unique_miss_count,
            self.stats.compressed_count,
            self.stats.uncompressed_count,
            self.stats.bytes_sent,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::MemBlockSource;
    use crate::protocol::{RESPONSE_HEADER_LEN, SENTINEL_FILE_ID};
    use std::io::{Cursor, Read};

    use std::cell::RefCell;
    use std::rc::Rc;

    /// An in-memory duplex byte pipe: writes go to a shared `out` buffer
    /// (kept outside the struct so a test can still read it after `serve`
    /// consumes the pipe), reads drain `input`. `set_read_timeout` is a
    /// no-op since every read here is immediately satisfiable or reports
    /// EOF.
    struct DuplexPipe {
        input: Cursor<Vec<u8>>,
        out: Rc<RefCell<Vec<u8>>>,
    }

    impl DuplexPipe {
        fn new(input: Vec<u8>) -> (Self, Rc<RefCell<Vec<u8>>>) {
            let out = Rc::new(RefCell::new(Vec::new()));
            (
                Self {
                    input: Cursor::new(input),
                    out: out.clone(),
                },
                out,
            )
        }
    }

    impl Read for DuplexPipe {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for DuplexPipe {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.out.borrow_mut().write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Connection for DuplexPipe {
        fn set_read_timeout(&mut self, _dur: Option<std::time::Duration>) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn request(kind: i16, file_id: i16, payload: i32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&crate::protocol::MAGIC.to_be_bytes());
        buf.extend_from_slice(&kind.to_be_bytes());
        buf.extend_from_slice(&file_id.to_be_bytes());
        buf.extend_from_slice(&payload.to_be_bytes());
        buf
    }

    fn parse_chunks(out: &[u8]) -> Vec<Vec<u8>> {
        let mut records = Vec::new();
        let mut pos = 0;
        while pos + 4 <= out.len() {
            let len = u32::from_be_bytes(out[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4;
            let mut chunk_pos = 0;
            while chunk_pos < len {
                let header_start = pos + chunk_pos;
                let file_id = i16::from_be_bytes(out[header_start..header_start + 2].try_into().unwrap());
                let block_size = u16::from_be_bytes(
                    out[header_start + 8..header_start + 10].try_into().unwrap(),
                );
                let record_len = RESPONSE_HEADER_LEN + block_size as usize;
                records.push(out[header_start..header_start + record_len].to_vec());
                chunk_pos += record_len;
                let _ = file_id;
            }
            pos += len;
        }
        records
    }

    /// Scenario S1/S2: a single miss drives readahead, then completion.
    #[test]
    fn single_miss_then_readahead_then_sentinel() {
        let mut input = request(1, 0, 0); // BLOCK_MISSING file=0 idx=0
        input.extend_from_slice(&request(3, 0, 0)); // DESTROY
        let (pipe, out) = DuplexPipe::new(input);

        let file = File::new(0, "zeros", 8192, MemBlockSource(vec![0u8; 8192]));
        let server = Server::new(vec![file]);
        let ok = server.serve(pipe, Vec::new());
        assert!(ok);

        let out = out.borrow();
        let records = parse_chunks(&out[HANDSHAKE_TOKEN.len()..]);
        let sentinel_count = records
            .iter()
            .filter(|r| i16::from_be_bytes(r[0..2].try_into().unwrap()) == SENTINEL_FILE_ID)
            .count();
        assert_eq!(sentinel_count, 1);
        // Both blocks of the 2-block file were eventually delivered: the
        // miss itself, then the readahead pass picking up block 1.
        let data_blocks = records.len() - 1;
        assert_eq!(data_blocks, 2);
    }

    #[test]
    fn out_of_range_miss_is_dropped_without_response() {
        let mut input = request(1, 0, 5); // BLOCK_MISSING, out of range
        input.extend_from_slice(&request(3, 0, 0)); // DESTROY
        let (pipe, out) = DuplexPipe::new(input);

        let file = File::new(0, "small", 8192, MemBlockSource(vec![0u8; 8192]));
        let server = Server::new(vec![file]);
        let ok = server.serve(pipe, Vec::new());
        assert!(ok);
        let out = out.borrow();
        let records = parse_chunks(&out[HANDSHAKE_TOKEN.len()..]);
        assert!(records.is_empty());
    }

    #[test]
    fn duplicate_prefetch_is_served_once() {
        let mut input = request(2, 0, 0); // PREFETCH file=0
        input.extend_from_slice(&request(2, 0, 0)); // duplicate PREFETCH
        input.extend_from_slice(&request(3, 0, 0)); // DESTROY
        let (pipe, out) = DuplexPipe::new(input);

        let file = File::new(0, "small", 4096, MemBlockSource(vec![0u8; 4096]));
        let server = Server::new(vec![file]);
        let ok = server.serve(pipe, Vec::new());
        assert!(ok);
        let out = out.borrow();
        let records = parse_chunks(&out[HANDSHAKE_TOKEN.len()..]);
        // One block of data plus the sentinel.
        let non_sentinel = records
            .iter()
            .filter(|r| i16::from_be_bytes(r[0..2].try_into().unwrap()) != SENTINEL_FILE_ID)
            .count();
        assert_eq!(non_sentinel, 1);
    }

    #[test]
    fn interleaved_log_text_reaches_the_log_sink() {
        let mut input = b"hello\n".to_vec();
        input.extend_from_slice(&request(3, 0, 0)); // DESTROY
        let (pipe, _out) = DuplexPipe::new(input);

        let file: File<MemBlockSource> = File::new(0, "f", 0, MemBlockSource(vec![]));
        let server = Server::new(vec![file]);
        let mut log = Vec::new();
        let ok = server.serve(pipe, &mut log);
        assert!(ok);
        assert_eq!(log, b"hello\n");
    }

    #[test]
    fn empty_files_still_emit_sentinel_before_destroy() {
        let input = request(3, 0, 0); // DESTROY
        let (pipe, out) = DuplexPipe::new(input);

        let file: File<MemBlockSource> = File::new(0, "empty", 0, MemBlockSource(vec![]));
        let server = Server::new(vec![file]);
        let ok = server.serve(pipe, Vec::new());
        assert!(ok);
        let out = out.borrow();
        let records = parse_chunks(&out[HANDSHAKE_TOKEN.len()..]);
        assert_eq!(records.len(), 1);
        assert_eq!(
            i16::from_be_bytes(records[0][0..2].try_into().unwrap()),
            SENTINEL_FILE_ID
        );
    }
}
