//! Prefetch queue: a FIFO of "file + half-open block range" states,
//! drained round-robin-free with a per-pass budget.
//!
//! A deque suffices — push-back for a client-requested full-file
//! PREFETCH, push-front for the miss read-ahead heuristic — no priority
//! structure is needed because the per-pass budget and miss-flush already
//! bound latency (see the prefetch queue design note).

use crate::sender::SendOutcome;
use std::collections::VecDeque;

/// Upper bound on blocks actually *sent* (not skipped) in a single pass,
/// so a prefetch burst can never starve incoming requests for more than
/// this many block-sends.
pub const PASS_BUDGET: u32 = 128;

/// Number of blocks read ahead after a miss, covering the OS's own
/// multi-page-fault window.
pub const MISS_READAHEAD: u32 = 7;

/// A pending prefetch obligation: send blocks `[cursor, end)` of
/// `file_id`, advancing `cursor` as blocks are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchState {
    pub file_id: i16,
    pub cursor: u32,
    pub end: u32,
}

impl PrefetchState {
    pub fn full_file(file_id: i16, block_count: u32) -> Self {
        Self {
            file_id,
            cursor: 0,
            end: block_count,
        }
    }

    pub fn readahead(file_id: i16, block_idx: u32, block_count: u32) -> Self {
        let start = block_idx + 1;
        let end = (block_idx + 1 + MISS_READAHEAD).min(block_count);
        Self {
            file_id,
            cursor: start.min(end),
            end,
        }
    }

    pub fn is_done(&self) -> bool {
        self.cursor >= self.end
    }
}

#[derive(Default)]
pub struct PrefetchQueue {
    states: VecDeque<PrefetchState>,
}

impl PrefetchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Enqueue a client-requested full-file prefetch at the back.
    pub fn push_back(&mut self, state: PrefetchState) {
        if !state.is_done() {
            self.states.push_back(state);
        }
    }

    /// Enqueue a miss read-ahead range at the front, ahead of whatever is
    /// already queued.
    pub fn push_front(&mut self, state: PrefetchState) {
        if !state.is_done() {
            self.states.push_front(state);
        }
    }

    /// Run one prefetch pass: pop the head, attempt to send blocks from
    /// its range up to `PASS_BUDGET` *sent* blocks, and requeue it at the
    /// head if it isn't done yet. `send_one(file_id, block_idx)` performs
    /// the actual send (and all of its own error logging).
    pub fn run_pass(&mut self, mut send_one: impl FnMut(i16, u32) -> SendOutcome) {
        let Some(mut state) = self.states.pop_front() else {
            return;
        };
        let mut sent_budget = 0u32;
        while state.cursor < state.end && sent_budget < PASS_BUDGET {
            let idx = state.cursor;
            state.cursor += 1;
            match send_one(state.file_id, idx) {
                SendOutcome::Sent => sent_budget += 1,
                SendOutcome::Skipped | SendOutcome::Error => {}
            }
        }
        if !state.is_done() {
            self.states.push_front(state);
        }
    }
}
