use incr_serve::codec::{compress_block, COMPRESSION_ACCEPT_THRESHOLD};
use incr_serve::file::MemBlockSource;
use incr_serve::File;
use proptest::prelude::*;

const BLOCK_SIZE: usize = 4096;

proptest! {
    /// Invariant #1: `sent_count` always equals the true popcount of the
    /// sent bitmap, no matter which (possibly repeated) indices are
    /// marked.
    #[test]
    fn sent_count_matches_popcount_after_any_mark_sequence(
        indices in prop::collection::vec(0u32..64, 0..200)
    ) {
        let mut file = File::new(0, "f", (64 * BLOCK_SIZE) as u64, MemBlockSource(vec![0u8; 64 * BLOCK_SIZE]));
        let mut expected = std::collections::HashSet::new();
        for idx in indices {
            file.mark_sent(idx);
            expected.insert(idx);
        }
        prop_assert_eq!(file.sent_count() as usize, expected.len());
    }

    /// Invariant #6: whatever `compress_block` decides, a compressed
    /// payload is strictly below the acceptance threshold and a raw
    /// payload exactly matches the input length.
    #[test]
    fn compression_choice_respects_acceptance_threshold(
        byte_value in any::<u8>(),
        run_len in 1usize..=BLOCK_SIZE,
    ) {
        // Mix a compressible run with pseudo-random tail bytes so both
        // branches of the acceptance rule get exercised across the space.
        let mut raw = vec![byte_value; run_len];
        let mut state: u32 = 0xACE1_u32.wrapping_add(byte_value as u32);
        while raw.len() < BLOCK_SIZE {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            raw.push((state & 0xff) as u8);
        }
        let encoded = compress_block(&raw).unwrap();
        if encoded.compressed {
            prop_assert!(encoded.payload.len() < COMPRESSION_ACCEPT_THRESHOLD);
        } else {
            prop_assert_eq!(encoded.payload.len(), raw.len());
            prop_assert!(encoded.payload.len() <= BLOCK_SIZE);
        }
    }

    /// Invariant #9: the final block of a file whose size isn't a
    /// multiple of the block size is short by exactly `size % 4096`
    /// (or a full block if size is itself a multiple).
    #[test]
    fn final_block_length_matches_size_modulo_block_size(
        whole_blocks in 0u64..8,
        remainder in 0u64..(BLOCK_SIZE as u64),
    ) {
        let size = whole_blocks * BLOCK_SIZE as u64 + remainder;
        if size == 0 {
            return Ok(());
        }
        let data = vec![1u8; size as usize];
        let file = File::new(0, "f", size, MemBlockSource(data));
        let last_idx = file.block_count() - 1;
        let last = file.read_block(last_idx).unwrap();
        let expected = if remainder == 0 { BLOCK_SIZE as u64 } else { remainder };
        prop_assert_eq!(last.len() as u64, expected);
    }
}
