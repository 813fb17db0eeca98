use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::block::MinedBlockResult;
use crate::hashing;

/// Nonces tried per timestamp refresh. The header timestamp is fixed within
/// a batch so the parallel search hashes a stable input.
const NONCE_BATCH: u64 = 200_000;

/// Search for a nonce whose header hash carries `difficulty` leading zero
/// hex characters. Returns `None` once the deadline passes; the caller is
/// expected to request a fresh candidate block and retry, never to block
/// indefinitely.
pub fn mine(
    block_data_hash: &str,
    difficulty: u32,
    timeout: Duration,
) -> Option<MinedBlockResult> {
    let deadline = Instant::now() + timeout;
    let mut next_nonce = 0u64;

    loop {
        if Instant::now() >= deadline {
            info!(block_data_hash, "mining timed out, request a new candidate");
            return None;
        }
        let date_created = hashing::iso_timestamp_now();
        let end = next_nonce.saturating_add(NONCE_BATCH);
        let found = (next_nonce..end).into_par_iter().find_any(|nonce| {
            let hash = hashing::block_header_hash(block_data_hash, &date_created, *nonce);
            hashing::meets_difficulty(&hash, difficulty)
        });

        if let Some(nonce) = found {
            let block_hash = hashing::block_header_hash(block_data_hash, &date_created, nonce);
            info!(block_data_hash, nonce, block_hash, "block mined");
            return Some(MinedBlockResult {
                block_data_hash: block_data_hash.to_string(),
                date_created,
                nonce,
                block_hash,
            });
        }
        debug!(block_data_hash, tried = end, "nonce batch exhausted");
        next_nonce = end;
    }
}
