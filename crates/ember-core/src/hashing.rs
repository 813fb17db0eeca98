//! Canonical hash inputs. These must byte-match across every conforming
//! node: block data and transaction data hash compact JSON with keys in the
//! declared struct order, the block header hashes a pipe-joined string.

use serde::Serialize;
use sha2::{Digest, Sha256};

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compact JSON with object keys in struct declaration order. This is the
/// wire/hash format: `{"a":1,"b":"x"}`, no whitespace.
pub fn canonical_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).expect("canonical payloads always serialize")
}

/// Final block hash input: `blockDataHash|dateCreated|nonce`.
pub fn block_header_hash(block_data_hash: &str, date_created: &str, nonce: u64) -> String {
    sha256_hex(format!("{block_data_hash}|{date_created}|{nonce}").as_bytes())
}

/// A hash qualifies when its leading `difficulty` hex characters are all '0'.
pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    hash.len() >= difficulty as usize && hash.bytes().take(difficulty as usize).all(|b| b == b'0')
}

/// Current time in the ISO-8601 millisecond form used throughout the
/// protocol, e.g. `2018-06-13T10:01:48.471Z`.
pub fn iso_timestamp_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
