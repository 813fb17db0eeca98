use serde::{Deserialize, Serialize};

use crate::constants::ZERO_ADDRESS;
use crate::hashing;
use crate::transaction::Transaction;

pub const GENESIS_BLOCK_DATA_HASH: &str =
    "e6c4e5e5a6f880028bddfc0e279c350ffdbd18dff8be2f2bb61cb6e99294a01b";
pub const GENESIS_BLOCK_HASH: &str =
    "232e447f6a0a065112b396aaa49cc52b0ff76c37cbd9169635992c207b8f10df";

/// An ordered transaction list plus proof-of-work metadata.
///
/// A block starts life as a candidate (`block_hash` = None) registered in the
/// mining-job table, and becomes immutable once a qualifying nonce seals it.
/// `block_data_hash` covers {index, transactions, difficulty, prevBlockHash,
/// minedBy} and is fixed at construction, before mining.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    index: u64,
    transactions: Vec<Transaction>,
    difficulty: u32,
    prev_block_hash: String,
    mined_by: String,
    block_data_hash: String,
    nonce: u64,
    date_created: String,
    block_hash: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BlockHashPayload<'a> {
    index: u64,
    transactions: &'a [Transaction],
    difficulty: u32,
    prev_block_hash: &'a str,
    mined_by: &'a str,
}

/// What a miner hands back for a mining job. Strict schema: a submission
/// with extra or missing fields is rejected at the wire boundary.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MinedBlockResult {
    pub block_data_hash: String,
    pub date_created: String,
    pub nonce: u64,
    pub block_hash: String,
}

impl Block {
    /// Build an unmined candidate. The data hash is computed here; nonce,
    /// timestamp and block hash arrive with the mined result.
    pub fn candidate(
        index: u64,
        transactions: Vec<Transaction>,
        difficulty: u32,
        prev_block_hash: String,
        mined_by: String,
    ) -> Self {
        let block_data_hash =
            Self::compute_data_hash(index, &transactions, difficulty, &prev_block_hash, &mined_by);
        Self {
            index,
            transactions,
            difficulty,
            prev_block_hash,
            mined_by,
            block_data_hash,
            nonce: 0,
            date_created: hashing::iso_timestamp_now(),
            block_hash: None,
        }
    }

    /// The fixed root-of-trust block shared by all conforming nodes. Stored
    /// constants, never recomputed; two nodes are peers only if this matches.
    pub fn genesis() -> Self {
        Self {
            index: 0,
            transactions: vec![Transaction::genesis()],
            difficulty: 0,
            prev_block_hash: "0".repeat(64),
            mined_by: ZERO_ADDRESS.to_string(),
            block_data_hash: GENESIS_BLOCK_DATA_HASH.to_string(),
            nonce: 0,
            date_created: "2018-06-13T10:01:48.474Z".to_string(),
            block_hash: Some(GENESIS_BLOCK_HASH.to_string()),
        }
    }

    pub fn compute_data_hash(
        index: u64,
        transactions: &[Transaction],
        difficulty: u32,
        prev_block_hash: &str,
        mined_by: &str,
    ) -> String {
        let payload = BlockHashPayload {
            index,
            transactions,
            difficulty,
            prev_block_hash,
            mined_by,
        };
        hashing::sha256_hex(hashing::canonical_json(&payload).as_bytes())
    }

    pub fn verify_data_hash(&self) -> bool {
        Self::compute_data_hash(
            self.index,
            &self.transactions,
            self.difficulty,
            &self.prev_block_hash,
            &self.mined_by,
        ) == self.block_data_hash
    }

    /// Hash of `blockDataHash|dateCreated|nonce`, the value a mined
    /// `block_hash` must equal.
    pub fn header_hash(&self) -> String {
        hashing::block_header_hash(&self.block_data_hash, &self.date_created, self.nonce)
    }

    /// Copy a mined result's proof fields onto this candidate.
    pub fn seal(&mut self, date_created: String, nonce: u64, block_hash: String) {
        self.date_created = date_created;
        self.nonce = nonce;
        self.block_hash = Some(block_hash);
    }

    /// A block is mined when its block hash matches the header hash and
    /// carries the required run of leading zeros.
    pub fn is_mined(&self) -> bool {
        match &self.block_hash {
            Some(hash) => {
                *hash == self.header_hash() && hashing::meets_difficulty(hash, self.difficulty)
            }
            None => false,
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn prev_block_hash(&self) -> &str {
        &self.prev_block_hash
    }

    pub fn mined_by(&self) -> &str {
        &self.mined_by
    }

    pub fn block_data_hash(&self) -> &str {
        &self.block_data_hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn date_created(&self) -> &str {
        &self.date_created
    }

    pub fn block_hash(&self) -> Option<&str> {
        self.block_hash.as_deref()
    }
}
