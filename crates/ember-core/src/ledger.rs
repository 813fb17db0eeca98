use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::block::{Block, MinedBlockResult};
use crate::constants::{DIFFICULTY_BASE, SAFE_CONFIRM_COUNT};
use crate::transaction::Transaction;

/// Fork-choice outcome of feeding a block into the ledger. These are result
/// kinds callers branch on, not errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Committed to the chain.
    Valid,
    /// Hash or shape mismatch; dropped.
    Invalid,
    /// Well-formed but more than one index ahead: the caller should request
    /// a full chain resync.
    WayAhead,
    /// The referenced mining job is gone, claimed by a competing submission
    /// or superseded by a newer candidate.
    AlreadyMined,
}

/// Full ledger state as exchanged between peers: committed blocks, the
/// pending pool and the difficulty for the next candidate.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSnapshot {
    pub blocks: Vec<Block>,
    pub pending_transactions: Vec<Transaction>,
    pub current_difficulty: u32,
}

/// The chain, the pending pool and the mining-job table.
///
/// All mutation goes through a single owner (see the node binary); methods
/// here assume they are never interleaved mid-update.
pub struct Ledger {
    blocks: Vec<Block>,
    pending: Vec<Transaction>,
    current_difficulty: u32,
    cumulative_difficulty: u128,
    mining_jobs: HashMap<String, Block>,
}

impl Ledger {
    pub fn new(current_difficulty: u32) -> Self {
        let blocks = vec![Block::genesis()];
        let cumulative_difficulty = Self::cumulative_difficulty_of(&blocks);
        Self {
            blocks,
            pending: Vec::new(),
            current_difficulty,
            cumulative_difficulty,
            mining_jobs: HashMap::new(),
        }
    }

    /// Chain identity: the genesis block hash. Nodes with different chain
    /// ids never peer.
    pub fn chain_id(&self) -> &str {
        self.blocks[0]
            .block_hash()
            .expect("genesis always carries a hash")
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn last_block(&self) -> &Block {
        self.blocks
            .last()
            .expect("the chain always holds at least the genesis block")
    }

    pub fn pending_transactions(&self) -> &[Transaction] {
        &self.pending
    }

    pub fn current_difficulty(&self) -> u32 {
        self.current_difficulty
    }

    pub fn cumulative_difficulty(&self) -> u128 {
        self.cumulative_difficulty
    }

    pub fn mining_jobs(&self) -> &HashMap<String, Block> {
        &self.mining_jobs
    }

    /// Σ 16^difficulty over a chain: the fork-choice weight. Saturates
    /// rather than wrapping for absurd difficulties.
    pub fn cumulative_difficulty_of(blocks: &[Block]) -> u128 {
        blocks
            .iter()
            .map(|b| DIFFICULTY_BASE.saturating_pow(b.difficulty()))
            .fold(0u128, u128::saturating_add)
    }

    /// Build the next candidate block for `miner_address` and register it as
    /// a mining job keyed by its data hash.
    ///
    /// Pool order is preserved, duplicate data hashes are included once, and
    /// every collected fee goes to the coinbase. Each included transaction
    /// gets its confirmation overlay set against the current confirmed
    /// balances.
    pub fn prepare_candidate_block(&mut self, miner_address: &str) -> Block {
        let next_index = self.last_block().index() + 1;

        let mut seen: HashSet<&str> = HashSet::new();
        let mut included: Vec<Transaction> = Vec::with_capacity(self.pending.len());
        let mut fees: u64 = 0;
        for tx in &self.pending {
            if !seen.insert(tx.data_hash()) {
                continue;
            }
            let mut tx = tx.clone();
            tx.mined_in_block_index = Some(next_index);
            tx.transfer_successful = Some(self.can_sender_transfer(&tx));
            fees += tx.fee();
            included.push(tx);
        }

        let coinbase = Transaction::coinbase(
            miner_address,
            crate::constants::BLOCK_REWARD + fees,
            next_index,
        );
        let mut transactions = Vec::with_capacity(included.len() + 1);
        transactions.push(coinbase);
        transactions.extend(included);

        let prev_hash = self
            .last_block()
            .block_hash()
            .expect("committed blocks always carry a hash")
            .to_string();
        let block = Block::candidate(
            next_index,
            transactions,
            self.current_difficulty,
            prev_hash,
            miner_address.to_string(),
        );
        debug!(
            index = next_index,
            data_hash = block.block_data_hash(),
            txs = block.transactions().len(),
            "registered mining job"
        );
        self.mining_jobs
            .insert(block.block_data_hash().to_string(), block.clone());
        block
    }

    /// Coinbase always passes; anyone else must hold value + fee in
    /// confirmed balance.
    pub fn can_sender_transfer(&self, tx: &Transaction) -> bool {
        tx.is_coinbase() || self.confirmed_balance(tx.from()) >= tx.total_spend() as i128
    }

    /// Redeem a mining job. The job lookup doubles as the claim: once a
    /// submission wins, every later one for the same data hash gets
    /// `AlreadyMined`.
    pub fn add_mined_block(&mut self, result: &MinedBlockResult) -> BlockOutcome {
        let Some(candidate) = self.mining_jobs.get(&result.block_data_hash) else {
            return BlockOutcome::AlreadyMined;
        };
        let mut block = candidate.clone();
        block.seal(
            result.date_created.clone(),
            result.nonce,
            result.block_hash.clone(),
        );
        self.append_block(block)
    }

    /// Fork-choice entry point for a single block: commit if it is validly
    /// mined and extends the tip, flag a gap as `WayAhead`, reject the rest.
    pub fn append_block(&mut self, block: Block) -> BlockOutcome {
        if !block.is_mined() {
            return BlockOutcome::Invalid;
        }
        let tip_index = self.last_block().index();
        if block.index() == tip_index + 1 {
            let tip_hash = self
                .last_block()
                .block_hash()
                .expect("committed blocks always carry a hash");
            if block.prev_block_hash() != tip_hash {
                return BlockOutcome::Invalid;
            }
            self.commit_block(block);
            BlockOutcome::Valid
        } else if block.index() > tip_index + 1 {
            BlockOutcome::WayAhead
        } else {
            BlockOutcome::Invalid
        }
    }

    /// Commit step: append, flush confirmed transactions out of the pool,
    /// bump cumulative difficulty and drop mining jobs at or below the new
    /// tip.
    fn commit_block(&mut self, block: Block) {
        self.cumulative_difficulty = self
            .cumulative_difficulty
            .saturating_add(DIFFICULTY_BASE.saturating_pow(block.difficulty()));
        self.flush_pending_transactions(&block);
        info!(
            index = block.index(),
            hash = block.block_hash().unwrap_or_default(),
            txs = block.transactions().len(),
            "block committed"
        );
        self.blocks.push(block);
        let tip = self.last_block().index();
        self.mining_jobs.retain(|_, job| job.index() > tip);
    }

    /// Drop every pooled transaction now confirmed in `block`, by data hash.
    /// Order among the survivors is preserved.
    fn flush_pending_transactions(&mut self, block: &Block) {
        let confirmed: HashSet<&str> = block.transactions().iter().map(|t| t.data_hash()).collect();
        self.pending.retain(|tx| !confirmed.contains(tx.data_hash()));
    }

    pub(crate) fn push_pending(&mut self, tx: Transaction) {
        self.pending.push(tx);
    }

    pub fn has_pending(&self, data_hash: &str) -> bool {
        self.pending.iter().any(|tx| tx.data_hash() == data_hash)
    }

    /// Swap in a replacing chain. Previously pending transactions (local
    /// first, then the incoming pool) that the new chain has not confirmed
    /// are re-admitted with a cleared confirmation overlay; mining jobs below
    /// the new tip are purged.
    pub(crate) fn adopt(
        &mut self,
        blocks: Vec<Block>,
        current_difficulty: u32,
        incoming_pending: Vec<Transaction>,
    ) {
        let confirmed: HashSet<String> = blocks
            .iter()
            .flat_map(|b| b.transactions())
            .map(|t| t.data_hash().to_string())
            .collect();

        let mut pool: Vec<Transaction> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for mut tx in self.pending.drain(..).chain(incoming_pending) {
            if confirmed.contains(tx.data_hash()) || !seen.insert(tx.data_hash().to_string()) {
                continue;
            }
            tx.mined_in_block_index = None;
            tx.transfer_successful = None;
            pool.push(tx);
        }

        self.cumulative_difficulty = Self::cumulative_difficulty_of(&blocks);
        self.blocks = blocks;
        self.current_difficulty = current_difficulty;
        self.pending = pool;
        let tip = self.last_block().index();
        self.mining_jobs.retain(|_, job| job.index() > tip);
        info!(
            tip,
            cumulative_difficulty = self.cumulative_difficulty,
            pending = self.pending.len(),
            "chain replaced"
        );
    }

    /// Administrative reset to the genesis block. The pending pool survives;
    /// mining jobs are stale and dropped.
    pub fn reset_chain(&mut self) {
        self.blocks = vec![Block::genesis()];
        self.cumulative_difficulty = Self::cumulative_difficulty_of(&self.blocks);
        self.mining_jobs.clear();
    }

    fn balance_in(blocks: &[Block], address: &str) -> i128 {
        let mut balance = 0i128;
        for block in blocks {
            for tx in block.transactions() {
                if tx.to() == address {
                    balance += tx.value() as i128;
                }
                if tx.from() == address && !tx.is_coinbase() {
                    balance -= tx.total_spend() as i128;
                }
            }
        }
        balance
    }

    /// Net of all committed transfers touching `address`. The zero address
    /// is a sink: coinbase outflows are not debited from it.
    pub fn confirmed_balance(&self, address: &str) -> i128 {
        Self::balance_in(&self.blocks, address)
    }

    /// Confirmed balance ignoring the newest blocks, as a reorg-safety
    /// margin.
    pub fn safe_balance(&self, address: &str) -> i128 {
        let len = self.blocks.len().saturating_sub(SAFE_CONFIRM_COUNT);
        Self::balance_in(&self.blocks[..len], address)
    }

    /// Confirmed balance adjusted by the pending pool. Fees are debited from
    /// the sender here exactly as they are once confirmed.
    pub fn pending_balance(&self, address: &str) -> i128 {
        let mut balance = self.confirmed_balance(address);
        for tx in &self.pending {
            if tx.from() == address {
                balance -= tx.total_spend() as i128;
            }
            if tx.to() == address {
                balance += tx.value() as i128;
            }
        }
        balance
    }

    pub fn block_by_index(&self, index: u64) -> Option<&Block> {
        self.blocks.get(index as usize)
    }

    /// Look a transaction up by data hash, committed blocks first, then the
    /// pending pool.
    pub fn find_transaction(&self, data_hash: &str) -> Option<&Transaction> {
        self.blocks
            .iter()
            .flat_map(|b| b.transactions())
            .find(|tx| tx.data_hash() == data_hash)
            .or_else(|| self.pending.iter().find(|tx| tx.data_hash() == data_hash))
    }

    /// Every transaction touching `address`: confirmed in chain order, then
    /// pending in pool order.
    pub fn transactions_of_address(&self, address: &str) -> Vec<Transaction> {
        self.blocks
            .iter()
            .flat_map(|b| b.transactions())
            .chain(self.pending.iter())
            .filter(|tx| tx.from() == address || tx.to() == address)
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> ChainSnapshot {
        ChainSnapshot {
            blocks: self.blocks.clone(),
            pending_transactions: self.pending.clone(),
            current_difficulty: self.current_difficulty,
        }
    }
}
