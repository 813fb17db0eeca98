use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::block::{Block, MinedBlockResult};
use crate::constants::{ADDRESS_LENGTH, MIN_TRANSACTION_FEE, ZERO_ADDRESS};
use crate::error::{ChainRejection, TxRejection};
use crate::ledger::{BlockOutcome, ChainSnapshot, Ledger};
use crate::transaction::{Transaction, TransactionDraft};
use crate::wallet;

/// Identity and chain summary, served at /info and exchanged in the peer
/// handshake. Two nodes interoperate only when their chain ids match.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub about: String,
    pub node_id: String,
    pub chain_id: String,
    pub node_url: String,
    pub current_difficulty: u32,
    pub blocks_count: usize,
    pub cumulative_difficulty: u128,
    pub latest_block_hash: String,
    pub confirmed_transactions: usize,
    pub pending_transactions: usize,
}

/// A ledger plus peer-facing identity. Owns every protocol decision:
/// transaction admission, block admission, chain validation and fork choice.
pub struct Node {
    ledger: Ledger,
    node_id: String,
    node_url: String,
    about: String,
}

impl Node {
    pub fn new(node_id: String, node_url: String, difficulty: u32) -> Self {
        Self {
            ledger: Ledger::new(difficulty),
            node_id,
            node_url,
            about: format!("Ember node / {}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn node_url(&self) -> &str {
        &self.node_url
    }

    pub fn info(&self) -> NodeInfo {
        let confirmed = self
            .ledger
            .blocks()
            .iter()
            .map(|b| b.transactions().len())
            .sum();
        NodeInfo {
            about: self.about.clone(),
            node_id: self.node_id.clone(),
            chain_id: self.ledger.chain_id().to_string(),
            node_url: self.node_url.clone(),
            current_difficulty: self.ledger.current_difficulty(),
            blocks_count: self.ledger.blocks().len(),
            cumulative_difficulty: self.ledger.cumulative_difficulty(),
            latest_block_hash: self
                .ledger
                .last_block()
                .block_hash()
                .expect("committed blocks always carry a hash")
                .to_string(),
            confirmed_transactions: confirmed,
            pending_transactions: self.ledger.pending_transactions().len(),
        }
    }

    /// Admit an externally submitted transaction into the pending pool.
    ///
    /// The canonical transaction is rebuilt from the draft's declared fields
    /// only; whatever else a client sent never reaches the pool. The first
    /// failing check is reported.
    pub fn add_pending_transaction(
        &mut self,
        draft: &TransactionDraft,
    ) -> Result<Transaction, TxRejection> {
        let tx = Transaction::from_draft(draft);
        self.validate_transaction(&tx, &draft.transaction_data_hash)?;
        debug!(hash = tx.data_hash(), from = tx.from(), "transaction admitted");
        self.ledger.push_pending(tx.clone());
        Ok(tx)
    }

    /// The admission checks, in protocol order. Schema exactness and
    /// non-negative amounts are enforced by the typed wire boundary before
    /// this is reached.
    fn validate_transaction(
        &self,
        tx: &Transaction,
        declared_hash: &str,
    ) -> Result<(), TxRejection> {
        if tx.data_hash() != declared_hash {
            return Err(TxRejection::HashMismatch);
        }
        if !is_valid_address(tx.from()) {
            return Err(TxRejection::InvalidAddress {
                side: "sender",
                address: tx.from().to_string(),
            });
        }
        if !is_valid_address(tx.to()) {
            return Err(TxRejection::InvalidAddress {
                side: "recipient",
                address: tx.to().to_string(),
            });
        }
        if !self.ledger.can_sender_transfer(tx) {
            return Err(TxRejection::InsufficientBalance);
        }
        if self.ledger.confirmed_balance(tx.from()) <= tx.fee() as i128 {
            return Err(TxRejection::FeeNotCovered);
        }
        let receiver_after = self.ledger.confirmed_balance(tx.to()) + tx.value() as i128;
        if receiver_after > u64::MAX as i128 {
            return Err(TxRejection::BalanceOverflow);
        }
        if !wallet::verify(tx.sender_pub_key(), tx.data_hash(), tx.sender_signature()) {
            return Err(TxRejection::BadSignature);
        }
        if tx.fee() < MIN_TRANSACTION_FEE {
            return Err(TxRejection::LowFee { fee: tx.fee() });
        }
        if self.ledger.has_pending(tx.data_hash()) {
            return Err(TxRejection::DuplicatePending);
        }
        Ok(())
    }

    pub fn prepare_candidate_block(&mut self, miner_address: &str) -> Block {
        self.ledger.prepare_candidate_block(miner_address)
    }

    pub fn add_mined_block(&mut self, result: &MinedBlockResult) -> BlockOutcome {
        self.ledger.add_mined_block(result)
    }

    pub fn append_block(&mut self, block: Block) -> BlockOutcome {
        self.ledger.append_block(block)
    }

    pub fn reset_chain(&mut self) {
        self.ledger.reset_chain();
    }

    /// Full admission check of an externally supplied chain. Fails closed on
    /// the first violation; on success returns the candidate's cumulative
    /// difficulty.
    pub fn validate_chain(&self, blocks: &[Block]) -> Result<u128, ChainRejection> {
        let Some(first) = blocks.first() else {
            return Err(ChainRejection::Empty);
        };
        if *first != Block::genesis() {
            return Err(ChainRejection::GenesisMismatch);
        }

        // Replayed confirmed balances, used to independently recompute every
        // transferSuccessful flag against the state before its block.
        let mut balances: HashMap<&str, i128> = HashMap::new();
        apply_block_balances(&mut balances, first);

        for (i, block) in blocks.iter().enumerate().skip(1) {
            let index = block.index();
            if index != i as u64 {
                return Err(ChainRejection::OutOfSequence { index });
            }
            if !block.verify_data_hash() {
                return Err(ChainRejection::DataHashMismatch { index });
            }
            let Some(block_hash) = block.block_hash() else {
                return Err(ChainRejection::NotMined { index });
            };
            if block.header_hash() != block_hash {
                return Err(ChainRejection::HeaderHashMismatch { index });
            }
            if !crate::hashing::meets_difficulty(block_hash, block.difficulty()) {
                return Err(ChainRejection::DifficultyNotMet { index });
            }
            let prev_hash = blocks[i - 1]
                .block_hash()
                .expect("previous block passed the hash checks");
            if block.prev_block_hash() != prev_hash {
                return Err(ChainRejection::BrokenLink { index });
            }

            for tx in block.transactions() {
                if !tx.verify_data_hash() {
                    return Err(ChainRejection::InvalidTransaction {
                        index,
                        reason: format!("{} has a stale data hash", tx.data_hash()),
                    });
                }
                if tx.mined_in_block_index != Some(index) {
                    return Err(ChainRejection::InvalidTransaction {
                        index,
                        reason: format!("{} is marked for another block", tx.data_hash()),
                    });
                }
                let expected = tx.from() == ZERO_ADDRESS
                    || balances.get(tx.from()).copied().unwrap_or(0) >= tx.total_spend() as i128;
                if tx.transfer_successful != Some(expected) {
                    return Err(ChainRejection::InvalidTransaction {
                        index,
                        reason: format!("{} has a wrong transferSuccessful flag", tx.data_hash()),
                    });
                }
            }
            apply_block_balances(&mut balances, block);
        }
        Ok(Ledger::cumulative_difficulty_of(blocks))
    }

    /// Is a remote chain preferable to ours? Same predicate as
    /// `replace_chain`, used by the sync handshake to decide whether to
    /// request a peer's chain.
    pub fn should_sync(&self, peer_cumulative_difficulty: u128, peer_tip_hash: &str) -> bool {
        chain_preferable(
            peer_cumulative_difficulty,
            peer_tip_hash,
            self.ledger.cumulative_difficulty(),
            self.ledger
                .last_block()
                .block_hash()
                .expect("committed blocks always carry a hash"),
        )
    }

    /// Fork choice over a full candidate snapshot: validate, compare
    /// cumulative difficulty (tip hash as the tie-break), and swap
    /// all-or-nothing. Unconfirmed pending transactions are re-admitted and
    /// outstanding mining jobs above the new tip are carried forward.
    pub fn replace_chain(&mut self, snapshot: ChainSnapshot) -> Result<(), ChainRejection> {
        let candidate_cum = self.validate_chain(&snapshot.blocks)?;
        let candidate_tip = snapshot
            .blocks
            .last()
            .and_then(|b| b.block_hash())
            .expect("validated chains are non-empty and mined");
        if !chain_preferable(
            candidate_cum,
            candidate_tip,
            self.ledger.cumulative_difficulty(),
            self.ledger
                .last_block()
                .block_hash()
                .expect("committed blocks always carry a hash"),
        ) {
            return Err(ChainRejection::NotPreferred);
        }
        self.ledger.adopt(
            snapshot.blocks,
            snapshot.current_difficulty,
            snapshot.pending_transactions,
        );
        Ok(())
    }
}

fn apply_block_balances<'a>(balances: &mut HashMap<&'a str, i128>, block: &'a Block) {
    for tx in block.transactions() {
        *balances.entry(tx.to()).or_insert(0) += tx.value() as i128;
        if !tx.is_coinbase() {
            *balances.entry(tx.from()).or_insert(0) -= tx.total_spend() as i128;
        }
    }
}

/// Longest-cumulative-work rule with a deterministic tie-break: at equal
/// work, the numerically smaller tip hash (as a big unsigned integer) wins,
/// so all honest nodes converge on one branch.
pub fn chain_preferable(
    candidate_cumulative: u128,
    candidate_tip_hash: &str,
    local_cumulative: u128,
    local_tip_hash: &str,
) -> bool {
    if candidate_cumulative != local_cumulative {
        return candidate_cumulative > local_cumulative;
    }
    hash_numerically_less(candidate_tip_hash, local_tip_hash)
}

/// Numeric order of two hex digests without materializing the integers:
/// strip leading zeros, then shorter is smaller, then lexicographic.
fn hash_numerically_less(a: &str, b: &str) -> bool {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    if a.len() != b.len() {
        return a.len() < b.len();
    }
    a < b
}

pub fn is_valid_address(address: &str) -> bool {
    address.len() == ADDRESS_LENGTH && address.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_DIFFICULTY;
    use crate::hashing;
    use crate::wallet::Wallet;

    fn test_node(name: &str) -> Node {
        Node::new(name.to_string(), format!("127.0.0.1:0/{name}"), 0)
    }

    /// Mine the next block through the public candidate/submit cycle.
    fn mine_next(node: &mut Node, miner: &str) {
        let candidate = node.prepare_candidate_block(miner);
        let date = "2020-01-01T00:00:00.000Z".to_string();
        let hash = hashing::block_header_hash(candidate.block_data_hash(), &date, 0);
        let result = MinedBlockResult {
            block_data_hash: candidate.block_data_hash().to_string(),
            date_created: date,
            nonce: 0,
            block_hash: hash,
        };
        assert_eq!(node.add_mined_block(&result), BlockOutcome::Valid);
    }

    fn funded_wallet(node: &mut Node) -> Wallet {
        let wallet = Wallet::generate();
        mine_next(node, &wallet.address);
        wallet
    }

    #[test]
    fn info_reflects_the_genesis_chain() {
        let node = test_node("n1");
        let info = node.info();
        assert_eq!(info.blocks_count, 1);
        assert_eq!(info.cumulative_difficulty, 1);
        assert_eq!(info.chain_id, info.latest_block_hash);
        assert_eq!(info.pending_transactions, 0);
    }

    #[test]
    fn a_valid_signed_transaction_is_admitted() {
        let mut node = test_node("n1");
        let wallet = funded_wallet(&mut node);
        let draft = wallet
            .create_transaction("f51362b7351ef62253a227a77751ad9b2302f911", 1_000, 10, "lunch")
            .unwrap();
        let tx = node.add_pending_transaction(&draft).unwrap();
        assert_eq!(tx.data_hash(), draft.transaction_data_hash);
        assert_eq!(node.ledger().pending_transactions().len(), 1);
    }

    #[test]
    fn low_fee_is_rejected_and_the_pool_is_unchanged() {
        let mut node = test_node("n1");
        let wallet = funded_wallet(&mut node);
        let draft = wallet
            .create_transaction("f51362b7351ef62253a227a77751ad9b2302f911", 1_000, 9, "")
            .unwrap();
        assert_eq!(
            node.add_pending_transaction(&draft),
            Err(TxRejection::LowFee { fee: 9 })
        );
        assert!(node.ledger().pending_transactions().is_empty());
    }

    #[test]
    fn unfunded_sender_fails_the_balance_check_first() {
        let mut node = test_node("n1");
        let wallet = Wallet::generate(); // no coinbase payout
        let draft = wallet
            .create_transaction("f51362b7351ef62253a227a77751ad9b2302f911", 1, 10, "")
            .unwrap();
        assert_eq!(
            node.add_pending_transaction(&draft),
            Err(TxRejection::InsufficientBalance)
        );
    }

    #[test]
    fn a_tampered_hash_is_rejected() {
        let mut node = test_node("n1");
        let wallet = funded_wallet(&mut node);
        let mut draft = wallet
            .create_transaction("f51362b7351ef62253a227a77751ad9b2302f911", 1_000, 10, "")
            .unwrap();
        draft.transaction_data_hash = hashing::sha256_hex(b"not this transaction");
        assert_eq!(
            node.add_pending_transaction(&draft),
            Err(TxRejection::HashMismatch)
        );
    }

    #[test]
    fn a_forged_signature_is_rejected() {
        let mut node = test_node("n1");
        let wallet = funded_wallet(&mut node);
        let mut draft = wallet
            .create_transaction("f51362b7351ef62253a227a77751ad9b2302f911", 1_000, 10, "")
            .unwrap();
        draft.sender_signature = ["1".repeat(64), "2".repeat(64)];
        assert_eq!(
            node.add_pending_transaction(&draft),
            Err(TxRejection::BadSignature)
        );
    }

    #[test]
    fn malformed_addresses_are_rejected() {
        let mut node = test_node("n1");
        let wallet = funded_wallet(&mut node);
        let draft = wallet.create_transaction("not-an-address", 1, 10, "").unwrap();
        assert!(matches!(
            node.add_pending_transaction(&draft),
            Err(TxRejection::InvalidAddress { side: "recipient", .. })
        ));
    }

    #[test]
    fn duplicate_submission_is_idempotent() {
        let mut node = test_node("n1");
        let wallet = funded_wallet(&mut node);
        let draft = wallet
            .create_transaction("f51362b7351ef62253a227a77751ad9b2302f911", 1_000, 10, "")
            .unwrap();
        node.add_pending_transaction(&draft).unwrap();
        assert_eq!(
            node.add_pending_transaction(&draft),
            Err(TxRejection::DuplicatePending)
        );
        assert_eq!(node.ledger().pending_transactions().len(), 1);
    }

    #[test]
    fn validate_chain_accepts_its_own_history() {
        let mut node = test_node("n1");
        let wallet = funded_wallet(&mut node);
        let draft = wallet
            .create_transaction("f51362b7351ef62253a227a77751ad9b2302f911", 1_000, 10, "")
            .unwrap();
        node.add_pending_transaction(&draft).unwrap();
        mine_next(&mut node, &wallet.address);

        let cum = node.validate_chain(node.ledger().blocks()).unwrap();
        assert_eq!(cum, node.ledger().cumulative_difficulty());
    }

    #[test]
    fn validate_chain_rejects_a_wrong_genesis() {
        let node = test_node("n1");
        let mut other = test_node("n2");
        mine_next(&mut other, "cccccccccccccccccccccccccccccccccccccccc");
        let mut blocks = other.ledger().blocks().to_vec();
        blocks[0] = blocks[1].clone(); // not our root of trust
        assert_eq!(
            node.validate_chain(&blocks),
            Err(ChainRejection::GenesisMismatch)
        );
    }

    #[test]
    fn validate_chain_rejects_a_broken_link() {
        let node = test_node("n1");
        let mut a = test_node("a");
        let mut b = test_node("b");
        mine_next(&mut a, "cccccccccccccccccccccccccccccccccccccccc");
        mine_next(&mut a, "cccccccccccccccccccccccccccccccccccccccc");
        mine_next(&mut b, "dddddddddddddddddddddddddddddddddddddddd");
        let mut blocks = a.ledger().blocks().to_vec();
        // splice in a block from an unrelated fork
        blocks[1] = b.ledger().blocks()[1].clone();
        assert_eq!(
            node.validate_chain(&blocks),
            Err(ChainRejection::BrokenLink { index: 2 })
        );
    }

    #[test]
    fn validate_chain_recomputes_transfer_flags() {
        let node = test_node("n1");
        let mut other = test_node("n2");
        let wallet = funded_wallet(&mut other);
        let draft = wallet
            .create_transaction("f51362b7351ef62253a227a77751ad9b2302f911", 1_000, 10, "")
            .unwrap();
        other.add_pending_transaction(&draft).unwrap();
        mine_next(&mut other, &wallet.address);

        let mut blocks = other.ledger().blocks().to_vec();
        // flip the recorded flag on the transfer; the replay must catch it
        let tampered: Vec<Transaction> = blocks[2]
            .transactions()
            .iter()
            .cloned()
            .map(|mut tx| {
                if !tx.is_coinbase() {
                    tx.transfer_successful = Some(false);
                }
                tx
            })
            .collect();
        blocks[2] = Block::candidate(
            2,
            tampered,
            0,
            blocks[1].block_hash().unwrap().to_string(),
            wallet.address.clone(),
        );
        let date = "2020-01-01T00:00:00.000Z".to_string();
        let hash = hashing::block_header_hash(blocks[2].block_data_hash(), &date, 0);
        blocks[2].seal(date, 0, hash);

        assert!(matches!(
            node.validate_chain(&blocks),
            Err(ChainRejection::InvalidTransaction { index: 2, .. })
        ));
    }

    #[test]
    fn replace_chain_adopts_heavier_work_and_readmits_pending() {
        let mut local = test_node("local");
        let wallet = funded_wallet(&mut local);
        let draft = wallet
            .create_transaction("f51362b7351ef62253a227a77751ad9b2302f911", 1_000, 10, "")
            .unwrap();
        local.add_pending_transaction(&draft).unwrap();

        let mut remote = test_node("remote");
        mine_next(&mut remote, "cccccccccccccccccccccccccccccccccccccccc");
        mine_next(&mut remote, "cccccccccccccccccccccccccccccccccccccccc");
        mine_next(&mut remote, "cccccccccccccccccccccccccccccccccccccccc");

        local.replace_chain(remote.ledger().snapshot()).unwrap();
        assert_eq!(local.ledger().blocks().len(), 4);
        // the pending transfer was not confirmed by the new chain
        assert!(local.ledger().has_pending(&draft.transaction_data_hash));
    }

    #[test]
    fn replace_chain_never_decreases_cumulative_difficulty() {
        let mut local = test_node("local");
        mine_next(&mut local, "cccccccccccccccccccccccccccccccccccccccc");
        mine_next(&mut local, "cccccccccccccccccccccccccccccccccccccccc");
        let before = local.ledger().cumulative_difficulty();

        let shorter = test_node("remote").ledger().snapshot();
        assert_eq!(local.replace_chain(shorter), Err(ChainRejection::NotPreferred));
        assert_eq!(local.ledger().cumulative_difficulty(), before);
    }

    #[test]
    fn offer_order_does_not_change_the_winner() {
        let mut a = test_node("a");
        mine_next(&mut a, "cccccccccccccccccccccccccccccccccccccccc");
        mine_next(&mut a, "cccccccccccccccccccccccccccccccccccccccc");
        let heavy = a.ledger().snapshot();
        let mut b = test_node("b");
        mine_next(&mut b, "dddddddddddddddddddddddddddddddddddddddd");
        let light = b.ledger().snapshot();

        let mut first = test_node("x");
        let _ = first.replace_chain(light.clone());
        first.replace_chain(heavy.clone()).unwrap();

        let mut second = test_node("y");
        second.replace_chain(heavy.clone()).unwrap();
        assert_eq!(second.replace_chain(light), Err(ChainRejection::NotPreferred));

        assert_eq!(
            first.ledger().last_block().block_hash(),
            second.ledger().last_block().block_hash()
        );
    }

    #[test]
    fn equal_work_ties_break_toward_the_smaller_tip_hash() {
        let mut a = test_node("a");
        mine_next(&mut a, "cccccccccccccccccccccccccccccccccccccccc");
        let mut b = test_node("b");
        mine_next(&mut b, "dddddddddddddddddddddddddddddddddddddddd");

        let tip_a = a.ledger().last_block().block_hash().unwrap().to_string();
        let tip_b = b.ledger().last_block().block_hash().unwrap().to_string();
        assert_eq!(
            a.ledger().cumulative_difficulty(),
            b.ledger().cumulative_difficulty()
        );

        let a_wants_b = a.should_sync(b.ledger().cumulative_difficulty(), &tip_b);
        let b_wants_a = b.should_sync(a.ledger().cumulative_difficulty(), &tip_a);
        // exactly one side syncs: the one whose own tip hash is larger
        assert_ne!(a_wants_b, b_wants_a);
        assert_eq!(a_wants_b, tip_b < tip_a);
    }

    #[test]
    fn default_difficulty_node_reports_it() {
        let node = Node::new("id".into(), "url".into(), DEFAULT_DIFFICULTY);
        assert_eq!(node.info().current_difficulty, DEFAULT_DIFFICULTY);
        assert_eq!(node.info().cumulative_difficulty, 1);
    }
}
