use serde::{Deserialize, Serialize};

use crate::constants::ZERO_ADDRESS;
use crate::hashing;

/// A value transfer. The first seven fields are the signed, hashed payload
/// and are immutable once the hash is computed at construction; the
/// confirmation overlay (`mined_in_block_index`, `transfer_successful`) is
/// excluded from the hash and set when the transaction is placed in a block.
///
/// Field declaration order is the canonical wire order and must not change.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    from: String,
    to: String,
    value: u64,
    fee: u64,
    date_created: String,
    data: String,
    sender_pub_key: String,
    sender_signature: [String; 2],
    pub mined_in_block_index: Option<u64>,
    pub transfer_successful: Option<bool>,
    transaction_data_hash: String,
}

/// Hashed field subset in canonical key order. Schema exactness is the
/// struct definition itself; untrusted input never reaches this type without
/// passing through [`TransactionDraft`].
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TxHashPayload<'a> {
    from: &'a str,
    to: &'a str,
    value: u64,
    fee: u64,
    date_created: &'a str,
    data: &'a str,
    sender_pub_key: &'a str,
}

/// Untrusted submission as received over HTTP or gossip. Only the declared
/// fields are read; anything extra a client sends is ignored and the
/// canonical [`Transaction`] is rebuilt from scratch.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDraft {
    pub from: String,
    pub to: String,
    pub value: u64,
    pub fee: u64,
    pub date_created: String,
    pub data: String,
    pub sender_pub_key: String,
    pub sender_signature: [String; 2],
    pub transaction_data_hash: String,
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        from: String,
        to: String,
        value: u64,
        fee: u64,
        date_created: String,
        data: String,
        sender_pub_key: String,
        sender_signature: [String; 2],
    ) -> Self {
        let transaction_data_hash =
            Self::compute_data_hash(&from, &to, value, fee, &date_created, &data, &sender_pub_key);
        Self {
            from,
            to,
            value,
            fee,
            date_created,
            data,
            sender_pub_key,
            sender_signature,
            mined_in_block_index: None,
            transfer_successful: None,
            transaction_data_hash,
        }
    }

    /// Rebuild the canonical transaction from an untrusted draft. The data
    /// hash is always recomputed; comparing it to the submitted hash is the
    /// caller's admission check.
    pub fn from_draft(draft: &TransactionDraft) -> Self {
        Self::new(
            draft.from.clone(),
            draft.to.clone(),
            draft.value,
            draft.fee,
            draft.date_created.clone(),
            draft.data.clone(),
            draft.sender_pub_key.clone(),
            draft.sender_signature.clone(),
        )
    }

    /// Protocol-synthesized miner payout: zero-address sender, zeroed key
    /// material, no fee. Always the first transaction of a mined block.
    pub fn coinbase(to: &str, value: u64, block_index: u64) -> Self {
        let mut tx = Self::new(
            ZERO_ADDRESS.to_string(),
            to.to_string(),
            value,
            0,
            hashing::iso_timestamp_now(),
            "coinbase tx".to_string(),
            "0".repeat(65),
            ["0".repeat(64), "0".repeat(64)],
        );
        tx.mined_in_block_index = Some(block_index);
        tx.transfer_successful = Some(true);
        tx
    }

    /// The hard-coded genesis transfer. Stored values, never recomputed.
    pub(crate) fn genesis() -> Self {
        Self {
            from: ZERO_ADDRESS.to_string(),
            to: "e9e12fe5c7d3330f83d7a374ca1bacc0cc730196".to_string(),
            value: 1_000_000_000_000,
            fee: 0,
            date_created: "2018-06-13T10:01:48.471Z".to_string(),
            data: "The first burgers".to_string(),
            sender_pub_key: "0".repeat(65),
            sender_signature: ["0".repeat(64), "0".repeat(64)],
            mined_in_block_index: Some(0),
            transfer_successful: Some(true),
            transaction_data_hash: "175f5ee0cd0e93b572729b09853f2cde411a9976abe39236dfbb9c8c7f319d4c"
                .to_string(),
        }
    }

    pub fn compute_data_hash(
        from: &str,
        to: &str,
        value: u64,
        fee: u64,
        date_created: &str,
        data: &str,
        sender_pub_key: &str,
    ) -> String {
        let payload = TxHashPayload {
            from,
            to,
            value,
            fee,
            date_created,
            data,
            sender_pub_key,
        };
        hashing::sha256_hex(hashing::canonical_json(&payload).as_bytes())
    }

    /// Recompute the data hash from the stored fields and compare. Holds by
    /// construction for locally built transactions; meaningful only for
    /// deserialized ones.
    pub fn verify_data_hash(&self) -> bool {
        Self::compute_data_hash(
            &self.from,
            &self.to,
            self.value,
            self.fee,
            &self.date_created,
            &self.data,
            &self.sender_pub_key,
        ) == self.transaction_data_hash
    }

    pub fn is_coinbase(&self) -> bool {
        self.from == ZERO_ADDRESS
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn fee(&self) -> u64 {
        self.fee
    }

    pub fn date_created(&self) -> &str {
        &self.date_created
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn sender_pub_key(&self) -> &str {
        &self.sender_pub_key
    }

    pub fn sender_signature(&self) -> &[String; 2] {
        &self.sender_signature
    }

    pub fn data_hash(&self) -> &str {
        &self.transaction_data_hash
    }

    /// Amount the sender must be able to cover: value plus fee.
    pub fn total_spend(&self) -> u128 {
        self.value as u128 + self.fee as u128
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transaction {
        Transaction::new(
            "c3293572dbe6ebc60de4a20ed0e21446cae66b17".into(),
            "f51362b7351ef62253a227a77751ad9b2302f911".into(),
            250_123,
            10,
            "2018-01-10T17:53:48.972Z".into(),
            "funds".into(),
            "a".repeat(65),
            ["b".repeat(64), "c".repeat(64)],
        )
    }

    #[test]
    fn data_hash_is_deterministic() {
        let a = sample();
        let b = sample();
        assert_eq!(a.data_hash(), b.data_hash());
        assert!(a.verify_data_hash());
    }

    #[test]
    fn data_hash_excludes_overlay_fields() {
        let mut tx = sample();
        let before = tx.data_hash().to_string();
        tx.mined_in_block_index = Some(7);
        tx.transfer_successful = Some(false);
        assert!(tx.verify_data_hash());
        assert_eq!(tx.data_hash(), before);
    }

    #[test]
    fn genesis_transaction_hash_matches_stored_constant() {
        let tx = Transaction::genesis();
        assert!(tx.verify_data_hash());
    }

    #[test]
    fn wire_order_matches_canonical_layout() {
        let tx = sample();
        let json = serde_json::to_string(&tx).unwrap();
        let from_pos = json.find("\"from\"").unwrap();
        let sig_pos = json.find("\"senderSignature\"").unwrap();
        let hash_pos = json.find("\"transactionDataHash\"").unwrap();
        assert!(from_pos < sig_pos && sig_pos < hash_pos);
        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tx);
    }

    #[test]
    fn draft_round_trip_recomputes_the_hash() {
        let tx = sample();
        let draft = TransactionDraft {
            from: tx.from().into(),
            to: tx.to().into(),
            value: tx.value(),
            fee: tx.fee(),
            date_created: tx.date_created().into(),
            data: tx.data().into(),
            sender_pub_key: tx.sender_pub_key().into(),
            sender_signature: tx.sender_signature().clone(),
            transaction_data_hash: "not the real hash".into(),
        };
        let rebuilt = Transaction::from_draft(&draft);
        assert_eq!(rebuilt.data_hash(), tx.data_hash());
        assert_ne!(rebuilt.data_hash(), draft.transaction_data_hash);
    }

    #[test]
    fn coinbase_comes_from_the_zero_address() {
        let tx = Transaction::coinbase("f51362b7351ef62253a227a77751ad9b2302f911", 500_000, 3);
        assert!(tx.is_coinbase());
        assert_eq!(tx.fee(), 0);
        assert_eq!(tx.mined_in_block_index, Some(3));
        assert_eq!(tx.transfer_successful, Some(true));
        assert!(tx.verify_data_hash());
    }
}
