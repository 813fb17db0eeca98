use thiserror::Error;

use crate::constants::MIN_TRANSACTION_FEE;

/// Why a submitted transaction was refused admission to the pending pool.
/// Checks run in a fixed order; the first failure is reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxRejection {
    #[error("transaction schema is invalid: {0}")]
    Schema(String),
    #[error("transactionDataHash does not match the signed fields")]
    HashMismatch,
    #[error("invalid {side} address: {address:?}")]
    InvalidAddress { side: &'static str, address: String },
    #[error("sender cannot cover value plus fee")]
    InsufficientBalance,
    #[error("sender balance does not exceed the fee")]
    FeeNotCovered,
    #[error("receiver balance would overflow")]
    BalanceOverflow,
    #[error("signature does not verify against senderPubKey")]
    BadSignature,
    #[error("fee {fee} is below the protocol minimum of {}", MIN_TRANSACTION_FEE)]
    LowFee { fee: u64 },
    #[error("an identical transaction is already pending")]
    DuplicatePending,
}

/// Why an externally supplied chain was refused. Validation fails closed:
/// a single violation rejects the whole candidate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainRejection {
    #[error("genesis block does not match the local chain root")]
    GenesisMismatch,
    #[error("candidate chain is empty")]
    Empty,
    #[error("block {index} is out of sequence")]
    OutOfSequence { index: u64 },
    #[error("block {index} data hash mismatch")]
    DataHashMismatch { index: u64 },
    #[error("block {index} has no block hash")]
    NotMined { index: u64 },
    #[error("block {index} header hash mismatch")]
    HeaderHashMismatch { index: u64 },
    #[error("block {index} does not meet its declared difficulty")]
    DifficultyNotMet { index: u64 },
    #[error("block {index} does not link to its predecessor")]
    BrokenLink { index: u64 },
    #[error("block {index} carries an invalid transaction: {reason}")]
    InvalidTransaction { index: u64, reason: String },
    #[error("candidate chain is not preferable to the local chain")]
    NotPreferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    #[error("invalid private key")]
    BadPrivateKey,
    #[error("invalid public key encoding")]
    BadPublicKey,
    #[error("invalid message digest")]
    BadDigest,
    #[error("invalid signature encoding")]
    BadSignature,
}
