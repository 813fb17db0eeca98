//! Core of a minimal proof-of-work blockchain node: the ledger state
//! machine, chain validation and fork choice, transaction admission, the
//! wallet capability and a bounded mining search. Networking and the HTTP
//! surface live in the `ember-node` binary crate.

pub mod block;
pub mod constants;
pub mod error;
pub mod hashing;
pub mod ledger;
pub mod mine;
pub mod node;
pub mod transaction;
pub mod wallet;

pub use block::{Block, MinedBlockResult};
pub use error::{ChainRejection, TxRejection, WalletError};
pub use ledger::{BlockOutcome, ChainSnapshot, Ledger};
pub use node::{chain_preferable, Node, NodeInfo};
pub use transaction::{Transaction, TransactionDraft};
pub use wallet::Wallet;
