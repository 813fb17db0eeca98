/// Length of an address: hex RIPEMD-160 digest of a compressed public key.
pub const ADDRESS_LENGTH: usize = 40;

/// Sentinel sender for coinbase and system transactions. Tracked as a sink,
/// never debited.
pub const ZERO_ADDRESS: &str = "0000000000000000000000000000000000000000";

pub const MIN_TRANSACTION_FEE: u64 = 10;
pub const BLOCK_REWARD: u64 = 500_000;
pub const DEFAULT_DIFFICULTY: u32 = 4;

/// Blocks excluded from the "safe" balance view (the 6-confirmations rule).
pub const SAFE_CONFIRM_COUNT: usize = 6;

/// Base of the cumulative-difficulty weight: each block contributes
/// 16^difficulty, so higher-difficulty chains win super-linearly.
pub const DIFFICULTY_BASE: u128 = 16;
