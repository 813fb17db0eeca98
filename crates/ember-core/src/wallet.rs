//! ECDSA wallet capability: key derivation, address derivation, signing and
//! signature verification over secp256k1.
//!
//! Public keys travel as 65 hex characters: the 64-char x coordinate
//! followed by a single parity digit ('0' for even y). Addresses are the
//! hex RIPEMD-160 digest of that string. Signatures are an [r, s] pair of
//! hex strings over the transaction data hash.

use ripemd::{Digest, Ripemd160};
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use crate::error::WalletError;
use crate::hashing;
use crate::transaction::{Transaction, TransactionDraft};

pub struct Wallet {
    secret_key: SecretKey,
    pub private_key: String,
    pub public_key: String,
    pub address: String,
}

impl Wallet {
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut rand::thread_rng());
        Self::from_keys(secret_key, public_key)
    }

    pub fn from_private_hex(private_key: &str) -> Result<Self, WalletError> {
        let bytes = hex::decode(private_key).map_err(|_| WalletError::BadPrivateKey)?;
        let secret_key = SecretKey::from_slice(&bytes).map_err(|_| WalletError::BadPrivateKey)?;
        let secp = Secp256k1::new();
        let public_key = secret_key.public_key(&secp);
        Ok(Self::from_keys(secret_key, public_key))
    }

    fn from_keys(secret_key: SecretKey, public_key: PublicKey) -> Self {
        let compressed = compress_public_key(&public_key);
        let address = derive_address(&compressed);
        Self {
            private_key: hex::encode(secret_key.secret_bytes()),
            secret_key,
            public_key: compressed,
            address,
        }
    }

    /// Sign a transaction data hash, returning the [r, s] hex pair.
    pub fn sign_hash(&self, data_hash_hex: &str) -> Result<[String; 2], WalletError> {
        let msg = message_from_hash(data_hash_hex)?;
        let secp = Secp256k1::new();
        let compact = secp.sign_ecdsa(&msg, &self.secret_key).serialize_compact();
        Ok([hex::encode(&compact[..32]), hex::encode(&compact[32..])])
    }

    /// Build and sign a ready-to-submit transaction draft.
    pub fn create_transaction(
        &self,
        to: &str,
        value: u64,
        fee: u64,
        data: &str,
    ) -> Result<TransactionDraft, WalletError> {
        let date_created = hashing::iso_timestamp_now();
        let transaction_data_hash = Transaction::compute_data_hash(
            &self.address,
            to,
            value,
            fee,
            &date_created,
            data,
            &self.public_key,
        );
        let sender_signature = self.sign_hash(&transaction_data_hash)?;
        Ok(TransactionDraft {
            from: self.address.clone(),
            to: to.to_string(),
            value,
            fee,
            date_created,
            data: data.to_string(),
            sender_pub_key: self.public_key.clone(),
            sender_signature,
            transaction_data_hash,
        })
    }
}

/// 64 hex chars of x plus one parity digit, the wire form of a public key.
pub fn compress_public_key(public_key: &PublicKey) -> String {
    let sec1 = public_key.serialize();
    let parity = if sec1[0] == 0x02 { '0' } else { '1' };
    format!("{}{}", hex::encode(&sec1[1..]), parity)
}

/// Address = hex RIPEMD-160 over the compressed public key string.
pub fn derive_address(compressed_pub_key: &str) -> String {
    let mut hasher = Ripemd160::new();
    hasher.update(compressed_pub_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Check an [r, s] signature over `data_hash_hex` against a wire-format
/// public key. Any malformed input verifies as false rather than erroring;
/// the admission pipeline only cares whether the check passed.
pub fn verify(sender_pub_key: &str, data_hash_hex: &str, signature: &[String; 2]) -> bool {
    verify_inner(sender_pub_key, data_hash_hex, signature).is_ok()
}

fn verify_inner(
    sender_pub_key: &str,
    data_hash_hex: &str,
    signature: &[String; 2],
) -> Result<(), WalletError> {
    let public_key = decompress_public_key(sender_pub_key)?;
    let msg = message_from_hash(data_hash_hex)?;

    let mut compact = [0u8; 64];
    decode_padded(&signature[0], &mut compact[..32])?;
    decode_padded(&signature[1], &mut compact[32..])?;
    let mut sig = Signature::from_compact(&compact).map_err(|_| WalletError::BadSignature)?;
    sig.normalize_s();

    let secp = Secp256k1::verification_only();
    secp.verify_ecdsa(&msg, &sig, &public_key)
        .map_err(|_| WalletError::BadSignature)
}

fn decompress_public_key(compressed: &str) -> Result<PublicKey, WalletError> {
    if compressed.len() != 65 {
        return Err(WalletError::BadPublicKey);
    }
    let (x, parity) = compressed.split_at(64);
    let prefix = match parity {
        "0" => "02",
        "1" => "03",
        _ => return Err(WalletError::BadPublicKey),
    };
    let sec1 = hex::decode(format!("{prefix}{x}")).map_err(|_| WalletError::BadPublicKey)?;
    PublicKey::from_slice(&sec1).map_err(|_| WalletError::BadPublicKey)
}

fn message_from_hash(data_hash_hex: &str) -> Result<Message, WalletError> {
    let bytes = hex::decode(data_hash_hex).map_err(|_| WalletError::BadDigest)?;
    let digest: [u8; 32] = bytes.try_into().map_err(|_| WalletError::BadDigest)?;
    Ok(Message::from_digest(digest))
}

/// Hex components may drop leading zeros; decode right-aligned.
fn decode_padded(hex_str: &str, out: &mut [u8]) -> Result<(), WalletError> {
    let padded = format!("{:0>width$}", hex_str, width = out.len() * 2);
    let bytes = hex::decode(&padded).map_err(|_| WalletError::BadSignature)?;
    if bytes.len() != out.len() {
        return Err(WalletError::BadSignature);
    }
    out.copy_from_slice(&bytes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ADDRESS_LENGTH;

    #[test]
    fn generated_wallet_has_wire_format_keys() {
        let wallet = Wallet::generate();
        assert_eq!(wallet.public_key.len(), 65);
        assert!(wallet.public_key.ends_with('0') || wallet.public_key.ends_with('1'));
        assert_eq!(wallet.address.len(), ADDRESS_LENGTH);
        assert!(wallet.address.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn private_key_round_trip_recovers_the_same_address() {
        let wallet = Wallet::generate();
        let recovered = Wallet::from_private_hex(&wallet.private_key).unwrap();
        assert_eq!(recovered.address, wallet.address);
        assert_eq!(recovered.public_key, wallet.public_key);
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let wallet = Wallet::generate();
        let draft = wallet.create_transaction("f51362b7351ef62253a227a77751ad9b2302f911", 100, 10, "").unwrap();
        assert!(verify(
            &draft.sender_pub_key,
            &draft.transaction_data_hash,
            &draft.sender_signature
        ));
    }

    #[test]
    fn verification_fails_for_a_tampered_hash() {
        let wallet = Wallet::generate();
        let draft = wallet.create_transaction("f51362b7351ef62253a227a77751ad9b2302f911", 100, 10, "").unwrap();
        let other_hash = crate::hashing::sha256_hex(b"tampered");
        assert!(!verify(&wallet.public_key, &other_hash, &draft.sender_signature));
    }

    #[test]
    fn verification_fails_for_the_wrong_key() {
        let alice = Wallet::generate();
        let mallory = Wallet::generate();
        let draft = alice.create_transaction("f51362b7351ef62253a227a77751ad9b2302f911", 100, 10, "").unwrap();
        assert!(!verify(
            &mallory.public_key,
            &draft.transaction_data_hash,
            &draft.sender_signature
        ));
    }

    #[test]
    fn zeroed_key_material_verifies_false_without_panicking() {
        let sig = ["0".repeat(64), "0".repeat(64)];
        assert!(!verify(&"0".repeat(65), &"1".repeat(64), &sig));
        assert!(!verify("short", &"1".repeat(64), &sig));
    }
}
