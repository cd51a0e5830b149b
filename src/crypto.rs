//! Cryptographic primitives for LedgerChain

use crate::error::LedgerError;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{
    constants::{COMPACT_SIGNATURE_SIZE, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE},
    ecdsa::Signature as EcdsaSignature,
    All, Message, PublicKey, Secp256k1, SecretKey,
};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// A thread-safe, lazily initialized Secp256k1 context.
static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Account number: lowercase hex of the compressed secp256k1 public key.
///
/// The account number doubles as the account's initial balance lock.
pub type AccountNumber = String;

/// Lowercase hex SHA-256 digest.
pub type Hash = String;

/// Lowercase hex of a compact ECDSA signature.
pub type Signature = String;

/// Hex length of an account number (33-byte compressed key).
pub const ACCOUNT_NUMBER_HEX_LENGTH: usize = PUBLIC_KEY_SIZE * 2;

/// Returns true when `value` has the shape of an account number.
pub fn is_valid_account_number(value: &str) -> bool {
    value.len() == ACCOUNT_NUMBER_HEX_LENGTH
        && value.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

/// SHA-256 of raw bytes, hex encoded.
pub fn hash_bytes(bytes: &[u8]) -> Hash {
    hex::encode(Sha256::digest(bytes))
}

/// Deterministic content hash of any serializable value.
///
/// Values are normalized with bincode before hashing; every map that takes
/// part in hashing is a `BTreeMap`, so the encoding is stable.
pub fn hash_normalized<T: Serialize + ?Sized>(value: &T) -> Result<Hash, LedgerError> {
    let bytes = bincode::serialize(value)?;
    Ok(hash_bytes(&bytes))
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generates a new random KeyPair using the OS random number generator.
    pub fn generate() -> Result<Self, LedgerError> {
        let secret_key = SecretKey::new(&mut OsRng);
        Ok(Self::from_secret_key(secret_key))
    }

    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        KeyPair {
            secret_key,
            public_key,
        }
    }

    /// Creates a KeyPair from raw secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, LedgerError> {
        let secret_key = SecretKey::from_slice(bytes).map_err(|e| {
            if bytes.len() != SECRET_KEY_SIZE {
                LedgerError::Crypto(format!(
                    "Secret key must be {} bytes, got {}",
                    SECRET_KEY_SIZE,
                    bytes.len()
                ))
            } else {
                LedgerError::Crypto(format!("Invalid secret key bytes: {}", e))
            }
        })?;

        Ok(Self::from_secret_key(secret_key))
    }

    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, LedgerError> {
        let bytes = hex::decode(secret_hex.trim())
            .map_err(|e| LedgerError::Crypto(format!("Invalid secret key hex: {}", e)))?;
        Self::from_secret_bytes(&bytes)
    }

    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// The account number controlled by this key pair.
    pub fn account_number(&self) -> AccountNumber {
        hex::encode(self.public_key.serialize())
    }

    /// Signs a message (SHA-256 digest first) and returns the hex compact signature.
    pub fn sign(&self, message: &[u8]) -> Result<Signature, LedgerError> {
        let digest = Sha256::digest(message);
        let message = Message::from_digest_slice(&digest)
            .map_err(|e| LedgerError::Crypto(format!("Failed to create message: {}", e)))?;

        let signature = SECP256K1_CONTEXT.sign_ecdsa(&message, &self.secret_key);
        Ok(hex::encode(signature.serialize_compact()))
    }
}

/// Verifies a hex signature made by the key behind `account_number`.
pub fn verify_signature(
    account_number: &str,
    message: &[u8],
    signature: &str,
) -> Result<(), LedgerError> {
    let public_key_bytes = hex::decode(account_number)
        .map_err(|e| LedgerError::Crypto(format!("Invalid account number hex: {}", e)))?;
    if public_key_bytes.len() != PUBLIC_KEY_SIZE {
        return Err(LedgerError::Crypto(format!(
            "Public key must be exactly {} bytes (compressed), got {}",
            PUBLIC_KEY_SIZE,
            public_key_bytes.len()
        )));
    }

    let signature_bytes = hex::decode(signature)
        .map_err(|e| LedgerError::Crypto(format!("Invalid signature hex: {}", e)))?;
    if signature_bytes.len() != COMPACT_SIGNATURE_SIZE {
        return Err(LedgerError::Crypto(format!(
            "Signature must be exactly {} bytes (compact), got {}",
            COMPACT_SIGNATURE_SIZE,
            signature_bytes.len()
        )));
    }

    let public_key = PublicKey::from_slice(&public_key_bytes)
        .map_err(|e| LedgerError::Crypto(format!("Invalid public key: {}", e)))?;

    let digest = Sha256::digest(message);
    let message = Message::from_digest_slice(&digest)
        .map_err(|e| LedgerError::Crypto(format!("Failed to create message: {}", e)))?;

    let signature = EcdsaSignature::from_compact(&signature_bytes)
        .map_err(|e| LedgerError::Crypto(format!("Invalid signature: {}", e)))?;

    SECP256K1_CONTEXT
        .verify_ecdsa(&message, &signature, &public_key)
        .map_err(|_| LedgerError::Crypto("Signature verification failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_number_shape() {
        let keypair = KeyPair::generate().unwrap();
        let account_number = keypair.account_number();
        assert_eq!(account_number.len(), ACCOUNT_NUMBER_HEX_LENGTH);
        assert!(is_valid_account_number(&account_number));
        assert!(!is_valid_account_number(&account_number[2..]));
        assert!(!is_valid_account_number(&account_number.to_uppercase()));
    }

    #[test]
    fn test_secret_hex_round_trip_keeps_account() {
        let keypair = KeyPair::generate().unwrap();
        let restored = KeyPair::from_secret_hex(&keypair.secret_key_hex()).unwrap();
        assert_eq!(keypair.account_number(), restored.account_number());
    }

    #[test]
    fn test_signing_and_verification() {
        let keypair = KeyPair::generate().unwrap();
        let message = b"Hello, LedgerChain!";

        let signature = keypair.sign(message).unwrap();
        assert_eq!(signature.len(), COMPACT_SIGNATURE_SIZE * 2);
        assert!(verify_signature(&keypair.account_number(), message, &signature).is_ok());
    }

    #[test]
    fn test_invalid_signature() {
        let keypair1 = KeyPair::generate().unwrap();
        let keypair2 = KeyPair::generate().unwrap();

        let message = b"Test message";
        let signature = keypair1.sign(message).unwrap();

        let result = verify_signature(&keypair2.account_number(), message, &signature);
        assert_eq!(
            result.unwrap_err().to_string(),
            "Cryptographic error: Signature verification failed"
        );
    }

    #[test]
    fn test_tampered_message() {
        let keypair = KeyPair::generate().unwrap();
        let signature = keypair.sign(b"Original message").unwrap();

        let result = verify_signature(&keypair.account_number(), b"Tampered message", &signature);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_key_or_sig_length_check() {
        let keypair = KeyPair::generate().unwrap();
        let message = b"Test";
        let signature = keypair.sign(message).unwrap();
        let account_number = keypair.account_number();

        let result = verify_signature(&account_number[2..], message, &signature);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Public key must be exactly"));

        let result = verify_signature(&account_number, message, &signature[2..]);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Signature must be exactly"));
    }

    #[test]
    fn test_from_secret_bytes_invalid_length() {
        let short_bytes = [0u8; SECRET_KEY_SIZE - 1];
        let result = KeyPair::from_secret_bytes(&short_bytes);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Secret key must be"));
    }

    #[test]
    fn test_hash_normalized_is_deterministic() {
        let mut a = std::collections::BTreeMap::new();
        a.insert("b".to_string(), 2u64);
        a.insert("a".to_string(), 1u64);
        let mut b = std::collections::BTreeMap::new();
        b.insert("a".to_string(), 1u64);
        b.insert("b".to_string(), 2u64);

        assert_eq!(hash_normalized(&a).unwrap(), hash_normalized(&b).unwrap());
        assert_eq!(hash_normalized(&a).unwrap().len(), 64);
    }
}
