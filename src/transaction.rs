use std::fmt;

use log::debug;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

use crate::error::ChainError;

/// A signed transfer between two identities.
///
/// The signing key is never checked against `sender`: any secp256k1 key can
/// sign a transaction claiming any sender.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct Transaction {
    // caller supplied identifier, usually a uuid
    pub id: String,
    pub sender: String,
    pub recipient: String,
    pub amount: f64,
    // hex encoded DER signature, absent until signed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Transaction {
    pub fn new(id: impl Into<String>, sender: impl Into<String>, recipient: impl Into<String>, amount: f64) -> Transaction {
        Transaction {
            id: id.into(),
            sender: sender.into(),
            recipient: recipient.into(),
            amount,
            signature: None,
        }
    }

    /// SHA-256 over sender, recipient and amount. This is what gets signed.
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.sender.as_bytes());
        hasher.update(self.recipient.as_bytes());
        hasher.update(self.amount.to_string().as_bytes());
        hasher.finalize().into()
    }

    /// Signs the transaction hash with a raw secp256k1 secret key.
    /// Re-signing overwrites any previous signature.
    pub fn sign(&mut self, private_key: &[u8]) -> Result<(), ChainError> {
        let secret_key = SecretKey::from_slice(private_key).map_err(|_| ChainError::InvalidKey)?;
        let secp = Secp256k1::signing_only();
        let message = Message::from_digest_slice(&self.hash()).map_err(|_| ChainError::InvalidKey)?;
        let signature = secp.sign_ecdsa(&message, &secret_key);
        self.signature = Some(hex::encode(signature.serialize_der()));
        debug!("signed transaction {}", self.id);
        Ok(())
    }

    /// Checks the stored signature against a serialized public key.
    ///
    /// A missing signature is an error, not an invalid transaction. A
    /// signature that cannot be decoded simply does not verify.
    pub fn verify(&self, public_key: &[u8]) -> Result<bool, ChainError> {
        let signature = self.signature.as_ref().ok_or(ChainError::MissingSignature)?;
        let public_key = PublicKey::from_slice(public_key).map_err(|_| ChainError::InvalidKey)?;
        let signature = match hex::decode(signature).ok().and_then(|bytes| Signature::from_der(&bytes).ok()) {
            Some(signature) => signature,
            None => return Ok(false),
        };
        let message = match Message::from_digest_slice(&self.hash()) {
            Ok(message) => message,
            Err(_) => return Ok(false),
        };
        let secp = Secp256k1::verification_only();
        Ok(secp.verify_ecdsa(&message, &signature, &public_key).is_ok())
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<40.40}: {:<30.30} \u{27F6} {:<30.30} | {}",
            self.id, self.sender, self.recipient, self.amount
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Keypair;

    #[test]
    fn test_sign_and_verify() {
        let keys = Keypair::generate();
        let mut tx = Transaction::new("tx-1", "alice", "bob", 50.0);
        tx.sign(&keys.secret_bytes()).unwrap();
        assert!(tx.signature.is_some());
        assert!(tx.verify(&keys.public_bytes()).unwrap());
    }

    #[test]
    fn test_tampered_amount_does_not_verify() {
        let keys = Keypair::generate();
        let mut tx = Transaction::new("tx-1", "alice", "bob", 50.0);
        tx.sign(&keys.secret_bytes()).unwrap();
        tx.amount = 5000.0;
        assert_eq!(tx.verify(&keys.public_bytes()), Ok(false));
    }

    #[test]
    fn test_wrong_public_key_does_not_verify() {
        let keys = Keypair::generate();
        let other = Keypair::generate();
        let mut tx = Transaction::new("tx-1", "alice", "bob", 50.0);
        tx.sign(&keys.secret_bytes()).unwrap();
        assert_eq!(tx.verify(&other.public_bytes()), Ok(false));
    }

    #[test]
    fn test_sign_rejects_non_ec_key() {
        let mut tx = Transaction::new("tx-1", "alice", "bob", 50.0);
        // zero is outside the curve order, short slices are not keys at all
        assert_eq!(tx.sign(&[0u8; 32]), Err(ChainError::InvalidKey));
        assert_eq!(tx.sign(b"not a key"), Err(ChainError::InvalidKey));
        assert!(tx.signature.is_none());
    }

    #[test]
    fn test_verify_unsigned_fails() {
        let keys = Keypair::generate();
        let tx = Transaction::new("tx-1", "alice", "bob", 50.0);
        assert_eq!(tx.verify(&keys.public_bytes()), Err(ChainError::MissingSignature));
    }

    #[test]
    fn test_signer_is_not_bound_to_sender() {
        let keys = Keypair::generate();
        let mut tx = Transaction::new("tx-1", "somebody else", "bob", 1.0);
        tx.sign(&keys.secret_bytes()).unwrap();
        assert!(tx.verify(&keys.public_bytes()).unwrap());
    }

    #[test]
    fn test_resign_overwrites() {
        let first = Keypair::generate();
        let second = Keypair::generate();
        let mut tx = Transaction::new("tx-1", "alice", "bob", 3.5);
        tx.sign(&first.secret_bytes()).unwrap();
        tx.sign(&second.secret_bytes()).unwrap();
        assert!(tx.verify(&second.public_bytes()).unwrap());
        assert!(!tx.verify(&first.public_bytes()).unwrap());
    }

    #[test]
    fn test_unsigned_serializes_without_signature() {
        let tx = Transaction::new("tx-1", "alice", "bob", 2.0);
        let json = serde_json::to_string(&tx).unwrap();
        assert!(!json.contains("signature"));
        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tx);
    }
}
