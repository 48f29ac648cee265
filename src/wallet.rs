use rand::rngs::OsRng;
use secp256k1::{PublicKey, Secp256k1, SecretKey};

/// A secp256k1 key pair used by demo actors to sign their transactions.
pub struct Keypair {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl Keypair {
    pub fn generate() -> Keypair {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
        Keypair {
            secret_key,
            public_key,
        }
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret_key.secret_bytes()
    }

    // compressed SEC1 encoding, 33 bytes
    pub fn public_bytes(&self) -> [u8; 33] {
        self.public_key.serialize()
    }

    pub fn public_hex(&self) -> String {
        hex::encode(self.public_bytes())
    }
}
