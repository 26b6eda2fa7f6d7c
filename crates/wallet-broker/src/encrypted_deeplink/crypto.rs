//! NaCl box for deeplink payloads
//!
//! X25519 key agreement with XSalsa20-Poly1305. Keys, nonces and ciphertext
//! travel base58-encoded in URL query parameters.

use crypto_box::aead::Aead;
use crypto_box::{Nonce, PublicKey, SalsaBox, SecretKey};
use serde_json::Value;
use wallet_broker_core::{Result, WalletError};

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 24;

/// Ephemeral keypair generated for one connection
pub struct DappKeyPair {
    secret: SecretKey,
}

impl DappKeyPair {
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::from(rand::random::<[u8; KEY_SIZE]>()),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret.public_key()
    }

    pub fn public_key_base58(&self) -> String {
        bs58::encode(self.public_key().as_bytes()).into_string()
    }

    /// Derive the box shared with the peer owning `peer_public_key` (base58)
    pub fn shared_secret(&self, peer_public_key: &str) -> Result<SharedSecret> {
        let bytes: [u8; KEY_SIZE] = decode_base58(peer_public_key, "public key")?
            .try_into()
            .map_err(|_| WalletError::unexpected("Wallet public key has the wrong length"))?;
        Ok(SharedSecret(SalsaBox::new(&PublicKey::from(bytes), &self.secret)))
    }
}

impl std::fmt::Debug for DappKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DappKeyPair")
            .field("public_key", &self.public_key_base58())
            .finish_non_exhaustive()
    }
}

/// Box shared with the wallet for the lifetime of a session
pub struct SharedSecret(SalsaBox);

/// Encrypted JSON payload ready for a URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    pub nonce: String,
    pub payload: String,
}

impl SharedSecret {
    /// Encrypt `value` as JSON under a fresh random nonce
    pub fn seal(&self, value: &Value) -> Result<SealedPayload> {
        let nonce = Nonce::from(rand::random::<[u8; NONCE_SIZE]>());
        let plaintext = serde_json::to_vec(value)?;
        let ciphertext = self
            .0
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|_| WalletError::unexpected("Failed to encrypt payload"))?;
        Ok(SealedPayload {
            nonce: bs58::encode(nonce.as_slice()).into_string(),
            payload: bs58::encode(ciphertext).into_string(),
        })
    }

    /// Decrypt a base58 payload with the nonce that accompanied it
    pub fn open(&self, nonce: &str, data: &str) -> Result<Value> {
        let nonce: [u8; NONCE_SIZE] = decode_base58(nonce, "nonce")?
            .try_into()
            .map_err(|_| WalletError::unexpected("Nonce has the wrong length"))?;
        let ciphertext = decode_base58(data, "payload")?;
        let plaintext = self
            .0
            .decrypt(&Nonce::from(nonce), ciphertext.as_slice())
            .map_err(|_| WalletError::unexpected("Failed to decrypt payload"))?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

fn decode_base58(value: &str, what: &str) -> Result<Vec<u8>> {
    bs58::decode(value)
        .into_vec()
        .map_err(|e| WalletError::unexpected(format!("Invalid base58 {what}: {e}")))
}
