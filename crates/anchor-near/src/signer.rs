//! Ed25519 signing with NEAR credential files.

use std::path::PathBuf;

use ed25519_dalek::{Signer as _, SigningKey};
use etrap_evidence::anchor::AnchorError;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::tx::{PublicKey, Signature, SignedTransaction, Transaction};

pub struct NearSigner {
    pub account_id: String,
    signing_key: SigningKey,
}

impl NearSigner {
    /// Parse an `ed25519:`-prefixed bs58 secret key. Credential files
    /// store either the 64-byte keypair (seed then public key) or the
    /// 32-byte seed alone.
    pub fn from_secret_key(account_id: &str, secret_key: &str) -> Result<Self, AnchorError> {
        let encoded = secret_key.strip_prefix("ed25519:").unwrap_or(secret_key);
        let bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|err| AnchorError::Credentials(format!("invalid bs58 key: {err}")))?;
        let seed: [u8; 32] = match bytes.len() {
            32 | 64 => {
                let mut seed = [0u8; 32];
                seed.copy_from_slice(&bytes[..32]);
                seed
            }
            n => {
                return Err(AnchorError::Credentials(format!(
                    "unexpected secret key length {n}"
                )))
            }
        };
        Ok(Self {
            account_id: account_id.to_string(),
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    /// Load from `~/.near-credentials/{network}/{account}.json`, accepting
    /// either the `private_key` or `secret_key` field name.
    pub fn from_credentials_dir(account_id: &str, network: &str) -> Result<Self, AnchorError> {
        let home = std::env::var("HOME")
            .map_err(|_| AnchorError::Credentials("HOME is not set".to_string()))?;
        let path = PathBuf::from(home)
            .join(".near-credentials")
            .join(network)
            .join(format!("{account_id}.json"));
        let raw = std::fs::read_to_string(&path).map_err(|err| {
            AnchorError::Credentials(format!("cannot read {}: {err}", path.display()))
        })?;
        let creds: Value = serde_json::from_str(&raw).map_err(|err| {
            AnchorError::Credentials(format!("{} is not valid JSON: {err}", path.display()))
        })?;
        let secret_key = creds
            .get("private_key")
            .or_else(|| creds.get("secret_key"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AnchorError::Credentials(format!("{} has no private_key", path.display()))
            })?;
        Self::from_secret_key(account_id, secret_key)
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// `ed25519:`-prefixed bs58 public key, the RPC's preferred spelling.
    pub fn public_key_str(&self) -> String {
        format!("ed25519:{}", bs58::encode(self.public_key_bytes()).into_string())
    }

    /// Sign the sha-256 digest of the borsh-serialised transaction.
    pub fn sign_transaction(&self, transaction: &Transaction) -> Result<SignedTransaction, AnchorError> {
        let bytes = borsh::to_vec(transaction)
            .map_err(|err| AnchorError::Malformed(format!("borsh serialisation failed: {err}")))?;
        let digest = Sha256::digest(&bytes);
        let signature = self.signing_key.sign(&digest);
        Ok(SignedTransaction {
            transaction: transaction.clone(),
            signature: Signature::ed25519(signature.to_bytes()),
        })
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::ed25519(self.public_key_bytes())
    }
}
