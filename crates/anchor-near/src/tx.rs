//! NEAR transaction wire format.
//!
//! Borsh layouts mirror nearcore's `Transaction` / `SignedTransaction`.
//! The variant order of [`Action`] fixes the borsh tag: `FunctionCall`
//! must encode as 2.

use borsh::BorshSerialize;

pub const ED25519_KEY_TYPE: u8 = 0;

#[derive(Debug, Clone, BorshSerialize)]
pub struct PublicKey {
    pub key_type: u8,
    pub data: [u8; 32],
}

impl PublicKey {
    pub fn ed25519(data: [u8; 32]) -> Self {
        Self {
            key_type: ED25519_KEY_TYPE,
            data,
        }
    }
}

#[derive(Debug, Clone, BorshSerialize)]
pub struct Signature {
    pub key_type: u8,
    pub data: [u8; 64],
}

impl Signature {
    pub fn ed25519(data: [u8; 64]) -> Self {
        Self {
            key_type: ED25519_KEY_TYPE,
            data,
        }
    }
}

#[derive(Debug, Clone, BorshSerialize)]
pub struct FunctionCallAction {
    pub method_name: String,
    pub args: Vec<u8>,
    pub gas: u64,
    pub deposit: u128,
}

/// Protocol action list. Only `FunctionCall` is ever constructed here;
/// the other variants exist to keep the wire tags aligned.
#[derive(Debug, Clone, BorshSerialize)]
pub enum Action {
    CreateAccount,
    DeployContract,
    FunctionCall(FunctionCallAction),
    Transfer,
    Stake,
    AddKey,
    DeleteKey,
    DeleteAccount,
}

#[derive(Debug, Clone, BorshSerialize)]
pub struct Transaction {
    pub signer_id: String,
    pub public_key: PublicKey,
    pub nonce: u64,
    pub receiver_id: String,
    pub block_hash: [u8; 32],
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, BorshSerialize)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub signature: Signature,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_transaction() -> Transaction {
        Transaction {
            signer_id: "etrap.testnet".to_string(),
            public_key: PublicKey::ed25519([7u8; 32]),
            nonce: 42,
            receiver_id: "contract.testnet".to_string(),
            block_hash: [9u8; 32],
            actions: vec![Action::FunctionCall(FunctionCallAction {
                method_name: "mint_batch".to_string(),
                args: b"{}".to_vec(),
                gas: 100_000_000_000_000,
                deposit: 500_000_000_000_000_000_000_000,
            })],
        }
    }

    #[test]
    fn function_call_tag_is_two() {
        let bytes = borsh::to_vec(&Action::FunctionCall(FunctionCallAction {
            method_name: String::new(),
            args: Vec::new(),
            gas: 0,
            deposit: 0,
        }))
        .unwrap();
        assert_eq!(bytes[0], 2);
    }

    #[test]
    fn strings_carry_a_little_endian_length_prefix() {
        let bytes = borsh::to_vec(&sample_transaction()).unwrap();
        // signer_id: 4-byte LE length then utf-8
        assert_eq!(&bytes[0..4], &13u32.to_le_bytes());
        assert_eq!(&bytes[4..17], b"etrap.testnet");
        // public key: 1-byte curve id then 32 raw bytes
        assert_eq!(bytes[17], ED25519_KEY_TYPE);
        assert_eq!(&bytes[18..50], &[7u8; 32]);
        // nonce: u64 LE
        assert_eq!(&bytes[50..58], &42u64.to_le_bytes());
    }

    #[test]
    fn layout_is_deterministic() {
        let first = borsh::to_vec(&sample_transaction()).unwrap();
        let second = borsh::to_vec(&sample_transaction()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn signed_transaction_appends_the_signature() {
        let tx = sample_transaction();
        let tx_bytes = borsh::to_vec(&tx).unwrap();
        let signed = SignedTransaction {
            transaction: tx,
            signature: Signature::ed25519([3u8; 64]),
        };
        let signed_bytes = borsh::to_vec(&signed).unwrap();
        assert_eq!(&signed_bytes[..tx_bytes.len()], &tx_bytes[..]);
        assert_eq!(signed_bytes.len(), tx_bytes.len() + 1 + 64);
        assert_eq!(signed_bytes[tx_bytes.len()], ED25519_KEY_TYPE);
    }
}
