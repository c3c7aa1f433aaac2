//! Chain-facing trait seams.
//!
//! The agent mints through [`AnchorProvider`]; the verifier reads the
//! contract's batch index through [`BatchIndex`]. Concrete NEAR
//! implementations live in the `anchor-near` crate; tests substitute
//! stubs.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{BatchSummary, TokenInfo, TokenMetadata};

#[derive(Debug, Error)]
pub enum AnchorError {
    #[error("network error: {0}")]
    Network(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("chain execution failed: {0}")]
    Execution(String),
    #[error("token {0} already exists")]
    TokenExists(String),
    #[error("credentials error: {0}")]
    Credentials(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl AnchorError {
    /// Terminal errors are never retried: the token already exists or no
    /// amount of retrying will produce a signature.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TokenExists(_) | Self::Credentials(_))
    }
}

/// Result of a successful `mint_batch` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintOutcome {
    pub tx_hash: String,
    pub block_height: u64,
    pub gas_used: String,
    pub etrap_fee: String,
}

/// Write side: anchor one batch on the chain.
#[async_trait]
pub trait AnchorProvider: Send + Sync {
    async fn mint_batch(
        &self,
        token_id: &str,
        receiver_id: &str,
        token_metadata: &TokenMetadata,
        batch_summary: &BatchSummary,
    ) -> Result<MintOutcome, AnchorError>;
}

/// Read side: the subset of the contract's view surface the progressive
/// search needs.
#[async_trait]
pub trait BatchIndex: Send + Sync {
    async fn nft_token(&self, token_id: &str) -> Result<Option<TokenInfo>, AnchorError>;
    async fn batches_by_table(&self, table_name: &str, limit: u32)
        -> Result<Vec<TokenInfo>, AnchorError>;
    async fn recent_batches(&self, limit: u32) -> Result<Vec<TokenInfo>, AnchorError>;
}
