//! NEAR anchoring: mints batch NFTs through the ETRAP contract and exposes
//! its view surface for the verifier.
//!
//! The write path builds, signs and broadcasts real NEAR transactions; the
//! read path wraps `call_function` queries. Both sit on a small JSON-RPC
//! client.

pub mod backoff;
pub mod client;
pub mod rpc;
pub mod signer;
pub mod tx;

pub use client::{NearAnchorClient, NearViewClient, MINT_DEPOSIT, MINT_GAS};
pub use rpc::NearRpcClient;
pub use signer::NearSigner;

use async_trait::async_trait;
use etrap_evidence::anchor::{AnchorError, AnchorProvider, MintOutcome};
use etrap_evidence::model::{BatchSummary, TokenMetadata};

/// Stub provider for tests and local development: every mint "succeeds"
/// without touching a network.
#[derive(Clone)]
pub struct NearAnchorStub;

#[async_trait]
impl AnchorProvider for NearAnchorStub {
    async fn mint_batch(
        &self,
        token_id: &str,
        _receiver_id: &str,
        _token_metadata: &TokenMetadata,
        _batch_summary: &BatchSummary,
    ) -> Result<MintOutcome, AnchorError> {
        Ok(MintOutcome {
            tx_hash: format!("fake:{token_id}"),
            block_height: 1,
            gas_used: "0".to_string(),
            etrap_fee: "0".to_string(),
        })
    }
}
