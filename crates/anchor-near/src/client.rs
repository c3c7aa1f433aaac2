//! Anchor client: mints batch NFTs and reads the contract's batch index.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use etrap_evidence::anchor::{AnchorError, AnchorProvider, BatchIndex, MintOutcome};
use etrap_evidence::model::{BatchSummary, TokenInfo, TokenMetadata};
use regex::Regex;
use serde_json::{json, Value};

use crate::backoff::with_retries;
use crate::rpc::NearRpcClient;
use crate::signer::NearSigner;
use crate::tx::{Action, FunctionCallAction, Transaction};

/// Fixed gas budget for `mint_batch`: 100 TGas.
pub const MINT_GAS: u64 = 100_000_000_000_000;

/// Fixed attached stake for `mint_batch`: 0.5 NEAR.
pub const MINT_DEPOSIT: u128 = 500_000_000_000_000_000_000_000;

const MINT_ATTEMPTS: u32 = 3;
const MINT_BACKOFF_BASE: Duration = Duration::from_secs(2);
const MINT_BACKOFF_FACTOR: u32 = 2;

/// Read-only client over the contract's view surface.
#[derive(Debug, Clone)]
pub struct NearViewClient {
    rpc: NearRpcClient,
    contract_id: String,
}

impl NearViewClient {
    pub fn new(rpc: NearRpcClient, contract_id: impl Into<String>) -> Self {
        Self {
            rpc,
            contract_id: contract_id.into(),
        }
    }

    pub fn contract_id(&self) -> &str {
        &self.contract_id
    }

    async fn view(&self, method: &str, args: Value) -> Result<Value, AnchorError> {
        self.rpc.view_function(&self.contract_id, method, &args).await
    }

    async fn view_tokens(&self, method: &str, args: Value) -> Result<Vec<TokenInfo>, AnchorError> {
        let value = self.view(method, args).await?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(value)
            .map_err(|err| AnchorError::Malformed(format!("{method} returned unexpected JSON: {err}")))
    }

    pub async fn nft_token(&self, token_id: &str) -> Result<Option<TokenInfo>, AnchorError> {
        let value = self.view("nft_token", json!({"token_id": token_id})).await?;
        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|err| AnchorError::Malformed(format!("nft_token returned unexpected JSON: {err}")))
    }

    pub async fn get_batches_by_database(
        &self,
        database: &str,
        from_index: u64,
        limit: u32,
    ) -> Result<Vec<TokenInfo>, AnchorError> {
        self.view_tokens(
            "get_batches_by_database",
            json!({"database": database, "from_index": from_index, "limit": limit}),
        )
        .await
    }

    pub async fn get_batches_by_table(
        &self,
        table_name: &str,
        limit: u32,
    ) -> Result<Vec<TokenInfo>, AnchorError> {
        self.view_tokens(
            "get_batches_by_table",
            json!({"table_name": table_name, "limit": limit}),
        )
        .await
    }

    pub async fn get_batches_by_time_range(
        &self,
        start_ms: i64,
        end_ms: i64,
        database: Option<&str>,
        limit: u32,
    ) -> Result<Vec<TokenInfo>, AnchorError> {
        self.view_tokens(
            "get_batches_by_time_range",
            json!({"start_ms": start_ms, "end_ms": end_ms, "database": database, "limit": limit}),
        )
        .await
    }

    pub async fn get_recent_batches(&self, limit: u32) -> Result<Vec<TokenInfo>, AnchorError> {
        self.view_tokens("get_recent_batches", json!({"limit": limit})).await
    }

    pub async fn get_batch_summary(
        &self,
        token_id: &str,
    ) -> Result<Option<BatchSummary>, AnchorError> {
        let value = self.view("get_batch_summary", json!({"token_id": token_id})).await?;
        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value(value).map(Some).map_err(|err| {
            AnchorError::Malformed(format!("get_batch_summary returned unexpected JSON: {err}"))
        })
    }

    pub async fn get_batch_stats(&self) -> Result<Value, AnchorError> {
        self.view("get_batch_stats", json!({})).await
    }

    /// Pure contract-side root computation, for cross-checks.
    pub async fn compute_merkle_root(
        &self,
        transaction_hashes: &[String],
        use_sha256: bool,
    ) -> Result<String, AnchorError> {
        let value = self
            .view(
                "compute_merkle_root",
                json!({"transaction_hashes": transaction_hashes, "use_sha256": use_sha256}),
            )
            .await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AnchorError::Malformed("compute_merkle_root returned no string".to_string()))
    }
}

#[async_trait]
impl BatchIndex for NearViewClient {
    async fn nft_token(&self, token_id: &str) -> Result<Option<TokenInfo>, AnchorError> {
        NearViewClient::nft_token(self, token_id).await
    }

    async fn batches_by_table(
        &self,
        table_name: &str,
        limit: u32,
    ) -> Result<Vec<TokenInfo>, AnchorError> {
        self.get_batches_by_table(table_name, limit).await
    }

    async fn recent_batches(&self, limit: u32) -> Result<Vec<TokenInfo>, AnchorError> {
        self.get_recent_batches(limit).await
    }
}

/// Write client: owns a signer and mints through the contract.
pub struct NearAnchorClient {
    rpc: NearRpcClient,
    signer: NearSigner,
    contract_id: String,
}

impl NearAnchorClient {
    pub fn new(rpc: NearRpcClient, signer: NearSigner, contract_id: impl Into<String>) -> Self {
        Self {
            rpc,
            signer,
            contract_id: contract_id.into(),
        }
    }

    pub fn view_client(&self) -> NearViewClient {
        NearViewClient::new(self.rpc.clone(), self.contract_id.clone())
    }

    /// Build, sign and broadcast one change call against the contract.
    async fn function_call(
        &self,
        method: &str,
        args: &Value,
        gas: u64,
        deposit: u128,
    ) -> Result<Value, AnchorError> {
        let public_key = self.signer.public_key_str();
        let nonce = self
            .rpc
            .access_key_nonce(&self.signer.account_id, &public_key)
            .await?
            + 1;
        let block_hash = decode_block_hash(&self.rpc.latest_block_hash().await?)?;
        let args_bytes = serde_json::to_vec(args)
            .map_err(|err| AnchorError::Malformed(format!("cannot encode call args: {err}")))?;

        let transaction = Transaction {
            signer_id: self.signer.account_id.clone(),
            public_key: self.signer.public_key(),
            nonce,
            receiver_id: self.contract_id.clone(),
            block_hash,
            actions: vec![Action::FunctionCall(FunctionCallAction {
                method_name: method.to_string(),
                args: args_bytes,
                gas,
                deposit,
            })],
        };
        let signed = self.signer.sign_transaction(&transaction)?;
        let payload = borsh::to_vec(&signed)
            .map_err(|err| AnchorError::Malformed(format!("borsh serialisation failed: {err}")))?;
        self.rpc.broadcast_tx_commit(&BASE64.encode(payload)).await
    }

    /// Single mint attempt; the retry wrapper below is what the agent uses.
    pub async fn mint_batch_once(
        &self,
        token_id: &str,
        receiver_id: &str,
        token_metadata: &TokenMetadata,
        batch_summary: &BatchSummary,
    ) -> Result<MintOutcome, AnchorError> {
        let args = json!({
            "token_id": token_id,
            "receiver_id": receiver_id,
            "token_metadata": token_metadata,
            "batch_summary": batch_summary,
        });
        let outcome = self
            .function_call("mint_batch", &args, MINT_GAS, MINT_DEPOSIT)
            .await?;
        check_execution_status(token_id, &outcome)?;

        let tx_hash = outcome
            .pointer("/transaction/hash")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let gas_used = outcome
            .pointer("/transaction_outcome/outcome/gas_burnt")
            .and_then(Value::as_u64)
            .unwrap_or(0)
            .to_string();
        let etrap_fee = extract_etrap_fee(&collect_logs(&outcome));

        // The mint already landed; a failed height lookup must not fail
        // the call and trigger a re-mint.
        let block_height = match outcome
            .pointer("/transaction_outcome/block_hash")
            .and_then(Value::as_str)
        {
            Some(block_hash) => match self.rpc.block_height(block_hash).await {
                Ok(height) => height,
                Err(err) => {
                    tracing::warn!(error = %err, "cannot resolve anchoring block height");
                    0
                }
            },
            None => 0,
        };

        Ok(MintOutcome {
            tx_hash,
            block_height,
            gas_used,
            etrap_fee,
        })
    }
}

#[async_trait]
impl AnchorProvider for NearAnchorClient {
    async fn mint_batch(
        &self,
        token_id: &str,
        receiver_id: &str,
        token_metadata: &TokenMetadata,
        batch_summary: &BatchSummary,
    ) -> Result<MintOutcome, AnchorError> {
        with_retries(MINT_ATTEMPTS, MINT_BACKOFF_BASE, MINT_BACKOFF_FACTOR, |attempt| {
            if attempt > 0 {
                tracing::info!(token_id, attempt = attempt + 1, "minting NFT");
            }
            self.mint_batch_once(token_id, receiver_id, token_metadata, batch_summary)
        })
        .await
    }
}

fn decode_block_hash(encoded: &str) -> Result<[u8; 32], AnchorError> {
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|err| AnchorError::Malformed(format!("invalid block hash: {err}")))?;
    if bytes.len() != 32 {
        return Err(AnchorError::Malformed(format!(
            "block hash has {} bytes",
            bytes.len()
        )));
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes);
    Ok(hash)
}

/// Inspect a `broadcast_tx_commit` outcome for an execution failure. A
/// duplicate-token panic maps to the terminal `TokenExists`.
fn check_execution_status(token_id: &str, outcome: &Value) -> Result<(), AnchorError> {
    let Some(status) = outcome.get("status") else {
        return Err(AnchorError::Malformed(
            "transaction outcome missing status".to_string(),
        ));
    };
    if status.get("SuccessValue").is_some() || status.get("SuccessReceiptId").is_some() {
        return Ok(());
    }
    let detail = status
        .get("Failure")
        .map(Value::to_string)
        .unwrap_or_else(|| status.to_string());
    if detail.to_lowercase().contains("already exist") {
        return Err(AnchorError::TokenExists(token_id.to_string()));
    }
    Err(AnchorError::Execution(detail))
}

/// All log lines across the transaction and receipt outcomes.
fn collect_logs(outcome: &Value) -> Vec<String> {
    let mut logs = Vec::new();
    let mut push_from = |value: Option<&Value>| {
        if let Some(items) = value.and_then(Value::as_array) {
            logs.extend(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string),
            );
        }
    };
    push_from(outcome.pointer("/transaction_outcome/outcome/logs"));
    if let Some(receipts) = outcome.get("receipts_outcome").and_then(Value::as_array) {
        for receipt in receipts {
            push_from(receipt.pointer("/outcome/logs"));
        }
    }
    logs
}

/// Pull the fee out of contract log lines of the form
/// `..."etrap_fee":"<digits>"...`.
fn extract_etrap_fee(logs: &[String]) -> String {
    let Ok(pattern) = Regex::new(r#""etrap_fee":"(\d+)""#) else {
        return "0".to_string();
    };
    for line in logs {
        if let Some(captures) = pattern.captures(line) {
            if let Some(fee) = captures.get(1) {
                return fee.as_str().to_string();
            }
        }
    }
    "0".to_string()
}
