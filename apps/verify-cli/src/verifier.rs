//! Progressive search and proof validation.
//!
//! The search walks hint levels in order (batch id, table, recent) and
//! stops at the first batch containing the computed hash. A hash that is
//! present but whose proof no longer reaches the anchored root is tamper
//! evidence, reported distinctly from "not found".

use std::fmt;
use std::sync::Arc;

use etrap_evidence::anchor::{AnchorError, BatchIndex};
use etrap_evidence::canonical::transaction_hash;
use etrap_evidence::merkle::verify_proof;
use etrap_evidence::model::TokenInfo;
use etrap_storage::bundle::read_batch_bundle;
use etrap_storage::ObjectStore;
use serde::Serialize;
use serde_json::Value;

const TABLE_SEARCH_LIMIT: u32 = 50;
const RECENT_SEARCH_LIMIT: u32 = 100;

#[derive(Debug, Clone, Default)]
pub struct SearchHints {
    pub batch_id: Option<String>,
    pub table: Option<String>,
    pub database: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    Verified,
    NotVerified,
    TamperEvidence,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Verified => "VERIFIED",
            Self::NotVerified => "NOT_VERIFIED",
            Self::TamperEvidence => "TAMPER_EVIDENCE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub status: VerificationStatus,
    pub verified: bool,
    pub transaction_hash: String,
    pub batches_searched: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merkle_root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_length: Option<usize>,
    /// Timestamp recorded with the token, the authoritative chain time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchored_timestamp_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Resolves the object store holding a batch's bundle, given the bucket
/// named in its on-chain summary.
pub trait StoreResolver: Send + Sync {
    fn store_for(&self, bucket: &str) -> Arc<dyn ObjectStore>;
}

pub struct Verifier {
    index: Box<dyn BatchIndex>,
    stores: Box<dyn StoreResolver>,
}

impl Verifier {
    pub fn new(index: Box<dyn BatchIndex>, stores: Box<dyn StoreResolver>) -> Self {
        Self { index, stores }
    }

    /// Compute the transaction hash of `payload` and locate the batch
    /// anchoring it, hint levels first.
    pub async fn verify(
        &self,
        payload: &Value,
        hints: &SearchHints,
    ) -> Result<VerificationReport, AnchorError> {
        let tx_hash = transaction_hash(payload);
        let mut searched = 0usize;

        if let Some(batch_id) = &hints.batch_id {
            tracing::debug!(batch_id = %batch_id, "checking hinted batch");
            if let Some(token) = self.index.nft_token(batch_id).await? {
                searched += 1;
                if let Some(report) = self.check_batch(&tx_hash, &token, searched).await {
                    return Ok(report);
                }
            }
        }

        if let Some(table) = &hints.table {
            tracing::debug!(table = %table, "searching batches by table");
            for token in self.index.batches_by_table(table, TABLE_SEARCH_LIMIT).await? {
                searched += 1;
                if let Some(report) = self.check_batch(&tx_hash, &token, searched).await {
                    return Ok(report);
                }
            }
        }

        tracing::debug!("searching recent batches");
        for token in self.index.recent_batches(RECENT_SEARCH_LIMIT).await? {
            searched += 1;
            if let Some(report) = self.check_batch(&tx_hash, &token, searched).await {
                return Ok(report);
            }
        }

        Ok(VerificationReport {
            status: VerificationStatus::NotVerified,
            verified: false,
            transaction_hash: tx_hash,
            batches_searched: searched,
            token_id: None,
            merkle_root: None,
            proof_length: None,
            anchored_timestamp_ms: None,
            operation: None,
            database: None,
            table: None,
            s3_bucket: None,
            s3_key: None,
            message: Some("transaction hash not found in any searched batch".to_string()),
        })
    }

    /// Fetch one candidate's bundle and look for the hash. `None` means
    /// "keep searching" (no match, or the bundle could not be read).
    async fn check_batch(
        &self,
        tx_hash: &str,
        token: &TokenInfo,
        searched: usize,
    ) -> Option<VerificationReport> {
        let summary = &token.batch_summary;
        let store = self.stores.store_for(&summary.s3_bucket);
        let batch = match read_batch_bundle(store.as_ref(), &summary.s3_key).await {
            Ok(batch) => batch,
            Err(err) => {
                tracing::warn!(
                    token_id = %token.token_id,
                    error = %err,
                    "cannot fetch bundle, skipping batch"
                );
                return None;
            }
        };

        let entry = batch
            .transactions
            .iter()
            .find(|entry| entry.metadata.hash == tx_hash)?;

        let mut report = VerificationReport {
            status: VerificationStatus::TamperEvidence,
            verified: false,
            transaction_hash: tx_hash.to_string(),
            batches_searched: searched,
            token_id: Some(token.token_id.clone()),
            merkle_root: Some(batch.merkle_tree.root.clone()),
            proof_length: None,
            anchored_timestamp_ms: Some(summary.timestamp),
            operation: Some(entry.metadata.operation_type.to_string()),
            database: Some(entry.metadata.database_name.clone()),
            table: Some(entry.metadata.table_affected.clone()),
            s3_bucket: Some(summary.s3_bucket.clone()),
            s3_key: Some(summary.s3_key.clone()),
            message: None,
        };

        let leaf_index = entry
            .metadata
            .transaction_id
            .rsplit('-')
            .next()
            .unwrap_or_default();
        let Some(proof) = batch.merkle_tree.proof_index.get(&format!("tx-{leaf_index}")) else {
            report.message = Some("hash is recorded but has no proof entry".to_string());
            return Some(report);
        };

        let valid = verify_proof(
            tx_hash,
            &proof.proof_path,
            &proof.sibling_positions,
            &batch.merkle_tree.root,
        );
        report.proof_length = Some(proof.proof_path.len());
        if valid {
            report.status = VerificationStatus::Verified;
            report.verified = true;
        } else {
            report.message = Some(
                "hash present but its proof no longer reaches the anchored root".to_string(),
            );
        }
        Some(report)
    }
}
