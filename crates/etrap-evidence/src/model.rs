//! Data model shared by the agent, the object-store bundles and the
//! verifier. Field names follow the on-disk bundle schema; all hashes are
//! lowercase hex.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::merkle::MerkleTree;

/// Row-level mutation kind, mapped from the CDC operation codes
/// `c`/`u`/`d`/`r`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
    Snapshot,
}

impl Operation {
    pub fn from_cdc_code(code: &str) -> Option<Self> {
        match code {
            "c" => Some(Self::Insert),
            "u" => Some(Self::Update),
            "d" => Some(Self::Delete),
            "r" => Some(Self::Snapshot),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Snapshot => "SNAPSHOT",
        };
        f.write_str(name)
    }
}

/// Source descriptor carried by every CDC message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    #[serde(default = "default_db")]
    pub db: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default)]
    pub ts_ms: Option<i64>,
    #[serde(default)]
    pub lsn: Option<i64>,
    #[serde(default, rename = "txId")]
    pub tx_id: Option<Value>,
    #[serde(default)]
    pub user: Option<String>,
}

impl Default for SourceInfo {
    fn default() -> Self {
        Self {
            db: default_db(),
            schema: default_schema(),
            table: default_table(),
            ts_ms: None,
            lsn: None,
            tx_id: None,
            user: None,
        }
    }
}

fn default_db() -> String {
    "unknown".to_string()
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_table() -> String {
    "unknown".to_string()
}

/// One normalised change event, alive from consume until its flush is
/// packaged.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub stream: String,
    pub message_id: String,
    pub operation: Operation,
    pub key: Value,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub source: SourceInfo,
    pub timestamp_ms: i64,
}

impl ChangeEvent {
    /// The image whose hash anchors the event: `before` for DELETE,
    /// `after` otherwise.
    pub fn row_payload(&self) -> Option<&Value> {
        match self.operation {
            Operation::Delete => self.before.as_ref(),
            _ => self.after.as_ref(),
        }
    }
}

/// Per-event counters; exactly one of the three is 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowsAffected {
    pub inserted: u32,
    pub updated: u32,
    pub deleted: u32,
}

impl RowsAffected {
    pub fn for_operation(operation: Operation) -> Self {
        match operation {
            Operation::Insert | Operation::Snapshot => Self { inserted: 1, ..Self::default() },
            Operation::Update => Self { updated: 1, ..Self::default() },
            Operation::Delete => Self { deleted: 1, ..Self::default() },
        }
    }
}

/// The spec'd Transaction Record. Carries no row data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionMetadata {
    pub transaction_id: String,
    pub timestamp: i64,
    pub operation_type: Operation,
    pub database_name: String,
    pub table_affected: String,
    pub rows_affected: RowsAffected,
    pub hash: String,
    pub user_id: String,
    pub lsn: Option<i64>,
    pub transaction_db_id: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleLeafRef {
    pub index: usize,
    pub hash: String,
    pub raw_data_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataLocation {
    pub encrypted: bool,
    pub storage_path: String,
    pub retention_expires: Option<String>,
}

/// One entry of a packaged batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionEntry {
    pub metadata: TransactionMetadata,
    pub merkle_leaf: MerkleLeafRef,
    pub data_location: DataLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchInfo {
    pub batch_id: String,
    pub created_at: i64,
    pub organization_id: String,
    pub database_name: String,
    pub etrap_agent_version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchIndices {
    pub by_timestamp: BTreeMap<String, Vec<String>>,
    pub by_operation: BTreeMap<String, Vec<String>>,
    pub by_date: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceInfo {
    pub rules_applied: Vec<String>,
    pub data_classifications: Vec<String>,
    pub retention_policy: String,
    pub compliance_checks: Vec<Value>,
}

impl Default for ComplianceInfo {
    fn default() -> Self {
        Self {
            rules_applied: vec!["SOX".to_string(), "GDPR".to_string()],
            data_classifications: vec!["financial".to_string()],
            retention_policy: "indefinite".to_string(),
            compliance_checks: Vec::new(),
        }
    }
}

/// Chain anchoring record; zeroed until a mint succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchoringData {
    pub block_height: u64,
    pub tx_hash: String,
    pub gas_used: String,
    pub etrap_fee: String,
}

impl Default for AnchoringData {
    fn default() -> Self {
        Self {
            block_height: 0,
            tx_hash: String::new(),
            gas_used: "0".to_string(),
            etrap_fee: "0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationInfo {
    pub batch_signature: String,
    pub signing_algorithm: String,
    pub signer_public_key: String,
    pub attestations: Vec<Value>,
    pub anchoring_data: AnchoringData,
}

/// The full bundle written to `batch-data.json`; immutable once stored
/// apart from `verification.anchoring_data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub batch_info: BatchInfo,
    pub transactions: Vec<TransactionEntry>,
    pub merkle_tree: MerkleTree,
    pub indices: BatchIndices,
    pub compliance: ComplianceInfo,
    pub verification: VerificationInfo,
}

impl Batch {
    /// The table this batch is scoped to.
    pub fn table_name(&self) -> &str {
        self.transactions
            .first()
            .map(|entry| entry.metadata.table_affected.as_str())
            .unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationCounts {
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
}

/// Contract-side summary stored with the minted token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub database_name: String,
    pub table_names: Vec<String>,
    /// Earliest contained transaction timestamp (ms); the authoritative
    /// anchoring time reported by the verifier.
    pub timestamp: i64,
    pub tx_count: u64,
    pub merkle_root: String,
    pub s3_bucket: String,
    /// Key prefix ending `/`.
    pub s3_key: String,
    pub size_bytes: u64,
    pub operation_counts: OperationCounts,
}

/// NEP-177 style token metadata for the batch NFT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub title: String,
    pub description: String,
    pub media: Option<String>,
    pub media_hash: Option<String>,
    pub copies: u32,
    pub issued_at: Option<String>,
    pub expires_at: Option<String>,
    pub starts_at: Option<String>,
    pub updated_at: Option<String>,
    pub extra: Option<String>,
    pub reference: Option<String>,
    pub reference_hash: Option<String>,
}

/// Token view returned by the contract's read methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    pub token_id: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    pub batch_summary: BatchSummary,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operation_codes_map_like_the_wire() {
        assert_eq!(Operation::from_cdc_code("c"), Some(Operation::Insert));
        assert_eq!(Operation::from_cdc_code("u"), Some(Operation::Update));
        assert_eq!(Operation::from_cdc_code("d"), Some(Operation::Delete));
        assert_eq!(Operation::from_cdc_code("r"), Some(Operation::Snapshot));
        assert_eq!(Operation::from_cdc_code("x"), None);
    }

    #[test]
    fn operation_serialises_uppercase() {
        assert_eq!(serde_json::to_value(Operation::Insert).unwrap(), json!("INSERT"));
        assert_eq!(Operation::Delete.to_string(), "DELETE");
    }

    #[test]
    fn rows_affected_marks_exactly_one_counter() {
        for operation in [
            Operation::Insert,
            Operation::Update,
            Operation::Delete,
            Operation::Snapshot,
        ] {
            let rows = RowsAffected::for_operation(operation);
            assert_eq!(rows.inserted + rows.updated + rows.deleted, 1, "{operation}");
        }
    }

    #[test]
    fn source_info_fills_missing_fields() {
        let source: SourceInfo = serde_json::from_value(json!({"db": "prod"})).unwrap();
        assert_eq!(source.db, "prod");
        assert_eq!(source.schema, "public");
        assert_eq!(source.table, "unknown");
        assert!(source.lsn.is_none());
    }

    #[test]
    fn source_info_ignores_connector_noise() {
        let source: SourceInfo = serde_json::from_value(json!({
            "db": "prod", "schema": "public", "table": "accounts",
            "ts_ms": 1749877844134_i64, "lsn": 12345, "txId": 987,
            "connector": "postgresql", "version": "2.5"
        }))
        .unwrap();
        assert_eq!(source.table, "accounts");
        assert_eq!(source.ts_ms, Some(1749877844134));
        assert_eq!(source.tx_id, Some(json!(987)));
    }

    #[test]
    fn delete_payload_is_the_before_image() {
        let event = ChangeEvent {
            stream: "etrap.public.accounts".to_string(),
            message_id: "1-0".to_string(),
            operation: Operation::Delete,
            key: json!({"id": 1}),
            before: Some(json!({"id": 1, "name": "gone"})),
            after: None,
            source: SourceInfo::default(),
            timestamp_ms: 0,
        };
        assert_eq!(event.row_payload(), Some(&json!({"id": 1, "name": "gone"})));
    }

    #[test]
    fn anchoring_data_defaults_to_zeroed() {
        let zeroed = AnchoringData::default();
        assert_eq!(zeroed.block_height, 0);
        assert!(zeroed.tx_hash.is_empty());
        assert_eq!(zeroed.gas_used, "0");
        assert_eq!(zeroed.etrap_fee, "0");
    }
}
