//! Assembly of immutable batch bundles from event partitions.

use chrono::{DateTime, Utc};
use etrap_evidence::canonical::{canonical_json, transaction_hash};
use etrap_evidence::hash::sha256_hex;
use etrap_evidence::merkle::{MerkleError, MerkleTree};
use etrap_evidence::model::{
    AnchoringData, Batch, BatchIndices, BatchInfo, BatchSummary, ChangeEvent, ComplianceInfo,
    DataLocation, MerkleLeafRef, Operation, OperationCounts, RowsAffected, TokenMetadata,
    TransactionEntry, TransactionMetadata, VerificationInfo,
};
use serde_json::{json, Value};
use uuid::Uuid;

pub struct BatchPackager {
    organization_id: String,
    bucket: String,
}

impl BatchPackager {
    pub fn new(organization_id: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            bucket: bucket.into(),
        }
    }

    /// Fresh base batch id: `BATCH-YYYY-MM-DD-{8 hex}` (UTC date).
    pub fn new_base_batch_id(&self) -> String {
        let date = Utc::now().format("%Y-%m-%d");
        let unique = Uuid::new_v4().simple().to_string();
        format!("BATCH-{date}-{}", &unique[..8])
    }

    /// Convert one `(database, table)` partition into the immutable batch
    /// structure: transaction records, Merkle tree, lookup indices and the
    /// verification block (anchoring data zeroed until a mint succeeds).
    pub fn package(
        &self,
        batch_id: &str,
        database: &str,
        table: &str,
        events: &[ChangeEvent],
    ) -> Result<Batch, MerkleError> {
        let created_at = Utc::now().timestamp_millis();
        let mut transactions = Vec::with_capacity(events.len());
        let mut leaf_hashes = Vec::with_capacity(events.len());

        for (idx, event) in events.iter().enumerate() {
            let tx_hash = transaction_hash(&hash_input(event));
            let raw_event = json!({
                "stream": event.stream,
                "message_id": event.message_id,
                "operation": event.operation,
                "key": event.key,
                "before": event.before,
                "after": event.after,
            });
            let raw_data_hash = sha256_hex(canonical_json(&raw_event).as_bytes());

            transactions.push(TransactionEntry {
                metadata: TransactionMetadata {
                    transaction_id: format!("{batch_id}-{idx}"),
                    timestamp: event.timestamp_ms,
                    operation_type: event.operation,
                    database_name: database.to_string(),
                    table_affected: table.to_string(),
                    rows_affected: RowsAffected::for_operation(event.operation),
                    hash: tx_hash.clone(),
                    user_id: event
                        .source
                        .user
                        .clone()
                        .unwrap_or_else(|| "system".to_string()),
                    lsn: event.source.lsn,
                    transaction_db_id: event.source.tx_id.clone(),
                },
                merkle_leaf: MerkleLeafRef {
                    index: idx,
                    hash: tx_hash.clone(),
                    raw_data_hash,
                },
                data_location: DataLocation {
                    encrypted: false,
                    storage_path: format!(
                        "{database}/{table}/{batch_id}/transactions/tx-{idx}.json"
                    ),
                    retention_expires: None,
                },
            });
            leaf_hashes.push(tx_hash);
        }

        let merkle_tree = MerkleTree::build(&leaf_hashes)?;
        let indices = build_indices(&transactions);
        let batch_signature = sha256_hex(format!("{batch_id}{}", merkle_tree.root).as_bytes());

        Ok(Batch {
            batch_info: BatchInfo {
                batch_id: batch_id.to_string(),
                created_at,
                organization_id: self.organization_id.clone(),
                database_name: database.to_string(),
                etrap_agent_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            transactions,
            merkle_tree,
            indices,
            compliance: ComplianceInfo::default(),
            verification: VerificationInfo {
                batch_signature,
                signing_algorithm: "sha256".to_string(),
                signer_public_key: "etrap-agent-key".to_string(),
                attestations: Vec::new(),
                anchoring_data: AnchoringData::default(),
            },
        })
    }

    /// Contract-side summary for `mint_batch`.
    pub fn batch_summary(&self, batch: &Batch, database: &str, table: &str) -> BatchSummary {
        let mut counts = OperationCounts::default();
        for entry in &batch.transactions {
            match entry.metadata.operation_type {
                Operation::Insert | Operation::Snapshot => counts.inserts += 1,
                Operation::Update => counts.updates += 1,
                Operation::Delete => counts.deletes += 1,
            }
        }
        let timestamp = batch
            .transactions
            .iter()
            .map(|entry| entry.metadata.timestamp)
            .min()
            .unwrap_or(batch.batch_info.created_at);
        let size_bytes = serde_json::to_vec(batch).map(|body| body.len() as u64).unwrap_or(0);

        BatchSummary {
            database_name: database.to_string(),
            table_names: vec![table.to_string()],
            timestamp,
            tx_count: batch.transactions.len() as u64,
            merkle_root: batch.merkle_tree.root.clone(),
            s3_bucket: self.bucket.clone(),
            s3_key: format!("{database}/{table}/{}/", batch.batch_info.batch_id),
            size_bytes,
            operation_counts: counts,
        }
    }

    /// NFT metadata whose reference URL points at `batch-data.json`.
    pub fn token_metadata(
        &self,
        batch_id: &str,
        database: &str,
        table: &str,
        event_count: usize,
    ) -> TokenMetadata {
        TokenMetadata {
            title: format!("ETRAP Batch {batch_id}"),
            description: format!(
                "Integrity certificate for {event_count} transactions from table {table}"
            ),
            media: None,
            media_hash: None,
            copies: 1,
            issued_at: Some(Utc::now().timestamp_millis().to_string()),
            expires_at: None,
            starts_at: None,
            updated_at: None,
            extra: None,
            reference: Some(format!(
                "https://s3.amazonaws.com/{}/{database}/{table}/{batch_id}/batch-data.json",
                self.bucket
            )),
            reference_hash: None,
        }
    }
}

/// The value fed to the hash contract: the row payload, or the full event
/// structure when no image applies.
fn hash_input(event: &ChangeEvent) -> Value {
    match event.row_payload() {
        Some(payload) => payload.clone(),
        None => json!({
            "operation": event.operation,
            "key": event.key,
            "before": event.before,
            "after": event.after,
        }),
    }
}

fn build_indices(transactions: &[TransactionEntry]) -> BatchIndices {
    let mut indices = BatchIndices::default();
    for entry in transactions {
        let id = entry.metadata.transaction_id.clone();
        indices
            .by_timestamp
            .entry(entry.metadata.timestamp.to_string())
            .or_default()
            .push(id.clone());
        indices
            .by_operation
            .entry(entry.metadata.operation_type.to_string())
            .or_default()
            .push(id.clone());
        let date = DateTime::from_timestamp_millis(entry.metadata.timestamp)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        indices.by_date.entry(date).or_default().push(id);
    }
    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use etrap_evidence::merkle::verify_proof;
    use etrap_evidence::model::SourceInfo;

    fn event(operation: Operation, idx: i64) -> ChangeEvent {
        let image = json!({"id": idx, "amount": 100 * idx});
        let (before, after) = match operation {
            Operation::Delete => (Some(image), None),
            Operation::Update => (Some(json!({"id": idx, "amount": 0})), Some(image)),
            _ => (None, Some(image)),
        };
        ChangeEvent {
            stream: "etrap.public.accounts".to_string(),
            message_id: format!("{idx}-0"),
            operation,
            key: json!({"id": idx}),
            before,
            after,
            source: SourceInfo {
                db: "etrapdb".to_string(),
                schema: "public".to_string(),
                table: "accounts".to_string(),
                ts_ms: Some(1749877844000 + idx),
                lsn: Some(1000 + idx),
                tx_id: Some(json!(500 + idx)),
                user: None,
            },
            timestamp_ms: 1749877844000 + idx,
        }
    }

    fn packager() -> BatchPackager {
        BatchPackager::new("demo-org", "etrap-demo-org")
    }

    #[test]
    fn batch_id_has_the_documented_shape() {
        let id = packager().new_base_batch_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts[0], "BATCH");
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[4].len(), 8);
        assert!(parts[4].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn package_builds_records_tree_and_signature() {
        let events = vec![
            event(Operation::Insert, 1),
            event(Operation::Update, 2),
            event(Operation::Delete, 3),
        ];
        let batch = packager().package("BATCH-2025-06-14-abcd1234", "etrapdb", "accounts", &events).unwrap();

        assert_eq!(batch.transactions.len(), 3);
        assert_eq!(batch.merkle_tree.original_count, 3);
        assert_eq!(batch.merkle_tree.padded_count, 4);
        assert_eq!(batch.merkle_tree.proof_index.len(), 3);

        for (idx, entry) in batch.transactions.iter().enumerate() {
            assert_eq!(entry.metadata.transaction_id, format!("BATCH-2025-06-14-abcd1234-{idx}"));
            assert_eq!(entry.merkle_leaf.index, idx);
            assert_eq!(entry.merkle_leaf.hash, entry.metadata.hash);
            let proof = batch.merkle_tree.proof_for(idx).unwrap();
            assert_eq!(proof.proof_path.len(), 2);
            assert!(verify_proof(
                &entry.metadata.hash,
                &proof.proof_path,
                &proof.sibling_positions,
                &batch.merkle_tree.root
            ));
        }

        assert_eq!(
            batch.verification.batch_signature,
            sha256_hex(format!("BATCH-2025-06-14-abcd1234{}", batch.merkle_tree.root).as_bytes())
        );
        assert_eq!(batch.verification.anchoring_data, AnchoringData::default());
    }

    #[test]
    fn transaction_hash_uses_the_delete_before_image() {
        let delete = event(Operation::Delete, 7);
        let batch = packager().package("B", "etrapdb", "accounts", std::slice::from_ref(&delete)).unwrap();
        let expected = transaction_hash(delete.before.as_ref().unwrap());
        assert_eq!(batch.transactions[0].metadata.hash, expected);
    }

    #[test]
    fn indices_group_by_timestamp_operation_and_date() {
        let events = vec![event(Operation::Insert, 1), event(Operation::Delete, 2)];
        let batch = packager().package("B", "etrapdb", "accounts", &events).unwrap();

        assert_eq!(batch.indices.by_operation["INSERT"], vec!["B-0"]);
        assert_eq!(batch.indices.by_operation["DELETE"], vec!["B-1"]);
        assert_eq!(batch.indices.by_timestamp["1749877844001"], vec!["B-0"]);
        assert_eq!(batch.indices.by_date["2025-06-14"], vec!["B-0", "B-1"]);
    }

    #[test]
    fn summary_counts_operations_and_takes_the_earliest_timestamp() {
        let events = vec![
            event(Operation::Insert, 5),
            event(Operation::Insert, 4),
            event(Operation::Delete, 6),
        ];
        let p = packager();
        let batch = p.package("B", "etrapdb", "accounts", &events).unwrap();
        let summary = p.batch_summary(&batch, "etrapdb", "accounts");

        assert_eq!(summary.tx_count, 3);
        assert_eq!(summary.operation_counts.inserts, 2);
        assert_eq!(summary.operation_counts.deletes, 1);
        assert_eq!(summary.timestamp, 1749877844004);
        assert_eq!(summary.table_names, vec!["accounts"]);
        assert_eq!(summary.s3_key, "etrapdb/accounts/B/");
        assert!(summary.size_bytes > 0);
        assert_eq!(summary.merkle_root, batch.merkle_tree.root);
    }

    #[test]
    fn token_metadata_references_the_bundle_url() {
        let metadata = packager().token_metadata("BATCH-X", "etrapdb", "accounts", 3);
        assert_eq!(metadata.title, "ETRAP Batch BATCH-X");
        assert_eq!(metadata.copies, 1);
        assert_eq!(
            metadata.reference.as_deref(),
            Some("https://s3.amazonaws.com/etrap-demo-org/etrapdb/accounts/BATCH-X/batch-data.json")
        );
    }
}
