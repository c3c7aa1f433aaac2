//! Bundle layout: the per-batch object set and its read/write paths.
//!
//! One batch owns the prefix `{database}/{table}/{batchId}/` holding
//! `batch-data.json` (the canonical source of truth), `merkle-tree.json`
//! (fast proof fetch) and three index objects. All writes are
//! pretty-printed JSON.

use etrap_evidence::model::Batch;

use crate::{ObjectStore, StorageError};

pub const BATCH_DATA_OBJECT: &str = "batch-data.json";
pub const MERKLE_TREE_OBJECT: &str = "merkle-tree.json";

const CONTENT_TYPE: &str = "application/json";

/// Key prefix for one batch (no trailing slash).
pub fn batch_prefix(database: &str, table: &str, batch_id: &str) -> String {
    format!("{database}/{table}/{batch_id}")
}

/// Outcome of writing one bundle. Per-object failures never undo earlier
/// writes; the flush is lost only when `batch-data.json` itself failed.
#[derive(Debug, Clone)]
pub struct BundleWriteReport {
    pub prefix: String,
    pub batch_data_written: bool,
    pub failed_objects: Vec<String>,
}

impl BundleWriteReport {
    pub fn is_usable(&self) -> bool {
        self.batch_data_written
    }
}

/// Persist the bundle for `batch` under its content-addressed prefix.
pub async fn write_batch_bundle(
    store: &dyn ObjectStore,
    batch: &Batch,
) -> Result<BundleWriteReport, StorageError> {
    let prefix = batch_prefix(
        &batch.batch_info.database_name,
        batch.table_name(),
        &batch.batch_info.batch_id,
    );

    let mut report = BundleWriteReport {
        prefix: prefix.clone(),
        batch_data_written: false,
        failed_objects: Vec::new(),
    };

    let batch_key = format!("{prefix}/{BATCH_DATA_OBJECT}");
    let batch_body = pretty(batch, &batch_key)?;
    match store.put_object(&batch_key, batch_body, CONTENT_TYPE).await {
        Ok(()) => report.batch_data_written = true,
        Err(err) => {
            tracing::error!(key = %batch_key, error = %err, "bundle write failed");
            report.failed_objects.push(batch_key);
        }
    }

    let tree_key = format!("{prefix}/{MERKLE_TREE_OBJECT}");
    let tree_body = pretty(&batch.merkle_tree, &tree_key)?;
    if let Err(err) = store.put_object(&tree_key, tree_body, CONTENT_TYPE).await {
        tracing::warn!(key = %tree_key, error = %err, "merkle tree write failed");
        report.failed_objects.push(tree_key);
    }

    let indices = [
        ("by_timestamp", &batch.indices.by_timestamp),
        ("by_operation", &batch.indices.by_operation),
        ("by_date", &batch.indices.by_date),
    ];
    for (name, index) in indices {
        let key = format!("{prefix}/indices/{name}.json");
        let body = pretty(index, &key)?;
        if let Err(err) = store.put_object(&key, body, CONTENT_TYPE).await {
            tracing::warn!(key = %key, error = %err, "index write failed");
            report.failed_objects.push(key);
        }
    }

    Ok(report)
}

/// Fetch and deserialise `batch-data.json` for a batch.
///
/// Accepts the on-chain `s3_key` forms: a prefix with or without a
/// trailing slash, or the full object key.
pub async fn read_batch_bundle(
    store: &dyn ObjectStore,
    key_prefix: &str,
) -> Result<Batch, StorageError> {
    let key = if key_prefix.ends_with(BATCH_DATA_OBJECT) {
        key_prefix.to_string()
    } else {
        format!("{}/{BATCH_DATA_OBJECT}", key_prefix.trim_end_matches('/'))
    };
    let body = store.get_object(&key).await?;
    serde_json::from_slice(&body).map_err(|source| StorageError::Malformed { key, source })
}

fn pretty<T: serde::Serialize>(value: &T, key: &str) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec_pretty(value).map_err(|source| StorageError::Malformed {
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_is_slash_separated() {
        assert_eq!(
            batch_prefix("etrapdb", "accounts", "BATCH-2025-06-14-abcd1234"),
            "etrapdb/accounts/BATCH-2025-06-14-abcd1234"
        );
    }

    #[test]
    fn report_usability_tracks_batch_data() {
        let usable = BundleWriteReport {
            prefix: "p".to_string(),
            batch_data_written: true,
            failed_objects: vec!["p/merkle-tree.json".to_string()],
        };
        assert!(usable.is_usable());
        let lost = BundleWriteReport {
            prefix: "p".to_string(),
            batch_data_written: false,
            failed_objects: vec!["p/batch-data.json".to_string()],
        };
        assert!(!lost.is_usable());
    }
}
