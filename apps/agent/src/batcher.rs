//! Adaptive batching: one cooperative loop balancing latency, throughput
//! and back-pressure under three triggers (size, idle timeout, force
//! flush).
//!
//! Messages are acknowledged to the broker as soon as they are parsed,
//! before anchoring. This is at-least-once-to-persistence: if the process
//! dies after the ack but before the flush lands, those events are lost
//! here and must be re-driven from the database LSN.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use etrap_evidence::anchor::{AnchorError, AnchorProvider};
use etrap_evidence::model::{AnchoringData, ChangeEvent};
use etrap_storage::bundle::write_batch_bundle;
use etrap_storage::ObjectStore;
use tokio::sync::watch;

use crate::event::parse_cdc_event;
use crate::packager::BatchPackager;
use crate::stream::StreamConsumer;

/// How long to wait after a broker failure or an empty stream scan.
const BROKER_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Counters are logged every this many flushes.
const STATS_LOG_INTERVAL: u64 = 10;

#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Hard upper bound on pending events; reaching it flushes at once.
    pub max_batch_size: usize,
    /// Below this, idle timeouts do not flush.
    pub min_batch_size: usize,
    /// Max block time of one broker read while capacity remains.
    pub read_timeout: Duration,
    /// Upper bound on the age of the oldest pending event.
    pub force_flush_after: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 1000,
            min_batch_size: 1,
            read_timeout: Duration::from_secs(60),
            force_flush_after: Duration::from_secs(300),
        }
    }
}

/// Why a flush fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    BatchFull,
    IdleTimeout,
    ForceTimeout,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BatchFull => "batch size reached",
            Self::IdleTimeout => "read timeout with pending events",
            Self::ForceTimeout => "force timeout reached",
        };
        f.write_str(name)
    }
}

/// Pure trigger decision for one loop iteration.
pub fn flush_trigger(
    config: &BatcherConfig,
    pending: usize,
    read_was_empty: bool,
    pending_age: Duration,
) -> Option<FlushReason> {
    if pending == 0 {
        return None;
    }
    if pending >= config.max_batch_size {
        return Some(FlushReason::BatchFull);
    }
    if pending >= config.min_batch_size {
        if read_was_empty {
            return Some(FlushReason::IdleTimeout);
        }
        if pending_age >= config.force_flush_after {
            return Some(FlushReason::ForceTimeout);
        }
    }
    None
}

/// Read-only counter snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub total_batches: u64,
    pub total_events: u64,
    pub empty_timeouts: u64,
    pub nfts_minted: u64,
    pub nft_failures: u64,
}

/// Mint destination: a provider plus the account receiving the token.
pub struct AnchorHandle {
    pub provider: Arc<dyn AnchorProvider>,
    pub receiver_id: String,
}

/// One partition of a flush, scoped to a single `(schema, table)`.
pub struct TablePartition {
    pub database: String,
    pub schema: String,
    pub table: String,
    pub events: Vec<ChangeEvent>,
}

/// Group a flush by `(schema, table)`, preserving arrival order within
/// each partition and first-seen order across partitions.
pub fn partition_by_table(events: Vec<ChangeEvent>) -> Vec<TablePartition> {
    let mut partitions: Vec<TablePartition> = Vec::new();
    let mut lookup: HashMap<(String, String), usize> = HashMap::new();
    for event in events {
        let key = (event.source.schema.clone(), event.source.table.clone());
        let index = match lookup.get(&key) {
            Some(&index) => index,
            None => {
                partitions.push(TablePartition {
                    database: event.source.db.clone(),
                    schema: key.0.clone(),
                    table: key.1.clone(),
                    events: Vec::new(),
                });
                lookup.insert(key, partitions.len() - 1);
                partitions.len() - 1
            }
        };
        partitions[index].events.push(event);
    }
    partitions
}

pub struct Batcher {
    config: BatcherConfig,
    packager: BatchPackager,
    store: Arc<dyn ObjectStore>,
    anchor: Option<AnchorHandle>,
    pending: Vec<ChangeEvent>,
    pending_since: Option<Instant>,
    stats: BatchStats,
}

impl Batcher {
    pub fn new(
        config: BatcherConfig,
        packager: BatchPackager,
        store: Arc<dyn ObjectStore>,
        anchor: Option<AnchorHandle>,
    ) -> Self {
        Self {
            config,
            packager,
            store,
            anchor,
            pending: Vec::new(),
            pending_since: None,
            stats: BatchStats::default(),
        }
    }

    pub fn stats(&self) -> BatchStats {
        self.stats.clone()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.config.max_batch_size.saturating_sub(self.pending.len())
    }

    /// Effective block time for the next broker read: the full read
    /// timeout while nothing is pending, else capped by the time left
    /// until the force flush.
    pub fn read_timeout(&self) -> Duration {
        if self.pending.is_empty() {
            return self.config.read_timeout;
        }
        let remaining = self.config.force_flush_after.saturating_sub(self.pending_age());
        self.config.read_timeout.min(remaining)
    }

    pub fn push(&mut self, event: ChangeEvent) {
        if self.pending.is_empty() {
            self.pending_since = Some(Instant::now());
        }
        self.pending.push(event);
    }

    pub fn trigger(&self, read_was_empty: bool) -> Option<FlushReason> {
        flush_trigger(
            &self.config,
            self.pending.len(),
            read_was_empty,
            self.pending_age(),
        )
    }

    pub fn note_idle(&mut self) {
        self.stats.empty_timeouts += 1;
        tracing::debug!(empty_timeouts = self.stats.empty_timeouts, "no activity");
    }

    fn pending_age(&self) -> Duration {
        self.pending_since.map(|since| since.elapsed()).unwrap_or_default()
    }

    /// Flush everything pending: partition by `(schema, table)`, anchor
    /// each partition (when configured), then persist its bundle. A chain
    /// failure never prevents the bundle write; such batches stay
    /// pending-anchor in object storage.
    pub async fn flush(&mut self, reason: FlushReason) {
        let events = std::mem::take(&mut self.pending);
        self.pending_since = None;
        if events.is_empty() {
            return;
        }
        let event_count = events.len() as u64;
        tracing::info!(reason = %reason, events = event_count, "flushing batch");

        let partitions = partition_by_table(events);
        let multiple = partitions.len() > 1;
        let base_id = self.packager.new_base_batch_id();
        for (index, partition) in partitions.into_iter().enumerate() {
            let batch_id = if multiple {
                format!("{base_id}-T{index}")
            } else {
                base_id.clone()
            };
            self.process_partition(&batch_id, partition).await;
        }

        self.stats.total_batches += 1;
        self.stats.total_events += event_count;
        if self.stats.total_batches % STATS_LOG_INTERVAL == 0 {
            let stats = &self.stats;
            tracing::info!(
                total_batches = stats.total_batches,
                total_events = stats.total_events,
                avg_batch_size = stats.total_events as f64 / stats.total_batches as f64,
                nfts_minted = stats.nfts_minted,
                nft_failures = stats.nft_failures,
                empty_timeouts = stats.empty_timeouts,
                "periodic statistics"
            );
        }
    }

    async fn process_partition(&mut self, batch_id: &str, partition: TablePartition) {
        let TablePartition {
            database,
            schema,
            table,
            events,
        } = partition;

        let mut batch = match self.packager.package(batch_id, &database, &table, &events) {
            Ok(batch) => batch,
            Err(err) => {
                tracing::error!(batch_id, error = %err, "batch packaging failed");
                return;
            }
        };
        tracing::info!(
            batch_id,
            schema = %schema,
            table = %table,
            events = events.len(),
            merkle_root = %batch.merkle_tree.root,
            "packaged batch"
        );

        if let Some(anchor) = &self.anchor {
            let summary = self.packager.batch_summary(&batch, &database, &table);
            let metadata = self.packager.token_metadata(batch_id, &database, &table, events.len());
            match anchor
                .provider
                .mint_batch(batch_id, &anchor.receiver_id, &metadata, &summary)
                .await
            {
                Ok(outcome) => {
                    self.stats.nfts_minted += 1;
                    tracing::info!(batch_id, tx_hash = %outcome.tx_hash, "batch anchored");
                    batch.verification.anchoring_data = AnchoringData {
                        block_height: outcome.block_height,
                        tx_hash: outcome.tx_hash,
                        gas_used: outcome.gas_used,
                        etrap_fee: outcome.etrap_fee,
                    };
                }
                Err(AnchorError::TokenExists(token_id)) => {
                    // Success-equivalent: the token is already on chain.
                    tracing::error!(
                        batch_id,
                        token_id = %token_id,
                        "token id collision on mint; review required"
                    );
                }
                Err(err) => {
                    self.stats.nft_failures += 1;
                    tracing::error!(
                        batch_id,
                        error = %err,
                        "NFT minting failed; bundle kept for later anchoring"
                    );
                }
            }
        }

        match write_batch_bundle(self.store.as_ref(), &batch).await {
            Ok(report) if report.is_usable() => {
                tracing::info!(batch_id, prefix = %report.prefix, "bundle stored");
            }
            Ok(_) => {
                tracing::error!(batch_id, "bundle lost for this flush: batch-data.json write failed");
            }
            Err(err) => {
                tracing::error!(batch_id, error = %err, "bundle serialisation failed");
            }
        }
    }
}

/// The agent's cooperative loop. Blocks only on the broker read; decode,
/// hashing, tree building, anchoring and storage all run inline, so
/// per-table ordering within a flush follows arrival order. Shutdown is
/// observed between broker reads; pending events are not flushed.
pub async fn run(
    consumer: &mut StreamConsumer,
    batcher: &mut Batcher,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let streams = match consumer.discover_streams().await {
            Ok(streams) => streams,
            Err(err) => {
                tracing::error!(error = %err, "stream discovery failed");
                tokio::time::sleep(BROKER_RETRY_DELAY).await;
                continue;
            }
        };
        if streams.is_empty() {
            tracing::info!("no streams match the pattern, waiting");
            tokio::select! {
                _ = tokio::time::sleep(BROKER_RETRY_DELAY) => {}
                _ = shutdown.changed() => {}
            }
            continue;
        }
        if let Err(err) = consumer.ensure_groups(&streams).await {
            tracing::error!(error = %err, "consumer group setup failed");
            tokio::time::sleep(BROKER_RETRY_DELAY).await;
            continue;
        }

        let timeout = batcher.read_timeout();
        let capacity = batcher.remaining_capacity();
        let messages = tokio::select! {
            read = consumer.read(&streams, capacity, timeout) => match read {
                Ok(messages) => messages,
                Err(err) => {
                    tracing::error!(error = %err, "broker read failed");
                    tokio::time::sleep(BROKER_RETRY_DELAY).await;
                    continue;
                }
            },
            _ = shutdown.changed() => break,
        };

        let read_was_empty = messages.is_empty();
        for message in &messages {
            match parse_cdc_event(message) {
                Ok(event) => batcher.push(event),
                Err(err) => {
                    tracing::warn!(
                        stream = %message.stream,
                        message_id = %message.id,
                        error = %err,
                        "dropping malformed CDC event"
                    );
                }
            }
            if let Err(err) = consumer.ack(&message.stream, &message.id).await {
                tracing::warn!(
                    stream = %message.stream,
                    message_id = %message.id,
                    error = %err,
                    "ack failed"
                );
            }
        }

        match batcher.trigger(read_was_empty) {
            Some(reason) => batcher.flush(reason).await,
            None => {
                if read_was_empty && batcher.pending_len() == 0 {
                    batcher.note_idle();
                } else if batcher.pending_len() > 0 {
                    tracing::debug!(pending = batcher.pending_len(), "events pending, not yet batching");
                }
            }
        }
    }
}
