//! ETRAP CDC agent: consumes row-level change events from Redis streams,
//! groups them into per-table batches, summarises each batch with a
//! Merkle tree, anchors the batch on NEAR and persists the reference
//! bundle to object storage.

pub mod batcher;
pub mod config;
pub mod event;
pub mod packager;
pub mod stream;

pub use batcher::{run, AnchorHandle, BatchStats, Batcher, BatcherConfig, FlushReason};
pub use config::AgentConfig;
pub use packager::BatchPackager;
