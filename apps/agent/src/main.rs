use std::sync::Arc;

use anchor_near::{NearAnchorClient, NearRpcClient, NearSigner};
use etrap_agent::batcher::{AnchorHandle, Batcher};
use etrap_agent::packager::BatchPackager;
use etrap_agent::stream::StreamConsumer;
use etrap_agent::AgentConfig;
use etrap_storage::local::LocalObjectStore;
use etrap_storage::s3::S3ObjectStore;
use etrap_storage::ObjectStore;
use rusoto_core::Region;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn build_store(config: &AgentConfig) -> Arc<dyn ObjectStore> {
    if let Some(dir) = &config.local_store_dir {
        tracing::info!(dir = %dir, bucket = %config.s3_bucket, "using local object store");
        return Arc::new(LocalObjectStore::new(dir, &config.s3_bucket));
    }
    let region: Region = config.s3_region.parse().unwrap_or(Region::UsWest2);
    let store = S3ObjectStore::new(&config.s3_bucket, region.clone());
    if let Err(err) = store.ensure_bucket(&region).await {
        tracing::warn!(error = %err, "S3 bucket bootstrap failed");
    }
    Arc::new(store)
}

fn build_anchor(config: &AgentConfig) -> Option<AnchorHandle> {
    let account = match &config.near_account {
        Some(account) => account.clone(),
        None => {
            tracing::warn!("NEAR_ACCOUNT not set; batches will be stored without anchoring");
            return None;
        }
    };
    match NearSigner::from_credentials_dir(&account, &config.near_network) {
        Ok(signer) => {
            let rpc = NearRpcClient::new(NearRpcClient::endpoint_for(&config.near_network));
            tracing::info!(
                account = %account,
                network = %config.near_network,
                "NEAR anchoring enabled"
            );
            Some(AnchorHandle {
                provider: Arc::new(NearAnchorClient::new(rpc, signer, account.clone())),
                receiver_id: account,
            })
        }
        Err(err) => {
            tracing::warn!(error = %err, "NEAR credentials unavailable; anchoring disabled");
            None
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AgentConfig::from_env();
    tracing::info!(
        max_batch_size = config.max_batch_size,
        min_batch_size = config.min_batch_size,
        read_timeout_s = config.read_timeout_s,
        force_flush_s = config.force_flush_s,
        stream_pattern = %config.stream_pattern,
        "batching configuration"
    );

    let store = build_store(&config).await;
    let anchor = build_anchor(&config);
    let packager = BatchPackager::new(&config.organization_id, &config.s3_bucket);
    let mut batcher = Batcher::new(config.batcher(), packager, store, anchor);

    let mut consumer = match StreamConsumer::connect(
        &config.redis_url(),
        &config.stream_pattern,
        &config.consumer_group,
        &config.consumer_name,
    )
    .await
    {
        Ok(consumer) => consumer,
        Err(err) => {
            tracing::error!(error = %err, "cannot connect to broker");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    etrap_agent::batcher::run(&mut consumer, &mut batcher, shutdown_rx).await;

    let stats = batcher.stats();
    tracing::info!(
        total_batches = stats.total_batches,
        total_events = stats.total_events,
        nfts_minted = stats.nfts_minted,
        nft_failures = stats.nft_failures,
        "agent stopped"
    );
}
