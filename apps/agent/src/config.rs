//! Environment-driven agent configuration.

use std::str::FromStr;
use std::time::Duration;

use crate::batcher::BatcherConfig;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_password: Option<String>,
    pub stream_pattern: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub s3_bucket: String,
    pub s3_region: String,
    /// When set, bundles go to this directory instead of S3.
    pub local_store_dir: Option<String>,
    pub organization_id: String,
    /// NEAR account acting as both signer and contract; unset disables
    /// anchoring.
    pub near_account: Option<String>,
    pub near_network: String,
    pub max_batch_size: usize,
    pub min_batch_size: usize,
    pub read_timeout_s: u64,
    pub force_flush_s: u64,
}

impl AgentConfig {
    pub fn from_env() -> Self {
        let organization_id = env_or("ETRAP_ORG_ID", "demo-org");
        Self {
            redis_host: env_or("REDIS_HOST", "localhost"),
            redis_port: env_parse("REDIS_PORT", 6379),
            redis_password: std::env::var("REDIS_PASSWORD").ok(),
            stream_pattern: env_or("ETRAP_STREAM_PATTERN", "etrap.public.*"),
            consumer_group: env_or("ETRAP_CONSUMER_GROUP", "etrap-agent"),
            consumer_name: env_or("ETRAP_CONSUMER_NAME", "agent-1"),
            s3_bucket: std::env::var("ETRAP_S3_BUCKET")
                .unwrap_or_else(|_| format!("etrap-{organization_id}")),
            s3_region: env_or("AWS_DEFAULT_REGION", "us-west-2"),
            local_store_dir: std::env::var("ETRAP_LOCAL_STORE_DIR").ok(),
            near_account: std::env::var("NEAR_ACCOUNT").ok(),
            near_network: env_or("NEAR_ENV", "testnet"),
            max_batch_size: env_parse("ETRAP_MAX_BATCH_SIZE", 1000),
            min_batch_size: env_parse("ETRAP_MIN_BATCH_SIZE", 1),
            read_timeout_s: env_parse("ETRAP_READ_TIMEOUT_S", 60),
            force_flush_s: env_parse("ETRAP_FORCE_FLUSH_S", 300),
            organization_id,
        }
    }

    pub fn redis_url(&self) -> String {
        match &self.redis_password {
            Some(password) => {
                format!("redis://:{password}@{}:{}/", self.redis_host, self.redis_port)
            }
            None => format!("redis://{}:{}/", self.redis_host, self.redis_port),
        }
    }

    pub fn batcher(&self) -> BatcherConfig {
        BatcherConfig {
            max_batch_size: self.max_batch_size,
            min_batch_size: self.min_batch_size,
            read_timeout: Duration::from_secs(self.read_timeout_s),
            force_flush_after: Duration::from_secs(self.force_flush_s),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
