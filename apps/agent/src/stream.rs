//! Redis stream consumer-group plumbing.

use std::time::Duration;

use redis::aio::Connection;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use thiserror::Error;

use crate::event::RawMessage;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("broker error: {0}")]
    Redis(#[from] redis::RedisError),
}

pub struct StreamConsumer {
    conn: Connection,
    group: String,
    consumer: String,
    pattern: String,
}

impl StreamConsumer {
    pub async fn connect(
        url: &str,
        pattern: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Self, StreamError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_async_connection().await?;
        Ok(Self {
            conn,
            group: group.to_string(),
            consumer: consumer.to_string(),
            pattern: pattern.to_string(),
        })
    }

    /// Streams currently matching the configured pattern.
    pub async fn discover_streams(&mut self) -> Result<Vec<String>, StreamError> {
        let pattern = self.pattern.clone();
        Ok(self.conn.keys(pattern).await?)
    }

    /// Create the consumer group on every stream; an existing group
    /// (BUSYGROUP) is fine.
    pub async fn ensure_groups(&mut self, streams: &[String]) -> Result<(), StreamError> {
        for stream in streams {
            let created: Result<(), redis::RedisError> = self
                .conn
                .xgroup_create_mkstream(stream, &self.group, "0")
                .await;
            match created {
                Ok(()) => {
                    tracing::info!(stream = %stream, group = %self.group, "created consumer group");
                }
                Err(err) if err.to_string().contains("BUSYGROUP") => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Blocking consumer-group read across `streams`: up to `count` new
    /// messages, waiting at most `timeout`.
    pub async fn read(
        &mut self,
        streams: &[String],
        count: usize,
        timeout: Duration,
    ) -> Result<Vec<RawMessage>, StreamError> {
        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(count)
            .block(timeout.as_millis() as usize);
        let ids: Vec<&str> = streams.iter().map(|_| ">").collect();
        let reply: StreamReadReply = self.conn.xread_options(streams, &ids, &options).await?;

        let mut messages = Vec::new();
        for stream_key in reply.keys {
            for entry in stream_key.ids {
                messages.push(RawMessage {
                    stream: stream_key.key.clone(),
                    id: entry.id.clone(),
                    key: entry.map.get("key").and_then(string_field),
                    value: entry.map.get("value").and_then(string_field),
                });
            }
        }
        Ok(messages)
    }

    /// Acknowledge one message to the consumer group.
    pub async fn ack(&mut self, stream: &str, id: &str) -> Result<(), StreamError> {
        let _: i64 = self.conn.xack(stream, &self.group, &[id]).await?;
        Ok(())
    }
}

fn string_field(value: &redis::Value) -> Option<String> {
    redis::from_redis_value(value).ok()
}
