//! Redis-backed `KvStore` for production deployments.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use std::time::Duration;
use tracing::Instrument;

use super::KvStore;

#[derive(Clone)]
pub struct RedisKv {
    manager: ConnectionManager,
}

impl RedisKv {
    /// Connect and build a managed connection (auto-reconnects).
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the initial handshake fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis URL")?;
        let manager = ConnectionManager::new(client)
            .await
            .context("failed to connect to redis")?;
        Ok(Self { manager })
    }
}

fn command_span(operation: &'static str) -> tracing::Span {
    tracing::info_span!("kv.command", kv.system = "redis", kv.operation = operation)
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn
            .get(key)
            .instrument(command_span("GET"))
            .await
            .context("redis GET failed")?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        let () = conn
            .set_ex(key, value, ttl.as_secs())
            .instrument(command_span("SETEX"))
            .await
            .context("redis SETEX failed")?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.manager.clone();
        // SET key value NX EX ttl -> OK or nil
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .instrument(command_span("SET NX EX"))
            .await
            .context("redis SET NX failed")?;
        Ok(reply.is_some())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.manager.clone();
        let value: i64 = conn
            .incr(key, 1)
            .instrument(command_span("INCR"))
            .await
            .context("redis INCR failed")?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: bool = conn
            .expire(key, i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX))
            .instrument(command_span("EXPIRE"))
            .await
            .context("redis EXPIRE failed")?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: i64 = conn
            .del(key)
            .instrument(command_span("DEL"))
            .await
            .context("redis DEL failed")?;
        Ok(())
    }
}
