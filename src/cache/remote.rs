//! Networked cache backend (Redis, or any server speaking its protocol).
//!
//! Every command runs under a short operation timeout so a slow or wedged
//! server turns into an error the store can soften, never a hung request.
//! The sliding-window admission runs as a Lua script so the whole
//! prune/count/append/write sequence is atomic on the server.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Cmd, FromRedisValue, Script};
use tracing::{debug, warn};

use super::backend::{BackendKind, CacheBackend, WindowOutcome, WindowRequest};
use crate::{PortcullisError, Result};

/// Keys requested per SCAN round trip during `clear_pattern`.
const SCAN_BATCH: u64 = 500;

/// KEYS[1] = window key
/// ARGV = now_ms, window_ms, max_requests, ttl_ms
/// Returns {admitted, count, oldest_ms}; oldest_ms is 0 for an empty window.
const ADMIT_WINDOW_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])
local floor = now - window
local kept = {}
local raw = redis.call('GET', KEYS[1])
if raw then
  local ok, decoded = pcall(cjson.decode, raw)
  if ok and type(decoded) == 'table' then
    for _, ts in ipairs(decoded) do
      if type(ts) == 'number' and ts > floor and ts <= now then
        table.insert(kept, ts)
      end
    end
  end
end
table.sort(kept)
if #kept >= limit then
  return {0, #kept, kept[1] or 0}
end
table.insert(kept, now)
redis.call('SET', KEYS[1], cjson.encode(kept), 'PX', ttl)
return {1, #kept, kept[1]}
"#;

/// Redis implementation of [`CacheBackend`].
pub struct RedisBackend {
    connection: ConnectionManager,
    operation_timeout: Duration,
    window_script: Script,
}

impl RedisBackend {
    /// Connect and verify the server answers `PING`.
    ///
    /// # Errors
    /// Returns [`PortcullisError::CacheUnavailable`] if the URL is invalid,
    /// the connection cannot be established within `connect_timeout`, or the
    /// server does not answer.
    pub async fn connect(
        url: &str,
        connect_timeout: Duration,
        operation_timeout: Duration,
    ) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| PortcullisError::CacheUnavailable(format!("invalid cache URL: {e}")))?;

        let connection = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                PortcullisError::CacheUnavailable(format!(
                    "connection timed out after {connect_timeout:?}"
                ))
            })?
            .map_err(|e| PortcullisError::CacheUnavailable(e.to_string()))?;

        let backend = Self {
            connection,
            operation_timeout,
            window_script: Script::new(ADMIT_WINDOW_SCRIPT),
        };

        backend.ping().await.map_err(|e| {
            warn!(error = %e, "cache server did not answer PING");
            PortcullisError::CacheUnavailable(e.to_string())
        })?;

        debug!("connected to networked cache");
        Ok(backend)
    }

    async fn run<T: FromRedisValue>(&self, operation: &'static str, cmd: Cmd) -> Result<T> {
        let mut conn = self.connection.clone();
        match tokio::time::timeout(self.operation_timeout, cmd.query_async(&mut conn)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(PortcullisError::Cache {
                operation,
                message: e.to_string(),
            }),
            Err(_) => Err(PortcullisError::Timeout {
                operation,
                timeout: self.operation_timeout,
            }),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    // PX 0 is rejected by the server
    u64::try_from(duration.as_millis())
        .unwrap_or(u64::MAX)
        .max(1)
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Redis
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.run("get", cmd).await
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        self.run("set", cmd).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        let removed: i64 = self.run("delete", cmd).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(key);
        let found: i64 = self.run("exists", cmd).await?;
        Ok(found > 0)
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        let mut cmd = redis::cmd("INCRBY");
        cmd.arg(key).arg(amount);
        self.run("increment", cmd).await
    }

    async fn clear_pattern(&self, pattern: &str) -> Result<u64> {
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;
        loop {
            let mut scan = redis::cmd("SCAN");
            scan.arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH);
            let (next, keys): (u64, Vec<String>) = self.run("clear_pattern", scan).await?;

            if !keys.is_empty() {
                let mut del = redis::cmd("DEL");
                del.arg(&keys);
                let count: u64 = self.run("clear_pattern", del).await?;
                removed += count;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(removed)
    }

    async fn admit_window(&self, key: &str, request: &WindowRequest) -> Result<WindowOutcome> {
        let mut conn = self.connection.clone();
        let mut invocation = self.window_script.key(key);
        invocation
            .arg(request.now_ms)
            .arg(request.window_ms)
            .arg(request.max_requests)
            .arg(millis(request.ttl));

        let reply: redis::RedisResult<(i64, i64, i64)> =
            match tokio::time::timeout(self.operation_timeout, invocation.invoke_async(&mut conn))
                .await
            {
                Ok(reply) => reply,
                Err(_) => {
                    return Err(PortcullisError::Timeout {
                        operation: "admit_window",
                        timeout: self.operation_timeout,
                    });
                }
            };

        let (admitted, count, oldest) = reply.map_err(|e| PortcullisError::Cache {
            operation: "admit_window",
            message: e.to_string(),
        })?;

        Ok(WindowOutcome {
            admitted: admitted == 1,
            count: count.max(0) as u32,
            oldest_ms: (oldest > 0).then_some(oldest as u64),
        })
    }

    async fn ping(&self) -> Result<()> {
        let _: String = self.run("ping", redis::cmd("PING")).await?;
        Ok(())
    }
}
