//! Shared test fixtures.

use std::time::Duration;

use async_trait::async_trait;
use portcullis::cache::{WindowOutcome, WindowRequest};
use portcullis::{BackendKind, CacheBackend, PortcullisError, Result};

/// Backend whose every operation fails, as during a cache outage.
pub struct FailingBackend;

fn outage(operation: &'static str) -> PortcullisError {
    PortcullisError::Cache {
        operation,
        message: "connection reset by peer".to_string(),
    }
}

#[async_trait]
impl CacheBackend for FailingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Redis
    }

    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(outage("get"))
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> Result<()> {
        Err(outage("set"))
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        Err(outage("delete"))
    }

    async fn exists(&self, _key: &str) -> Result<bool> {
        Err(outage("exists"))
    }

    async fn increment(&self, _key: &str, _amount: i64) -> Result<i64> {
        Err(outage("increment"))
    }

    async fn clear_pattern(&self, _pattern: &str) -> Result<u64> {
        Err(outage("clear_pattern"))
    }

    async fn admit_window(&self, _key: &str, _request: &WindowRequest) -> Result<WindowOutcome> {
        Err(outage("admit_window"))
    }

    async fn ping(&self) -> Result<()> {
        Err(outage("ping"))
    }
}
