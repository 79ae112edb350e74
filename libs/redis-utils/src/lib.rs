//! Shared Redis connection handling.
//!
//! Wraps a [`redis::aio::ConnectionManager`] behind a cloneable handle so
//! services share one auto-reconnecting connection instead of opening a
//! socket per request.

use redis::aio::ConnectionManager;
use redis::{Client, RedisResult};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Shared handle to the managed Redis connection.
pub type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

/// Connection pool facade over the redis connection manager.
#[derive(Clone)]
pub struct RedisPool {
    manager: SharedConnectionManager,
}

impl RedisPool {
    /// Connect to Redis and start the reconnecting manager.
    pub async fn connect(url: &str) -> RedisResult<Self> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        info!("Redis connection manager established");
        Ok(Self {
            manager: Arc::new(Mutex::new(manager)),
        })
    }

    pub fn manager(&self) -> SharedConnectionManager {
        self.manager.clone()
    }
}
