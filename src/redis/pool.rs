//! Redis connection pool shared by producers and consumers.
//!
//! Commands go through one multiplexed connection. Blocking commands
//! (`BLPOP`) get a dedicated connection per list key: Redis answers a
//! connection's commands in order, so a blocked pop would otherwise hold up
//! every command queued behind it. Pops on the same key may share a
//! connection, since whichever runs first takes the element anyway.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, RedisResult};
use tokio::sync::RwLock;

use crate::config::RedisConfig;

use super::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

/// Error type for Redis pool operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Circuit breaker is open")]
    CircuitOpen,

    #[error("Connection not available: {0}")]
    ConnectionUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane<'a> {
    Shared,
    /// Blocking connection owned by one list key
    Blocking(&'a str),
}

impl Lane<'_> {
    fn as_str(&self) -> &'static str {
        match self {
            Lane::Shared => "shared",
            Lane::Blocking(_) => "blocking",
        }
    }
}

pub struct RedisPool {
    client: Client,
    shared: RwLock<Option<MultiplexedConnection>>,
    blocking: DashMap<String, MultiplexedConnection>,
    circuit_breaker: Arc<CircuitBreaker>,
    config: RedisConfig,
}

impl RedisPool {
    /// Create a pool. No connection is made until the first command.
    pub fn new(config: RedisConfig) -> Result<Self, PoolError> {
        let circuit_breaker = Arc::new(CircuitBreaker::with_config(CircuitBreakerConfig::from(
            &config,
        )));
        Self::with_circuit_breaker(config, circuit_breaker)
    }

    pub fn with_circuit_breaker(
        config: RedisConfig,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, PoolError> {
        let client = Client::open(config.url.as_str())?;

        Ok(Self {
            client,
            shared: RwLock::new(None),
            blocking: DashMap::new(),
            circuit_breaker,
            config,
        })
    }

    async fn connect(&self, lane: Lane<'_>) -> Result<MultiplexedConnection, PoolError> {
        match self.client.get_multiplexed_tokio_connection().await {
            Ok(conn) => {
                self.circuit_breaker.record_success();
                tracing::info!(lane = lane.as_str(), "Redis connection established");
                Ok(conn)
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                tracing::error!(lane = lane.as_str(), error = %e, "Failed to connect to Redis");
                Err(PoolError::Redis(e))
            }
        }
    }

    async fn shared_connection(&self) -> Result<MultiplexedConnection, PoolError> {
        {
            let conn = self.shared.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        let mut guard = self.shared.write().await;

        // Another task may have connected while we waited for the lock
        if let Some(ref c) = *guard {
            return Ok(c.clone());
        }

        let conn = self.connect(Lane::Shared).await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn blocking_connection(&self, key: &str) -> Result<MultiplexedConnection, PoolError> {
        let cached = self.blocking.get(key).map(|conn| conn.value().clone());
        if let Some(conn) = cached {
            return Ok(conn);
        }

        let conn = self.connect(Lane::Blocking(key)).await?;
        // A racing caller for the same key may have won; keep its connection
        let conn = self
            .blocking
            .entry(key.to_string())
            .or_insert(conn)
            .value()
            .clone();
        Ok(conn)
    }

    async fn connection(&self, lane: Lane<'_>) -> Result<MultiplexedConnection, PoolError> {
        if !self.circuit_breaker.allow_request() {
            return Err(PoolError::CircuitOpen);
        }

        match lane {
            Lane::Shared => self.shared_connection().await,
            Lane::Blocking(key) => self.blocking_connection(key).await,
        }
    }

    async fn reset(&self, lane: Lane<'_>) {
        match lane {
            Lane::Shared => *self.shared.write().await = None,
            Lane::Blocking(key) => {
                self.blocking.remove(key);
            }
        }
    }

    async fn run<F, T, Fut>(&self, lane: Lane<'_>, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = self.connection(lane).await?;

        match f(conn).await {
            Ok(result) => {
                self.circuit_breaker.record_success();
                Ok(result)
            }
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    // Next call reconnects
                    self.reset(lane).await;
                }
                self.circuit_breaker.record_failure();
                Err(PoolError::Redis(e))
            }
        }
    }

    /// Run a command on the shared multiplexed connection.
    pub async fn execute<F, T, Fut>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        self.run(Lane::Shared, f).await
    }

    /// Run a blocking command on the connection dedicated to `key`, so a
    /// blocked pop never queues behind another key's.
    pub async fn execute_blocking<F, T, Fut>(&self, key: &str, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        self.run(Lane::Blocking(key), f).await
    }

    /// Number of open blocking connections (one per list key in use).
    pub fn blocking_connections(&self) -> usize {
        self.blocking.len()
    }

    pub fn is_healthy(&self) -> bool {
        self.circuit_breaker.state() == CircuitState::Closed
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Ping Redis to check connectivity.
    pub async fn ping(&self) -> Result<(), PoolError> {
        self.execute(|mut conn| async move {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }
}
