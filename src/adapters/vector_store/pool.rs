//! Bounded connection pool for the remote ANN service
//!
//! Process-wide state with an explicit `init`/`close` lifecycle tied to the
//! engine's lifetime. Checkout semantics:
//!
//! - at most `max_connections` clients exist at once (semaphore-bounded);
//! - checkout blocks up to `checkout_timeout`, then fails fast with a
//!   `Transient` error;
//! - clients older than `recycle_after` are rebuilt on checkout;
//! - every checkout probes the service health endpoint and rebuilds the
//!   client once before giving up.

use reqwest::Client;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::domain::error::{Error, Result};

/// Pool tuning knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Base URL of the ANN service (e.g. `http://localhost:6333`)
    pub base_url: String,
    /// Connections kept ready at startup
    pub min_connections: usize,
    /// Hard bound on concurrent connections
    pub max_connections: usize,
    /// How long checkout may block before failing fast
    pub checkout_timeout: Duration,
    /// Age after which a connection is rebuilt
    pub recycle_after: Duration,
    /// Per-request timeout applied to every client
    pub request_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:6333".to_string(),
            min_connections: 1,
            max_connections: 5,
            checkout_timeout: Duration::from_secs(10),
            recycle_after: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct PooledClient {
    client: Client,
    created_at: Instant,
}

/// Bounded pool of HTTP clients with checkout health probes.
#[derive(Debug)]
pub struct ConnectionPool {
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<PooledClient>>,
    closed: AtomicBool,
}

impl ConnectionPool {
    /// Build the pool and pre-warm `min_connections` clients.
    pub fn init(config: PoolConfig) -> Result<Arc<Self>> {
        let mut idle = VecDeque::with_capacity(config.min_connections);
        for _ in 0..config.min_connections {
            idle.push_back(PooledClient {
                client: build_client(&config)?,
                created_at: Instant::now(),
            });
        }
        Ok(Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(config.max_connections)),
            idle: Mutex::new(idle),
            config,
            closed: AtomicBool::new(false),
        }))
    }

    /// Base URL the pool talks to.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Check out a healthy client. Blocks up to `checkout_timeout`.
    pub async fn checkout(self: Arc<Self>) -> Result<ClientGuard> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::internal("connection pool is closed"));
        }
        let permit = tokio::time::timeout(
            self.config.checkout_timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        .map_err(|_| {
            Error::transient(format!(
                "connection pool checkout timed out after {:?}",
                self.config.checkout_timeout
            ))
        })?
        .map_err(|_| Error::internal("connection pool semaphore closed"))?;

        let mut pooled = self.take_idle();
        // Recycle aged connections.
        if let Some(ref existing) = pooled {
            if existing.created_at.elapsed() > self.config.recycle_after {
                debug!("recycling aged ANN connection");
                pooled = None;
            }
        }
        let mut pooled = match pooled {
            Some(p) => p,
            None => PooledClient {
                client: build_client(&self.config)?,
                created_at: Instant::now(),
            },
        };

        if let Err(first) = self.probe(&pooled.client).await {
            warn!(error = %first, "ANN health probe failed, rebuilding connection");
            pooled = PooledClient {
                client: build_client(&self.config)?,
                created_at: Instant::now(),
            };
            self.probe(&pooled.client).await?;
        }

        Ok(ClientGuard {
            pooled: Some(pooled),
            pool: self,
            _permit: permit,
        })
    }

    /// Drop idle connections and refuse further checkouts.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.idle.lock().expect("pool lock").clear();
    }

    fn take_idle(&self) -> Option<PooledClient> {
        self.idle.lock().expect("pool lock").pop_front()
    }

    fn return_idle(&self, pooled: PooledClient) {
        if !self.closed.load(Ordering::Acquire) {
            self.idle.lock().expect("pool lock").push_back(pooled);
        }
    }

    async fn probe(&self, client: &Client) -> Result<()> {
        let url = format!("{}/healthz", self.config.base_url);
        let response = client
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map_err(|e| Error::dependency("ann-service", format!("health probe: {e}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::dependency(
                "ann-service",
                format!("health probe returned {}", response.status()),
            ))
        }
    }
}

fn build_client(config: &PoolConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.request_timeout)
        .pool_max_idle_per_host(1)
        .build()
        .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))
}

/// A checked-out client; returns to the pool on drop.
#[derive(Debug)]
pub struct ClientGuard {
    pooled: Option<PooledClient>,
    pool: Arc<ConnectionPool>,
    _permit: OwnedSemaphorePermit,
}

impl ClientGuard {
    /// The underlying HTTP client.
    pub fn client(&self) -> &Client {
        &self
            .pooled
            .as_ref()
            .expect("client present until drop")
            .client
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        if let Some(pooled) = self.pooled.take() {
            self.pool.return_idle(pooled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_storage_config() {
        let config = PoolConfig::default();
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.checkout_timeout, Duration::from_secs(10));
        assert_eq!(config.recycle_after, Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn checkout_fails_fast_when_service_is_down() {
        let config = PoolConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            checkout_timeout: Duration::from_millis(500),
            ..PoolConfig::default()
        };
        let pool = ConnectionPool::init(config).unwrap();
        let err = Arc::clone(&pool).checkout().await.unwrap_err();
        assert!(err.is_transient(), "expected transient, got {err}");
    }

    #[tokio::test]
    async fn closed_pool_refuses_checkout() {
        let pool = ConnectionPool::init(PoolConfig::default()).unwrap();
        pool.close();
        assert!(Arc::clone(&pool).checkout().await.is_err());
    }
}
