//! Wiring for the tiered cache and the admission gate.
//!
//! One [`Tiergate`] is built at process start from an [`AppConfig`] and
//! handed to every request handler; there is no global instance.
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! use tiergate::{Tiergate, config::loader::load_config};
//! use tiergate_security::RequestContext;
//!
//! let app = Tiergate::from_config(&load_config(None)?).await?;
//! let decision = app.gate.evaluate(&RequestContext::new("203.0.113.5")).await;
//! if decision.allowed {
//!     let rows: Option<Vec<u64>> = app
//!         .cache
//!         .get_or_compute("report:2024", std::time::Duration::from_secs(600), &["reports"], || async {
//!             Ok(Some(vec![1, 2, 3]))
//!         })
//!         .await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod observability;

pub use config::{AppConfig, ConfigError, RedisConfig};

use std::sync::Arc;
use tiergate_cache::{InvalidationListener, RedisStore, SharedStore, TieredCache};
use tiergate_security::{SecurityError, SecurityGate};
use tokio::task::JoinHandle;

/// Connect the shared tier described by `config`.
///
/// Returns `None` when Redis is disabled or unreachable; the cache then runs
/// on its local tier only. Startup never fails because of Redis.
pub async fn create_shared_store(config: &RedisConfig) -> Option<Arc<dyn SharedStore>> {
    if !config.enabled {
        tracing::info!("Redis disabled, using local cache only");
        return None;
    }

    tracing::info!(url = %config.url, prefix = %config.key_prefix, "Connecting to Redis");
    match RedisStore::connect(
        &config.url,
        config.pool_size,
        config.timeout(),
        config.key_prefix.clone(),
    )
    .await
    {
        Ok(store) => {
            tracing::info!("Connected to Redis successfully");
            Some(Arc::new(store))
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to local cache."
            );
            None
        }
    }
}

/// Process-wide cache and admission gate.
pub struct Tiergate {
    pub cache: Arc<TieredCache>,
    pub gate: Arc<SecurityGate>,
    listener: Option<JoinHandle<()>>,
}

impl Tiergate {
    /// Build from an explicit shared store (or none).
    pub fn new(
        config: &AppConfig,
        shared: Option<Arc<dyn SharedStore>>,
    ) -> Result<Self, SecurityError> {
        let cache = Arc::new(TieredCache::new(config.cache.clone(), shared));
        let gate = SecurityGate::new(
            cache.clone(),
            config.rate_limits.clone(),
            config.security.clone(),
        )?;
        let listener = InvalidationListener::new(&cache).start();
        Ok(Self {
            cache,
            gate: Arc::new(gate),
            listener,
        })
    }

    /// Connect the shared tier per `config.redis` and build everything.
    pub async fn from_config(config: &AppConfig) -> Result<Self, SecurityError> {
        let shared = create_shared_store(&config.redis).await;
        Self::new(config, shared)
    }

    /// Whether the cross-instance invalidation listener is running.
    pub fn is_listening(&self) -> bool {
        self.listener.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Tiergate {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}
