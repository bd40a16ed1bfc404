//! Traits abstracting over local and remote rate limit authorities.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::limiter::LimiterEngine;
use super::registry::Registry;
use crate::config::{AuthorityConfig, AuthorityMode};
use crate::error::{GatekeeperError, Result};
use crate::http::{RemoteLimiter, RemoteRegistry};

/// Operations on the limiter for one tag.
///
/// Implemented by the in-process [`LimiterEngine`] and by [`RemoteLimiter`],
/// which forwards each call to a remote authority.
#[async_trait]
pub trait Limiter: Send + Sync {
    /// Parse a rule specification and merge it into the tag's rule.
    async fn set_rules(&self, spec: &str) -> Result<()>;

    /// Count one request for `key`.
    async fn increment(&self, key: &str) -> Result<()>;

    /// Check whether `key` may proceed, without counting.
    async fn allow(&self, key: &str) -> Result<bool>;

    /// Count one request for `key` and decide on it atomically.
    async fn admit(&self, key: &str) -> Result<bool>;
}

/// Hands out the limiter for a tag, creating it on first reference.
#[async_trait]
pub trait Authority: Send + Sync {
    /// Get the limiter for `tag`.
    async fn get_or_create(&self, tag: &str) -> Result<Arc<dyn Limiter>>;
}

#[async_trait]
impl Limiter for LimiterEngine {
    async fn set_rules(&self, spec: &str) -> Result<()> {
        LimiterEngine::set_rules(self, spec).map_err(GatekeeperError::from)
    }

    async fn increment(&self, key: &str) -> Result<()> {
        LimiterEngine::increment(self, key);
        Ok(())
    }

    async fn allow(&self, key: &str) -> Result<bool> {
        Ok(LimiterEngine::allow(self, key))
    }

    async fn admit(&self, key: &str) -> Result<bool> {
        Ok(LimiterEngine::admit(self, key))
    }
}

#[async_trait]
impl Authority for Registry {
    async fn get_or_create(&self, tag: &str) -> Result<Arc<dyn Limiter>> {
        let engine: Arc<dyn Limiter> = Registry::get_or_create(self, tag);
        Ok(engine)
    }
}

#[async_trait]
impl Limiter for RemoteLimiter {
    async fn set_rules(&self, spec: &str) -> Result<()> {
        RemoteLimiter::set_rules(self, spec).await
    }

    async fn increment(&self, key: &str) -> Result<()> {
        RemoteLimiter::increment(self, key).await
    }

    async fn allow(&self, key: &str) -> Result<bool> {
        RemoteLimiter::allow(self, key).await
    }

    async fn admit(&self, key: &str) -> Result<bool> {
        RemoteLimiter::admit(self, key).await
    }
}

#[async_trait]
impl Authority for RemoteRegistry {
    async fn get_or_create(&self, tag: &str) -> Result<Arc<dyn Limiter>> {
        let limiter = RemoteRegistry::get_or_create(self, tag).await?;
        Ok(Arc::new(limiter))
    }
}

/// Build the authority selected by `config`.
pub fn build_authority(config: &AuthorityConfig) -> Result<Arc<dyn Authority>> {
    match config.mode {
        AuthorityMode::Local => {
            info!("Using local rate limit authority");
            Ok(Arc::new(Registry::new()))
        }
        AuthorityMode::Remote => {
            let remote_addr = config.remote_addr.as_deref().ok_or_else(|| {
                GatekeeperError::Config("remote_addr is required in remote mode".to_string())
            })?;

            let mut builder = reqwest::Client::builder();
            if let Some(timeout_ms) = config.request_timeout_ms {
                builder = builder.timeout(Duration::from_millis(timeout_ms));
            }
            let client = builder
                .build()
                .map_err(|e| GatekeeperError::Config(format!("Failed to build HTTP client: {}", e)))?;

            info!(remote_addr = %remote_addr, "Using remote rate limit authority");
            Ok(Arc::new(RemoteRegistry::with_client(remote_addr, client)))
        }
    }
}
