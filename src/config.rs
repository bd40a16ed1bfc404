//! Configuration management for Gatekeeper.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use tracing::{info, warn};

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::Registry;

/// Prefix for environment overrides, e.g. `GATEKEEPER__SERVER__LISTEN_ADDR`.
const ENV_PREFIX: &str = "GATEKEEPER";

/// Main configuration for the Gatekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Which authority clients talk to
    #[serde(default)]
    pub authority: AuthorityConfig,

    /// Rule specifications applied per tag when the server starts
    #[serde(default)]
    pub rules: BTreeMap<String, String>,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Where rate limit state lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorityMode {
    /// In-process registry
    #[default]
    Local,
    /// Registry hosted by another process, reached over HTTP
    Remote,
}

/// Authority selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorityConfig {
    /// Local or remote
    #[serde(default)]
    pub mode: AuthorityMode,

    /// `host:port` of the remote authority
    #[serde(default)]
    pub remote_addr: Option<String>,

    /// Per-request timeout for remote calls; none when unset
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

impl GatekeeperConfig {
    /// Load configuration from an optional file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| GatekeeperError::Config(e.to_string()))
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Apply the preset `rules` to `registry`, creating engines as needed.
    ///
    /// Stops at the first invalid preset; tags before it keep their rule.
    pub fn apply_rules(&self, registry: &Registry) -> Result<()> {
        for (tag, rule) in &self.rules {
            if let Err(e) = registry.get_or_create(tag).set_rules(rule) {
                warn!(tag = %tag, rule = %rule, error = %e, "Invalid preset rule");
                return Err(e.into());
            }
            info!(tag = %tag, rule = %rule, "Preset rule applied");
        }
        Ok(())
    }
}
