//! Client-side proxy for a remote rate limit authority.
//!
//! Each operation is one independent request; nothing is retried or cached.
//! A call that never completes is bounded only by the client's own timeout,
//! if one was configured.

use reqwest::{Client, StatusCode};
use tracing::{debug, trace};

use super::{
    ADMIT_PATH, ALLOW_PATH, ERROR_KIND_HEADER, GET_OR_CREATE_PATH, INCREMENT_PATH, SET_RULE_PATH,
};
use crate::error::{GatekeeperError, Result, RuleError};

/// Proxy for a [`Registry`](crate::ratelimit::Registry) served over HTTP.
#[derive(Debug, Clone)]
pub struct RemoteRegistry {
    base_url: String,
    client: Client,
}

impl RemoteRegistry {
    /// Create a proxy for the authority at `remote_addr` (`host:port`).
    pub fn new(remote_addr: &str) -> Self {
        Self::with_client(remote_addr, Client::new())
    }

    /// Create a proxy using a preconfigured HTTP client.
    pub fn with_client(remote_addr: &str, client: Client) -> Self {
        Self {
            base_url: base_url(remote_addr),
            client,
        }
    }

    /// Get the base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Make sure the remote authority has an engine for `tag` and return a
    /// handle bound to it.
    pub async fn get_or_create(&self, tag: &str) -> Result<RemoteLimiter> {
        let limiter = RemoteLimiter {
            base_url: self.base_url.clone(),
            tag: tag.to_string(),
            client: self.client.clone(),
        };

        limiter
            .call("get_or_create", GET_OR_CREATE_PATH, &[("tag", tag)])
            .await?;

        debug!(base_url = %self.base_url, tag = %tag, "Bound to remote limiter");
        Ok(limiter)
    }
}

/// Handle to the limiter for one tag on a remote authority.
///
/// Holds no state besides the address and tag.
#[derive(Debug, Clone)]
pub struct RemoteLimiter {
    base_url: String,
    tag: String,
    client: Client,
}

impl RemoteLimiter {
    /// Get the tag this handle is bound to.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Send a rule specification to the remote engine.
    ///
    /// Validation failures come back as [`GatekeeperError::Rule`], the same
    /// variant a local engine produces.
    pub async fn set_rules(&self, spec: &str) -> Result<()> {
        self.call("set_rule", SET_RULE_PATH, &[("tag", self.tag.as_str()), ("rule", spec)])
            .await
            .map(drop)
    }

    /// Count one request for `key`.
    pub async fn increment(&self, key: &str) -> Result<()> {
        self.call("inc", INCREMENT_PATH, &[("tag", self.tag.as_str()), ("key", key)])
            .await
            .map(drop)
    }

    /// Check whether `key` may proceed, without counting.
    pub async fn allow(&self, key: &str) -> Result<bool> {
        let body = self
            .call("allow", ALLOW_PATH, &[("tag", self.tag.as_str()), ("key", key)])
            .await?;
        parse_decision("allow", &body)
    }

    /// Count one request for `key` and decide on it atomically on the remote side.
    pub async fn admit(&self, key: &str) -> Result<bool> {
        let body = self
            .call("admit", ADMIT_PATH, &[("tag", self.tag.as_str()), ("key", key)])
            .await?;
        parse_decision("admit", &body)
    }

    /// Issue one request and return the body of a successful response.
    async fn call(
        &self,
        operation: &'static str,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);
        trace!(url = %url, operation, "Calling remote authority");

        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|source| GatekeeperError::Transport { operation, source })?;

        let status = response.status();
        let error_kind = response
            .headers()
            .get(ERROR_KIND_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .text()
            .await
            .map_err(|source| GatekeeperError::Transport { operation, source })?;

        if status == StatusCode::OK {
            return Ok(body);
        }

        if let Some(rule_error) = error_kind
            .as_deref()
            .and_then(|kind| RuleError::from_kind(kind, body.trim_end()))
        {
            return Err(rule_error.into());
        }

        Err(GatekeeperError::Status {
            operation,
            status: status.as_u16(),
            message: body.trim_end().to_string(),
        })
    }
}

fn parse_decision(operation: &str, body: &str) -> Result<bool> {
    match body {
        "true" => Ok(true),
        "false" => Ok(false),
        "" => Err(GatekeeperError::Protocol(format!(
            "{} returned an empty body",
            operation
        ))),
        other => Err(GatekeeperError::Protocol(format!(
            "{} returned unexpected body {:?}",
            operation, other
        ))),
    }
}

fn base_url(remote_addr: &str) -> String {
    let addr = remote_addr.trim_end_matches('/');
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    }
}
