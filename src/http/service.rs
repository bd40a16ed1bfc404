//! Request handlers for the authority endpoints.

use std::borrow::Cow;
use std::sync::Arc;

use axum::extract::{RawQuery, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use percent_encoding::percent_decode_str;
use tracing::{debug, instrument, warn};

use super::{
    ADMIT_PATH, ALLOW_PATH, ERROR_KIND_HEADER, GET_OR_CREATE_PATH, INCREMENT_PATH, SET_RULE_PATH,
};
use crate::error::RuleError;
use crate::ratelimit::Registry;

/// Build the router serving `registry`.
pub fn router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route(GET_OR_CREATE_PATH, get(get_or_create))
        .route(SET_RULE_PATH, get(set_rule))
        .route(INCREMENT_PATH, get(increment))
        .route(ALLOW_PATH, get(allow))
        .route(ADMIT_PATH, get(admit))
        .with_state(registry)
}

/// Query parameters shared by all endpoints.
///
/// Empty values count as missing. When a name repeats, the first value wins.
#[derive(Debug, Default, PartialEq, Eq)]
struct Params {
    tag: Option<String>,
    key: Option<String>,
    rule: Option<String>,
}

impl Params {
    /// Decode a raw query string, rejecting malformed escapes and non-UTF-8
    /// values instead of passing them through as literal text.
    fn parse(query: Option<&str>) -> Result<Self, ApiError> {
        let mut params = Params::default();

        for pair in query.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            let (slot, undecodable) = match name {
                "tag" => (&mut params.tag, "tag can not be decoded"),
                "key" => (&mut params.key, "key can not be decoded"),
                "rule" => (&mut params.rule, "rule can not be decoded"),
                _ => continue,
            };

            if slot.is_none() {
                let decoded = decode_component(value).ok_or(ApiError::BadRequest(undecodable))?;
                *slot = Some(decoded);
            }
        }

        Ok(params)
    }

    fn tag(&self) -> Result<&str, ApiError> {
        non_empty(&self.tag).ok_or(ApiError::BadRequest("tag is required"))
    }

    fn tag_and_key(&self) -> Result<(&str, &str), ApiError> {
        match (non_empty(&self.tag), non_empty(&self.key)) {
            (Some(tag), Some(key)) => Ok((tag, key)),
            _ => Err(ApiError::BadRequest("tag and key are required")),
        }
    }

    fn tag_and_rule(&self) -> Result<(&str, &str), ApiError> {
        match (non_empty(&self.tag), non_empty(&self.rule)) {
            (Some(tag), Some(rule)) => Ok((tag, rule)),
            _ => Err(ApiError::BadRequest("tag and rule are required")),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Decode one form-encoded query component.
///
/// Every `%` must start a two-digit hex escape and the result must be UTF-8.
fn decode_component(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    let well_formed = bytes.iter().enumerate().all(|(i, &b)| {
        b != b'%'
            || (bytes.get(i + 1).is_some_and(|h| h.is_ascii_hexdigit())
                && bytes.get(i + 2).is_some_and(|h| h.is_ascii_hexdigit()))
    });
    if !well_formed {
        return None;
    }

    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .ok()
        .map(Cow::into_owned)
}

/// Failure responses.
#[derive(Debug)]
enum ApiError {
    BadRequest(&'static str),
    Rule(RuleError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                warn!(reason = message, "Rejected request");
                (StatusCode::BAD_REQUEST, message).into_response()
            }
            ApiError::Rule(err) => {
                warn!(error = %err, "Rule rejected");
                let mut response =
                    (StatusCode::INTERNAL_SERVER_ERROR, err.detail().to_string()).into_response();
                response
                    .headers_mut()
                    .insert(ERROR_KIND_HEADER, HeaderValue::from_static(err.kind()));
                response
            }
        }
    }
}

fn decision(allowed: bool) -> &'static str {
    if allowed {
        "true"
    } else {
        "false"
    }
}

#[instrument(skip(registry))]
async fn get_or_create(
    State(registry): State<Arc<Registry>>,
    RawQuery(query): RawQuery,
) -> Result<StatusCode, ApiError> {
    let params = Params::parse(query.as_deref())?;
    registry.get_or_create(params.tag()?);
    Ok(StatusCode::OK)
}

#[instrument(skip(registry))]
async fn set_rule(
    State(registry): State<Arc<Registry>>,
    RawQuery(query): RawQuery,
) -> Result<StatusCode, ApiError> {
    let params = Params::parse(query.as_deref())?;
    let (tag, rule) = params.tag_and_rule()?;
    registry
        .get_or_create(tag)
        .set_rules(rule)
        .map_err(ApiError::Rule)?;

    debug!(tag = %tag, rule = %rule, "Rule set over HTTP");
    Ok(StatusCode::OK)
}

#[instrument(skip(registry))]
async fn increment(
    State(registry): State<Arc<Registry>>,
    RawQuery(query): RawQuery,
) -> Result<StatusCode, ApiError> {
    let params = Params::parse(query.as_deref())?;
    let (tag, key) = params.tag_and_key()?;
    registry.get_or_create(tag).increment(key);
    Ok(StatusCode::OK)
}

#[instrument(skip(registry))]
async fn allow(
    State(registry): State<Arc<Registry>>,
    RawQuery(query): RawQuery,
) -> Result<&'static str, ApiError> {
    let params = Params::parse(query.as_deref())?;
    let (tag, key) = params.tag_and_key()?;
    Ok(decision(registry.get_or_create(tag).allow(key)))
}

#[instrument(skip(registry))]
async fn admit(
    State(registry): State<Arc<Registry>>,
    RawQuery(query): RawQuery,
) -> Result<&'static str, ApiError> {
    let params = Params::parse(query.as_deref())?;
    let (tag, key) = params.tag_and_key()?;
    Ok(decision(registry.get_or_create(tag).admit(key)))
}
