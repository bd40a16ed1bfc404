//! HTTP transport exposing a [`Registry`](crate::ratelimit::Registry) to remote
//! callers, and the client-side proxy that talks to it.
//!
//! Every operation is a `GET` with query-string parameters. `/allow` and
//! `/admit` answer with the literal body `true` or `false`.

mod client;
mod server;
mod service;

pub use client::{RemoteLimiter, RemoteRegistry};
pub use server::HttpServer;
pub use service::router;

pub const GET_OR_CREATE_PATH: &str = "/get_or_create";
pub const SET_RULE_PATH: &str = "/set_rule";
pub const INCREMENT_PATH: &str = "/inc";
pub const ALLOW_PATH: &str = "/allow";
pub const ADMIT_PATH: &str = "/admit";

/// Response header carrying the [`RuleError`](crate::error::RuleError) kind
/// when a rule is rejected.
pub const ERROR_KIND_HEADER: &str = "x-gatekeeper-error";
