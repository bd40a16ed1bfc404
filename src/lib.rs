//! Gatekeeper - Tag-Scoped Admission Control
//!
//! This crate decides whether a caller identified by a `(tag, key)` pair may
//! proceed, based on a per-tag rule such as `limit=100;reset=1m` or
//! `limit=5000;reset=calendar@day`. Each tag is owned by exactly one engine in
//! a [`ratelimit::Registry`]; the same operations are available in-process or,
//! through [`http::RemoteRegistry`], against an authority in another process.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
