//! Registry of limiter engines keyed by tag.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::clock::{Clock, SystemClock};
use super::limiter::LimiterEngine;

/// Owns exactly one [`LimiterEngine`] per tag.
///
/// Lookups take a shard read lock. On a miss the shard write lock is taken
/// and the entry re-checked before an engine is created, so racing callers
/// for the same tag all receive the same instance.
#[derive(Debug)]
pub struct Registry {
    engines: DashMap<String, Arc<LimiterEngine>>,
    clock: Arc<dyn Clock>,
}

impl Registry {
    /// Create an empty registry using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create an empty registry whose engines share `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            engines: DashMap::new(),
            clock,
        }
    }

    /// Get the engine for `tag`, creating it on first reference.
    pub fn get_or_create(&self, tag: &str) -> Arc<LimiterEngine> {
        if let Some(engine) = self.engines.get(tag) {
            return Arc::clone(engine.value());
        }

        let engine = self.engines.entry(tag.to_string()).or_insert_with(|| {
            debug!(tag = %tag, "Creating limiter engine");
            Arc::new(LimiterEngine::with_clock(tag, Arc::clone(&self.clock)))
        });
        Arc::clone(engine.value())
    }

    /// Get the engine for `tag` without creating one.
    pub fn get(&self, tag: &str) -> Option<Arc<LimiterEngine>> {
        self.engines.get(tag).map(|engine| Arc::clone(engine.value()))
    }

    /// Get the number of tags with an engine.
    pub fn len(&self) -> usize {
        self.engines.len()
    }

    /// Whether no engine has been created yet.
    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Get the known tags, sorted.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.engines.iter().map(|e| e.key().clone()).collect();
        tags.sort();
        tags
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
