//! Deployment sync engine
//!
//! One [`SyncEngine::run`] call drives a single webhook delivery end to end:
//! hooks, signature checks, the maintenance swap, per-repository downloads,
//! and the final cache/scratch cleanup. Repository failures are isolated:
//! they land in the report's error map and never abort sibling repositories.

mod engine;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

use serde::Serialize;

pub use engine::SyncEngine;

/// One inbound webhook delivery, as handed over by the transport layer.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    /// Raw request body, exactly as signed by the sender
    pub body: Vec<u8>,
    /// Raw signature header value, if the request carried one
    pub signature: Option<String>,
}

impl WebhookDelivery {
    pub fn new(body: impl Into<Vec<u8>>, signature: Option<String>) -> Self {
        Self {
            body: body.into(),
            signature,
        }
    }
}

/// Outcome of a completed run.
///
/// A run that reaches the end always reports `"finished"`; per-repository
/// failures are carried in `errors` rather than failing the run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SyncReport {
    pub status: String,
    pub errors: BTreeMap<String, String>,
}

impl SyncReport {
    pub(crate) fn finished(errors: BTreeMap<String, String>) -> Self {
        Self {
            status: "finished".to_string(),
            errors,
        }
    }

    /// True when every repository synced cleanly.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Host-supplied cache clearing capability.
///
/// The engine calls it once per run, after the repositories are synced; what
/// "the cache" is stays the host's business.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate_all(&self) -> anyhow::Result<()>;
}

/// Default invalidator for deployments without a cache backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl CacheInvalidator for NoopCache {
    fn invalidate_all(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
