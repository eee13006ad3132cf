//! Cache population: resolve every leaf of a descriptor to a cached handle.
//!
//! Leaves run through a bounded pool and the run always waits for all of
//! them. A failed leaf is recorded in the report and never affects its
//! siblings. Leaves that share a cache key are resolved once.

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::cache::{MediaCache, MediaHandle};
use crate::content::{Descriptor, LeafId, LeafPayload};
use crate::fetcher::MediaSource;

#[derive(Debug, Clone, PartialEq)]
pub enum LeafStatus {
    Cached(MediaHandle),
    Failed(String),
}

impl LeafStatus {
    pub fn handle(&self) -> Option<&MediaHandle> {
        match self {
            LeafStatus::Cached(h) => Some(h),
            LeafStatus::Failed(_) => None,
        }
    }
}

/// Cache status per leaf, kept beside the immutable descriptor.
pub type Annotations = BTreeMap<LeafId, LeafStatus>;

#[derive(Debug, Clone)]
pub struct PopulationOptions {
    pub concurrency: usize,
    pub media_timeout: Duration,
}

impl Default for PopulationOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            media_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PopulationReport {
    pub annotations: Annotations,
    pub all_succeeded: bool,
    pub failed_count: usize,
}

impl PopulationReport {
    pub fn from_annotations(annotations: Annotations) -> Self {
        let failed_count = count_failed(&annotations);
        Self {
            annotations,
            all_succeeded: failed_count == 0,
            failed_count,
        }
    }

    pub fn cached_count(&self) -> usize {
        self.annotations.len() - self.failed_count
    }
}

pub fn count_failed(annotations: &Annotations) -> usize {
    annotations
        .values()
        .filter(|s| matches!(s, LeafStatus::Failed(_)))
        .count()
}

/// Resolves every leaf of `descriptor` against `cache`, fetching misses
/// through `source`. Never fails as a whole.
pub async fn populate<S: MediaSource>(
    descriptor: &Descriptor,
    cache: &MediaCache,
    source: &S,
    options: &PopulationOptions,
) -> PopulationReport {
    let mut by_key: BTreeMap<String, (LeafPayload, Vec<LeafId>)> = BTreeMap::new();
    for leaf in descriptor.leaves() {
        by_key
            .entry(leaf.payload.cache_key().to_string())
            .or_insert_with(|| (leaf.payload.clone(), Vec::new()))
            .1
            .push(leaf.id);
    }

    let total = by_key.len();
    let concurrency = options.concurrency.max(1);
    debug!("Pipeline: resolving {} keys with {} worker(s)", total, concurrency);

    let resolved = stream::iter(by_key.into_values())
        .map(|(payload, ids)| async move {
            let status = resolve(&payload, cache, source, options.media_timeout).await;
            (ids, status)
        })
        .buffer_unordered(concurrency)
        .collect::<Vec<_>>()
        .await;

    let mut annotations = Annotations::new();
    for (ids, status) in resolved {
        for id in ids {
            annotations.insert(id, status.clone());
        }
    }

    let report = PopulationReport::from_annotations(annotations);
    info!(
        "Pipeline: {} leaves settled, {} cached, {} failed",
        report.annotations.len(),
        report.cached_count(),
        report.failed_count
    );
    report
}

async fn resolve<S: MediaSource>(
    payload: &LeafPayload,
    cache: &MediaCache,
    source: &S,
    timeout: Duration,
) -> LeafStatus {
    let key = payload.cache_key();
    if let Some(handle) = cache.lookup(key).await {
        return LeafStatus::Cached(handle);
    }

    let bytes = match payload {
        LeafPayload::Inline { markup, .. } => markup.clone().into_bytes(),
        LeafPayload::Remote { url } => {
            match tokio::time::timeout(timeout, source.fetch_media(url)).await {
                Ok(Ok(bytes)) => bytes,
                Ok(Err(e)) => {
                    warn!("Pipeline: {}", e);
                    return LeafStatus::Failed(e.to_string());
                }
                Err(_) => {
                    warn!("Pipeline: {} timed out after {:?}", url, timeout);
                    return LeafStatus::Failed(format!("timed out after {}s", timeout.as_secs()));
                }
            }
        }
    };

    match cache.put(key, &bytes).await {
        Ok(handle) => LeafStatus::Cached(handle),
        Err(e) => {
            warn!("Pipeline: could not store {}: {}", key, e);
            LeafStatus::Failed(e.to_string())
        }
    }
}
