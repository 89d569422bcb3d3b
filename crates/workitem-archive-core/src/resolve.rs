//! Latest-wins resolution with a per-run cache.
//!
//! Among all snapshots of one origin only the newest (optionally within a
//! time window) is eligible for export or restore. The cache remembers the
//! answer per origin for the duration of a run; a candidate id that sorts
//! after the cached answer forces a fresh lookup, so snapshots archived
//! while a long run is in progress are never shadowed by a stale entry.

use std::collections::HashMap;

use crate::errors::Result;
use crate::snapshot_id;
use crate::store::{ArchiveStore, TimeRange};

pub struct LatestResolver<'a> {
    store: &'a dyn ArchiveStore,
    range: TimeRange,
    cache: HashMap<String, Option<String>>,
    lookups: u64,
}

impl<'a> LatestResolver<'a> {
    /// Resolve over the full history of each origin.
    pub fn new(store: &'a dyn ArchiveStore) -> Self {
        Self::within(store, TimeRange::unbounded())
    }

    /// Resolve over snapshots created within `range` only.
    pub fn within(store: &'a dyn ArchiveStore, range: TimeRange) -> Self {
        Self {
            store,
            range,
            cache: HashMap::new(),
            lookups: 0,
        }
    }

    /// Latest snapshot id of the origin `candidate` belongs to, or `None`
    /// when the origin has no snapshot in range.
    pub async fn latest_for(&mut self, candidate: &str) -> Result<Option<String>> {
        let origin = snapshot_id::origin_of(candidate)?;
        if let Some(cached) = self.cache.get(origin) {
            let stale = cached.as_deref().map_or(true, |latest| candidate > latest);
            if !stale {
                return Ok(cached.clone());
            }
        }

        self.lookups += 1;
        let latest = self
            .store
            .snapshot_ids_by_origin(origin, self.range, 1, true)
            .await?
            .into_iter()
            .next();
        self.cache.insert(origin.to_string(), latest.clone());
        Ok(latest)
    }

    /// Whether `candidate` is the latest snapshot of its origin.
    pub async fn is_latest(&mut self, candidate: &str) -> Result<bool> {
        Ok(self.latest_for(candidate).await?.as_deref() == Some(candidate))
    }

    /// Number of store lookups performed so far.
    pub fn lookups(&self) -> u64 {
        self.lookups
    }
}
