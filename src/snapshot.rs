//! Topology snapshots and the hot-reload controller
//!
//! A [`TopologySnapshot`] bundles the mirror registry, region overrides and
//! remap table of one configuration generation. Snapshots are immutable.
//! The [`TopologyController`] publishes a new snapshot with a single atomic
//! pointer swap, so a request that captured a snapshot sees one consistent
//! generation for its whole lifetime, and readers never wait on a reload.

use crate::config::TopologyConfig;
use crate::error::{ReloadStage, Result};
use crate::mirror::{MirrorRegistry, MirrorSummary};
use crate::remap::{RemapSource, RemapTable};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

/// One immutable generation of routing state
#[derive(Debug)]
pub struct TopologySnapshot {
    registry: MirrorRegistry,
    remap: Option<RemapTable>,
    loaded_at: DateTime<Utc>,
    source: String,
    generation: u64,
}

impl TopologySnapshot {
    /// Snapshot with no mirrors and no remap table
    pub fn empty() -> Self {
        Self::new(MirrorRegistry::new(), None, "empty", 0)
    }

    pub fn new(
        registry: MirrorRegistry,
        remap: Option<RemapTable>,
        source: impl Into<String>,
        generation: u64,
    ) -> Self {
        Self {
            registry,
            remap,
            loaded_at: Utc::now(),
            source: source.into(),
            generation,
        }
    }

    pub fn registry(&self) -> &MirrorRegistry {
        &self.registry
    }

    /// Remap table, `None` when no remap source is configured
    pub fn remap(&self) -> Option<&RemapTable> {
        self.remap.as_ref()
    }

    pub fn resolve_remap(&self, path: &str) -> Option<&str> {
        self.remap.as_ref().and_then(|table| table.resolve(path))
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn summary(&self) -> TopologySummary {
        TopologySummary {
            generation: self.generation,
            loaded_at: self.loaded_at,
            source: self.source.clone(),
            mirrors: self.registry.summaries(),
            regions: self.registry.region_hosts(),
            remap_entries: self.remap.as_ref().map(RemapTable::len),
        }
    }
}

/// Serializable view of the live topology
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopologySummary {
    pub generation: u64,
    pub loaded_at: DateTime<Utc>,
    pub source: String,
    pub mirrors: Vec<MirrorSummary>,
    pub regions: BTreeMap<String, Vec<String>>,
    pub remap_entries: Option<usize>,
}

/// Outcome of a successful reload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReloadReport {
    pub generation: u64,
    pub mirrors: usize,
    pub available_mirrors: usize,
    pub regions: usize,
    pub remap_entries: Option<usize>,
    /// Asset records dropped for unparsable URLs
    pub skipped_records: usize,
    /// Hosts present now but not in the previous generation
    pub added: Vec<String>,
    /// Hosts present in the previous generation but not now
    pub removed: Vec<String>,
}

impl ReloadReport {
    /// Check if the set of mirror hosts changed
    pub fn has_topology_changes(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    /// Get a summary of changes
    pub fn summary(&self) -> Vec<String> {
        let mut changes = Vec::new();

        for host in &self.added {
            changes.push(format!("+{}", host));
        }
        for host in &self.removed {
            changes.push(format!("-{}", host));
        }
        if self.skipped_records > 0 {
            changes.push(format!("skipped {} remap records", self.skipped_records));
        }

        changes
    }
}

/// Owner of the published snapshot
#[derive(Debug)]
pub struct TopologyController {
    current: ArcSwap<TopologySnapshot>,
    /// Serializes reloads; readers never touch it
    reload_lock: Mutex<()>,
}

impl TopologyController {
    pub fn new(initial: TopologySnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            reload_lock: Mutex::new(()),
        }
    }

    pub fn empty() -> Self {
        Self::new(TopologySnapshot::empty())
    }

    /// Latest published snapshot
    pub fn current(&self) -> Arc<TopologySnapshot> {
        self.current.load_full()
    }

    /// Build a new snapshot and publish it if every stage succeeds
    ///
    /// # Arguments
    /// * `topology` - Mirrors and region overrides
    /// * `remap` - Remap source, or `None` to run without a remap table
    /// * `source` - Label recorded in the snapshot (usually the config path)
    ///
    /// # Returns
    /// * `Ok(ReloadReport)` after the new snapshot is live
    /// * `Err(RedirectorError::Reload)` naming the failed stage; the
    ///   previously published snapshot stays live
    pub fn reload(
        &self,
        topology: &TopologyConfig,
        remap: Option<&RemapSource>,
        source: &str,
    ) -> Result<ReloadReport> {
        let _guard = self
            .reload_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let result = self.build_and_publish(topology, remap, source);
        if let Err(e) = &result {
            warn!("Reload from {} rejected, keeping current topology: {}", source, e);
        }
        result
    }

    fn build_and_publish(
        &self,
        topology: &TopologyConfig,
        remap: Option<&RemapSource>,
        source: &str,
    ) -> Result<ReloadReport> {
        let previous = self.current.load();
        let registry = MirrorRegistry::from_config_after(topology, previous.registry())
            .map_err(|e| e.at_stage(ReloadStage::Topology))?;

        let (remap_table, skipped_records) = match remap {
            Some(source) => {
                let load =
                    RemapTable::load(source).map_err(|e| e.at_stage(ReloadStage::RemapParse))?;
                (Some(load.table), load.skipped)
            }
            None => (None, 0),
        };

        let generation = previous.generation() + 1;

        let old_hosts = previous.registry().hosts();
        let new_hosts = registry.hosts();
        let mut added: Vec<String> = new_hosts
            .difference(&old_hosts)
            .map(|h| h.to_string())
            .collect();
        let mut removed: Vec<String> = old_hosts
            .difference(&new_hosts)
            .map(|h| h.to_string())
            .collect();
        added.sort();
        removed.sort();

        let report = ReloadReport {
            generation,
            mirrors: registry.servers().len(),
            available_mirrors: registry.available_count(),
            regions: topology.regions.len(),
            remap_entries: remap_table.as_ref().map(RemapTable::len),
            skipped_records,
            added,
            removed,
        };
        drop(previous);

        let snapshot = TopologySnapshot::new(registry, remap_table, source, generation);
        self.current.store(Arc::new(snapshot));

        info!(
            "Published topology generation {} from {}: {} mirrors ({} available), {} regions, {} remap entries",
            report.generation,
            source,
            report.mirrors,
            report.available_mirrors,
            report.regions,
            report.remap_entries.unwrap_or(0)
        );

        Ok(report)
    }

    pub fn summary(&self) -> TopologySummary {
        self.current.load().summary()
    }

    /// Block reloads until the guard drops
    #[cfg(test)]
    pub(crate) fn hold_reload_lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.reload_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve a path against the live remap table
    pub fn resolve_remap(&self, path: &str) -> Option<String> {
        self.current.load().resolve_remap(path).map(str::to_string)
    }
}

impl Default for TopologyController {
    fn default() -> Self {
        Self::empty()
    }
}
