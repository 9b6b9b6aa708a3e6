//! Mirror servers and the per-snapshot mirror registry
//!
//! The registry is immutable once built. It answers two questions for the
//! redirect engine: which available mirror is closest to a coordinate, and
//! which mirror a region override should send a request to.

use crate::config::TopologyConfig;
use crate::error::{RedirectorError, Result};
use crate::geo::{distance, Coordinate};
use crate::weighted::{weighted_choice, Choice};
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A single download mirror
#[derive(Debug)]
pub struct MirrorServer {
    /// Authority used in the redirect URL
    pub host: String,
    /// Path prefix prepended to every redirect target
    pub path: String,
    pub location: Coordinate,
    /// Only consulted by weighted regional selection
    pub weight: u32,
    pub available: bool,
    /// Shared with the same host in later generations
    redirects: Arc<AtomicU64>,
}

impl MirrorServer {
    pub fn new(host: impl Into<String>, path: impl Into<String>, location: Coordinate) -> Self {
        Self {
            host: host.into(),
            path: normalize_base_path(&path.into()),
            location,
            weight: 1,
            available: true,
            redirects: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    /// Continue counting on the counter of an earlier registration of this host
    pub fn with_counter_from(mut self, previous: &MirrorServer) -> Self {
        self.redirects = Arc::clone(&previous.redirects);
        self
    }

    /// Count one redirect served by this mirror
    pub fn record_redirect(&self) {
        self.redirects.fetch_add(1, Ordering::Relaxed);
    }

    /// Redirects served by this host since it was first registered
    pub fn redirects(&self) -> u64 {
        self.redirects.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> MirrorSummary {
        MirrorSummary {
            host: self.host.clone(),
            path: self.path.clone(),
            latitude: self.location.latitude,
            longitude: self.location.longitude,
            weight: self.weight,
            available: self.available,
            redirects: self.redirects(),
        }
    }
}

/// Serializable view of a mirror and its counter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MirrorSummary {
    pub host: String,
    pub path: String,
    pub latitude: f64,
    pub longitude: f64,
    pub weight: u32,
    pub available: bool,
    pub redirects: u64,
}

/// Immutable set of mirrors plus region override lists
#[derive(Debug, Default)]
pub struct MirrorRegistry {
    /// Registration order, used to break distance ties
    servers: Vec<Arc<MirrorServer>>,
    regions: HashMap<String, Vec<Arc<MirrorServer>>>,
}

impl MirrorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from the topology section of the configuration
    ///
    /// Fails when a mirror is malformed, a host is registered twice, or a
    /// region names a host that is not configured.
    pub fn from_config(config: &TopologyConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Build a registry that keeps the redirect counters of `previous`
    ///
    /// Hosts present in both registries share one counter, so reloading
    /// never resets a mirror's count.
    pub fn from_config_after(config: &TopologyConfig, previous: &MirrorRegistry) -> Result<Self> {
        Self::build(config, Some(previous))
    }

    fn build(config: &TopologyConfig, previous: Option<&MirrorRegistry>) -> Result<Self> {
        config.validate()?;

        let mut registry = MirrorRegistry::new();
        for mirror in &config.mirrors {
            let server = MirrorServer::new(
                mirror.host.clone(),
                mirror.path.clone(),
                Coordinate::new(mirror.latitude, mirror.longitude),
            )
            .with_weight(mirror.weight)
            .with_available(mirror.available);

            let server = match previous.and_then(|p| p.server(&mirror.host)) {
                Some(earlier) => server.with_counter_from(earlier),
                None => server,
            };
            registry.add_server(server)?;
        }

        for (region, hosts) in &config.regions {
            registry.add_region(region, hosts.as_slice())?;
        }

        Ok(registry)
    }

    /// Register a mirror; later registrations lose distance ties
    pub fn add_server(&mut self, server: MirrorServer) -> Result<Arc<MirrorServer>> {
        if self.server(&server.host).is_some() {
            return Err(RedirectorError::ConfigError(format!(
                "duplicate mirror host '{}'",
                server.host
            )));
        }
        let server = Arc::new(server);
        self.servers.push(Arc::clone(&server));
        Ok(server)
    }

    /// Pin a region key to an ordered list of registered hosts
    pub fn add_region<S: AsRef<str>>(&mut self, region: &str, hosts: &[S]) -> Result<()> {
        let mut members = Vec::with_capacity(hosts.len());
        for host in hosts {
            let host = host.as_ref();
            let server = self.server(host).ok_or_else(|| {
                RedirectorError::ConfigError(format!(
                    "region '{}' references unknown mirror '{}'",
                    region, host
                ))
            })?;
            members.push(Arc::clone(server));
        }
        self.regions.insert(region.to_string(), members);
        Ok(())
    }

    pub fn server(&self, host: &str) -> Option<&Arc<MirrorServer>> {
        self.servers.iter().find(|s| s.host == host)
    }

    pub fn servers(&self) -> &[Arc<MirrorServer>] {
        &self.servers
    }

    pub fn region(&self, key: &str) -> Option<&[Arc<MirrorServer>]> {
        self.regions.get(key).map(Vec::as_slice)
    }

    pub fn available_count(&self) -> usize {
        self.servers.iter().filter(|s| s.available).count()
    }

    /// Find the closest available mirror and its distance in kilometers
    ///
    /// Equal distances go to the mirror registered first.
    pub fn nearest(&self, client: Coordinate) -> Result<(Arc<MirrorServer>, f64)> {
        let mut best: Option<(&Arc<MirrorServer>, f64)> = None;

        for server in self.servers.iter().filter(|s| s.available) {
            let d = distance(client, server.location);
            match best {
                Some((_, best_distance)) if d >= best_distance => {}
                _ => best = Some((server, d)),
            }
        }

        best.map(|(server, d)| (Arc::clone(server), d))
            .ok_or(RedirectorError::NoAvailableMirror)
    }

    /// Pick a mirror for a region override with one weighted draw
    ///
    /// # Returns
    /// * `Ok(None)` if the region has no override list
    /// * `Ok(Some(server))` with the drawn mirror
    /// * `Err(RegionUnavailable)` if every region member is unavailable
    pub fn select_regional<R: Rng>(
        &self,
        region: &str,
        rng: &mut R,
    ) -> Result<Option<Arc<MirrorServer>>> {
        let members = match self.regions.get(region) {
            Some(members) => members,
            None => return Ok(None),
        };

        let choices: Vec<Choice<&Arc<MirrorServer>>> = members
            .iter()
            .filter(|s| s.available)
            .map(|s| Choice::new(s, s.weight))
            .collect();

        weighted_choice(&choices, rng)
            .map(|server| Some(Arc::clone(*server)))
            .ok_or_else(|| RedirectorError::RegionUnavailable(region.to_string()))
    }

    pub fn summaries(&self) -> Vec<MirrorSummary> {
        self.servers.iter().map(|s| s.summary()).collect()
    }

    /// Region keys mapped to member hosts, sorted for stable output
    pub fn region_hosts(&self) -> BTreeMap<String, Vec<String>> {
        self.regions
            .iter()
            .map(|(key, members)| (key.clone(), members.iter().map(|s| s.host.clone()).collect()))
            .collect()
    }

    pub fn hosts(&self) -> HashSet<&str> {
        self.servers.iter().map(|s| s.host.as_str()).collect()
    }
}

fn normalize_base_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", trimmed)
    }
}
