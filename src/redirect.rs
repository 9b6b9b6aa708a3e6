//! Redirect decision engine
//!
//! Turns `(path, scheme, client address)` into a [`RedirectDecision`]:
//! capture the live snapshot, locate the client, pick a mirror (region
//! override first, nearest otherwise), apply the remap table and build the
//! target path under the mirror's base path.

use crate::config::RedirectorConfig;
use crate::error::{RedirectorError, Result};
use crate::geo::Coordinate;
use crate::geoip::{is_internal, GeoLocator};
use crate::metrics::RedirectorMetrics;
use crate::mirror::MirrorServer;
use crate::snapshot::TopologyController;
use rand::Rng;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Request-independent settings of the engine
#[derive(Debug, Clone, PartialEq)]
pub struct RedirectSettings {
    pub default_scheme: String,
    /// Looked up in place of loopback and private client addresses
    pub override_ip: Option<IpAddr>,
    pub fallback_coordinate: Coordinate,
    pub region_marker: String,
}

impl Default for RedirectSettings {
    fn default() -> Self {
        Self::from_config(&RedirectorConfig::default())
    }
}

impl RedirectSettings {
    pub fn from_config(config: &RedirectorConfig) -> Self {
        Self {
            default_scheme: config.default_scheme.clone(),
            override_ip: config.override_ip,
            fallback_coordinate: config.fallback_coordinate,
            region_marker: config.region_marker.clone(),
        }
    }
}

/// Where a request should be sent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedirectDecision {
    pub scheme: String,
    pub host: String,
    pub path: String,
    /// Kilometers to the mirror; only set by nearest selection
    pub distance: Option<f64>,
    /// Region key when a region override picked the mirror
    pub region: Option<String>,
    pub remapped: bool,
}

impl RedirectDecision {
    /// Absolute redirect URL with the path percent-encoded
    pub fn location(&self) -> Result<Url> {
        let mut url = Url::parse(&format!("{}://{}", self.scheme, self.host)).map_err(|e| {
            RedirectorError::InternalError(format!(
                "invalid redirect target {}://{}: {}",
                self.scheme, self.host, e
            ))
        })?;
        url.set_path(&self.path);
        Ok(url)
    }
}

/// How a client address was resolved
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientLocation {
    pub ip: IpAddr,
    /// Address actually looked up; differs from `ip` for internal clients
    pub lookup_ip: IpAddr,
    pub latitude: f64,
    pub longitude: f64,
    /// False when the fallback coordinate was used
    pub resolved: bool,
}

impl ClientLocation {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// Per-request routing over the live topology
pub struct RedirectEngine {
    controller: Arc<TopologyController>,
    locator: Arc<dyn GeoLocator>,
    metrics: RedirectorMetrics,
    settings: RedirectSettings,
}

impl RedirectEngine {
    pub fn new(
        controller: Arc<TopologyController>,
        locator: Arc<dyn GeoLocator>,
        metrics: RedirectorMetrics,
        settings: RedirectSettings,
    ) -> Self {
        Self {
            controller,
            locator,
            metrics,
            settings,
        }
    }

    pub fn controller(&self) -> &Arc<TopologyController> {
        &self.controller
    }

    pub fn metrics(&self) -> &RedirectorMetrics {
        &self.metrics
    }

    pub fn settings(&self) -> &RedirectSettings {
        &self.settings
    }

    /// Decide where to send a request, using the thread-local random source
    pub fn decide(
        &self,
        path: &str,
        scheme: Option<&str>,
        client_ip: IpAddr,
    ) -> Result<RedirectDecision> {
        self.decide_with_rng(path, scheme, client_ip, &mut rand::rng())
    }

    /// Decide where to send a request
    ///
    /// # Arguments
    /// * `path` - Request path as received, including any region prefix
    /// * `scheme` - Request scheme, or `None` to use the default
    /// * `client_ip` - Peer address of the client
    /// * `rng` - Random source for weighted regional selection
    ///
    /// # Returns
    /// * `Ok(RedirectDecision)` with the chosen mirror and target path
    /// * `Err(NoAvailableMirror)` if no mirror can take the request
    pub fn decide_with_rng<R: Rng>(
        &self,
        path: &str,
        scheme: Option<&str>,
        client_ip: IpAddr,
        rng: &mut R,
    ) -> Result<RedirectDecision> {
        // One snapshot for the whole request
        let snapshot = self.controller.current();
        let registry = snapshot.registry();

        let mut regional: Option<(Arc<MirrorServer>, &str, &str)> = None;

        if let Some((region, rest)) = split_region(path, &self.settings.region_marker) {
            match registry.select_regional(region, rng) {
                Ok(Some(server)) => regional = Some((server, region, rest)),
                Ok(None) => debug!("No override for region '{}', using nearest mirror", region),
                Err(e) if e.falls_back_to_nearest() => {
                    warn!("{}, using nearest mirror", e);
                }
                Err(e) => return Err(e),
            }
        }

        let (server, effective_path, distance, region) = match regional {
            Some((server, region, rest)) => (server, rest, None, Some(region.to_string())),
            None => {
                let location = self.locate_client(client_ip);
                match registry.nearest(location.coordinate()) {
                    Ok((server, d)) => (server, path, Some(d), None),
                    Err(e) => {
                        self.metrics.record_no_mirror();
                        warn!("No mirror for {} requested by {}: {}", path, client_ip, e);
                        return Err(e);
                    }
                }
            }
        };

        let (target, remapped) = match snapshot.resolve_remap(effective_path) {
            Some(alias) => (alias, true),
            None => (effective_path, false),
        };

        let mut redirect_path = join_path(&server.path, target);
        // Judged on the path below the region prefix, so `/region/eu/` is the bare base path
        if effective_path.ends_with('/') && !redirect_path.ends_with('/') {
            redirect_path.push('/');
        }

        server.record_redirect();
        self.metrics.record_redirect(&server.host, remapped);

        let scheme = scheme
            .filter(|s| !s.is_empty())
            .unwrap_or(self.settings.default_scheme.as_str());

        let decision = RedirectDecision {
            scheme: scheme.to_string(),
            host: server.host.clone(),
            path: redirect_path,
            distance,
            region,
            remapped,
        };

        debug!(
            "Redirecting {} for {} to {}{} (distance: {:?}, region: {:?}, remapped: {})",
            path,
            client_ip,
            decision.host,
            decision.path,
            decision.distance,
            decision.region,
            decision.remapped
        );

        Ok(decision)
    }

    /// Resolve a client address to a coordinate
    ///
    /// Internal addresses are looked up as the override address; any lookup
    /// failure yields the fallback coordinate.
    pub fn locate_client(&self, ip: IpAddr) -> ClientLocation {
        let lookup_ip = match self.settings.override_ip {
            Some(override_ip) if is_internal(ip) => override_ip,
            _ => ip,
        };

        let (coordinate, resolved) = match self.locator.locate(lookup_ip) {
            Ok(coordinate) => (coordinate, true),
            Err(e) => {
                debug!("Using fallback coordinate for {}: {}", ip, e);
                (self.settings.fallback_coordinate, false)
            }
        };

        ClientLocation {
            ip,
            lookup_ip,
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            resolved,
        }
    }
}

/// Split `/<marker>/<region>/<rest>` into `(region, rest)`
///
/// `rest` has no leading slash. Paths whose first segment is not exactly the
/// marker, or that carry no region segment, are not regional.
pub fn split_region<'a>(path: &'a str, marker: &str) -> Option<(&'a str, &'a str)> {
    let mut parts = path.strip_prefix('/')?.splitn(3, '/');
    if parts.next()? != marker {
        return None;
    }
    let region = parts.next()?;
    Some((region, parts.next().unwrap_or("")))
}

/// Join `rest` under `base` and clean the result
///
/// Empty and `.` segments are dropped, `..` removes the previous segment and
/// never climbs above the root. The result is always absolute and has no
/// trailing slash unless it is the root.
pub fn join_path(base: &str, rest: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in base.split('/').chain(rest.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    format!("/{}", segments.join("/"))
}
