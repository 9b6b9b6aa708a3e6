//! Client location lookup
//!
//! The redirect engine only needs `IP -> coordinate`. Any lookup failure is
//! treated the same way by the caller: the configured fallback coordinate is
//! used instead.

use crate::error::{RedirectorError, Result};
use crate::geo::Coordinate;
use maxminddb::{geoip2, Reader};
use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use tracing::info;

/// IP to coordinate resolver
pub trait GeoLocator: Send + Sync {
    /// Resolve an address to a coordinate
    ///
    /// Returns `LocationUnavailable` when the address is unknown.
    fn locate(&self, ip: IpAddr) -> Result<Coordinate>;
}

/// Locator backed by a MaxMind City database
pub struct MaxMindLocator {
    reader: Reader<Vec<u8>>,
}

impl MaxMindLocator {
    /// Open a `.mmdb` City database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| {
            RedirectorError::ConfigError(format!(
                "Failed to read GeoIP database {}: {}",
                path.display(),
                e
            ))
        })?;

        let reader = Reader::from_source(bytes).map_err(|e| {
            RedirectorError::ConfigError(format!(
                "Failed to parse GeoIP database {}: {}",
                path.display(),
                e
            ))
        })?;

        info!(
            "Loaded GeoIP database {} ({}, build_{})",
            path.display(),
            reader.metadata.database_type,
            reader.metadata.build_epoch
        );
        Ok(Self { reader })
    }
}

impl GeoLocator for MaxMindLocator {
    fn locate(&self, ip: IpAddr) -> Result<Coordinate> {
        let lookup = self
            .reader
            .lookup(ip)
            .map_err(|e| RedirectorError::LocationUnavailable(format!("{}: {}", ip, e)))?;

        if !lookup.has_data() {
            return Err(RedirectorError::LocationUnavailable(format!(
                "{}: not in database",
                ip
            )));
        }

        let city: geoip2::City = lookup
            .decode()
            .map_err(|e| RedirectorError::LocationUnavailable(format!("{}: {}", ip, e)))?
            .ok_or_else(|| {
                RedirectorError::LocationUnavailable(format!("{}: no city record", ip))
            })?;

        match (city.location.latitude, city.location.longitude) {
            (Some(latitude), Some(longitude)) => Ok(Coordinate::new(latitude, longitude)),
            _ => Err(RedirectorError::LocationUnavailable(format!(
                "{}: incomplete location record",
                ip
            ))),
        }
    }
}

/// Fixed address table
///
/// Useful when no database is deployed, and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticLocator {
    locations: HashMap<IpAddr, Coordinate>,
}

impl StaticLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_location(mut self, ip: IpAddr, coordinate: Coordinate) -> Self {
        self.locations.insert(ip, coordinate);
        self
    }
}

impl GeoLocator for StaticLocator {
    fn locate(&self, ip: IpAddr) -> Result<Coordinate> {
        self.locations
            .get(&ip)
            .copied()
            .ok_or_else(|| RedirectorError::LocationUnavailable(ip.to_string()))
    }
}

/// Check for loopback, private, link-local, unique-local and unspecified addresses
///
/// These never appear in a GeoIP database, so callers substitute a public
/// address for them.
pub fn is_internal(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_internal(IpAddr::V4(v4));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
        }
    }
}
