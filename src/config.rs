//! Configuration management for the mirror redirector

use crate::error::{RedirectorError, Result};
use crate::geo::Coordinate;
use crate::remap::{RemapFormat, RemapSource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Configuration for the redirector service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectorConfig {
    /// Address the redirect server listens on (default: "0.0.0.0:8080")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Path to a MaxMind City database (optional)
    /// Without it every client resolves to the fallback coordinate
    #[serde(default)]
    pub geodb_path: Option<String>,

    /// Bearer token required by the reload endpoint
    /// If not set, reloads over HTTP are refused
    #[serde(default)]
    pub reload_token: Option<String>,

    /// Scheme used when the request carries none (default: "https")
    #[serde(default = "default_scheme")]
    pub default_scheme: String,

    /// Address looked up in place of loopback and private clients (default: 1.1.1.1)
    #[serde(default = "default_override_ip")]
    pub override_ip: Option<IpAddr>,

    /// Location used when the client cannot be located at all
    #[serde(default)]
    pub fallback_coordinate: Coordinate,

    /// First path segment that marks a region override (default: "region")
    #[serde(default = "default_region_marker")]
    pub region_marker: String,

    /// Metrics endpoint configuration (optional)
    #[serde(default)]
    pub metrics_endpoint: Option<MetricsEndpointConfig>,

    /// Path remap source (optional)
    #[serde(default)]
    pub remap: Option<RemapConfig>,

    /// Mirrors and region overrides, reloaded at runtime
    #[serde(flatten)]
    pub topology: TopologyConfig,
}

/// Mirror topology: the part of the configuration that hot reload replaces
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TopologyConfig {
    #[serde(default)]
    pub mirrors: Vec<MirrorConfig>,

    /// Region key to member hosts, in selection order
    #[serde(default)]
    pub regions: BTreeMap<String, Vec<String>>,
}

/// A single mirror entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MirrorConfig {
    pub host: String,

    /// Base path on the mirror (default: "/")
    #[serde(default = "default_mirror_path")]
    pub path: String,

    pub latitude: f64,
    pub longitude: f64,

    /// Weight for regional selection (default: 1)
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Whether the mirror may receive traffic (default: true)
    #[serde(default = "default_true")]
    pub available: bool,
}

/// Configuration for the metrics HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsEndpointConfig {
    /// Whether to enable the metrics endpoint (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Address to bind the metrics endpoint to (default: "127.0.0.1:9090")
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

/// Where the remap table comes from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemapConfig {
    pub path: PathBuf,

    /// Explicit format; inferred from the file extension when absent
    #[serde(default)]
    pub format: Option<RemapFormat>,
}

impl RemapConfig {
    pub fn resolved_format(&self) -> Result<RemapFormat> {
        match self.format {
            Some(format) => Ok(format),
            None => RemapFormat::from_path(&self.path),
        }
    }

    /// Read the remap file into memory
    pub fn load_source(&self) -> Result<RemapSource> {
        let format = self.resolved_format()?;
        let bytes = fs::read(&self.path).map_err(|e| {
            RedirectorError::ConfigError(format!(
                "Failed to read remap file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(RemapSource::new(bytes, format))
    }
}

impl Default for MetricsEndpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

// Default value functions for serde
fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_override_ip() -> Option<IpAddr> {
    Some(IpAddr::from([1, 1, 1, 1]))
}

fn default_region_marker() -> String {
    "region".to_string()
}

fn default_metrics_address() -> String {
    "127.0.0.1:9090".to_string()
}

fn default_mirror_path() -> String {
    "/".to_string()
}

fn default_weight() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl Default for RedirectorConfig {
    fn default() -> Self {
        RedirectorConfig {
            bind_address: default_bind_address(),
            geodb_path: None,
            reload_token: None,
            default_scheme: default_scheme(),
            override_ip: default_override_ip(),
            fallback_coordinate: Coordinate::default(),
            region_marker: default_region_marker(),
            metrics_endpoint: None,
            remap: None,
            topology: TopologyConfig::default(),
        }
    }
}

impl RedirectorConfig {
    /// Load configuration from a YAML file
    ///
    /// # Arguments
    /// * `path` - Path to the YAML configuration file
    ///
    /// # Returns
    /// * `Ok(RedirectorConfig)` if loading and validation succeed
    /// * `Err(RedirectorError)` if file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Self::parse_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML file without validating it
    ///
    /// Reloads use this so topology problems surface from the registry
    /// build rather than as a parse failure.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            RedirectorError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        Self::parse_yaml(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config = Self::parse_yaml(content)?;
        config.validate()?;
        Ok(config)
    }

    fn parse_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| {
            RedirectorError::ConfigError(format!("Failed to parse config file: {}", e))
        })
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - default_scheme must be "http" or "https"
    /// - region_marker must be a single non-empty path segment
    /// - fallback_coordinate must be a valid coordinate
    /// - the topology must be valid
    pub fn validate(&self) -> Result<()> {
        if self.default_scheme != "http" && self.default_scheme != "https" {
            return Err(RedirectorError::ConfigError(format!(
                "default_scheme must be 'http' or 'https', got '{}'",
                self.default_scheme
            )));
        }

        if self.region_marker.is_empty() || self.region_marker.contains('/') {
            return Err(RedirectorError::ConfigError(format!(
                "region_marker must be a single path segment, got '{}'",
                self.region_marker
            )));
        }

        if !self.fallback_coordinate.is_valid() {
            return Err(RedirectorError::ConfigError(format!(
                "fallback_coordinate out of range: {:?}",
                self.fallback_coordinate
            )));
        }

        if let Some(remap) = &self.remap {
            remap.resolved_format()?;
        }

        self.topology.validate()
    }

    /// Read the configured remap source, if any
    pub fn remap_source(&self) -> Result<Option<RemapSource>> {
        self.remap.as_ref().map(RemapConfig::load_source).transpose()
    }
}

impl TopologyConfig {
    /// Validate mirror entries and region references
    ///
    /// # Validation Rules
    /// - host must not be empty and must be unique
    /// - latitude within [-90, 90], longitude within [-180, 180]
    /// - every region member must name a configured host
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();

        for mirror in &self.mirrors {
            if mirror.host.trim().is_empty() {
                return Err(RedirectorError::ConfigError(
                    "mirror host must not be empty".to_string(),
                ));
            }

            if !seen.insert(mirror.host.as_str()) {
                return Err(RedirectorError::ConfigError(format!(
                    "duplicate mirror host '{}'",
                    mirror.host
                )));
            }

            if !Coordinate::new(mirror.latitude, mirror.longitude).is_valid() {
                return Err(RedirectorError::ConfigError(format!(
                    "mirror '{}' has invalid coordinates ({}, {})",
                    mirror.host, mirror.latitude, mirror.longitude
                )));
            }
        }

        for (region, hosts) in &self.regions {
            if let Some(unknown) = hosts.iter().find(|h| !seen.contains(h.as_str())) {
                return Err(RedirectorError::ConfigError(format!(
                    "region '{}' references unknown mirror '{}'",
                    region, unknown
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
bind_address: "127.0.0.1:8081"
reload_token: "secret"
fallback_coordinate:
  latitude: 50.0
  longitude: 8.0
remap:
  path: "dl_map.csv"
mirrors:
  - host: "fra.example.com"
    path: "/armbian"
    latitude: 50.11
    longitude: 8.68
    weight: 10
  - host: "nyc.example.com"
    latitude: 40.71
    longitude: -74.0
    available: false
regions:
  eu: ["fra.example.com"]
"#;

    #[test]
    fn test_default_config() {
        let config = RedirectorConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.default_scheme, "https");
        assert_eq!(config.region_marker, "region");
        assert_eq!(config.override_ip, Some(IpAddr::from([1, 1, 1, 1])));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_sample() {
        let config = RedirectorConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:8081");
        assert_eq!(config.reload_token.as_deref(), Some("secret"));
        assert_eq!(config.topology.mirrors.len(), 2);

        let fra = &config.topology.mirrors[0];
        assert_eq!(fra.weight, 10);
        assert!(fra.available);

        let nyc = &config.topology.mirrors[1];
        assert_eq!(nyc.path, "/");
        assert_eq!(nyc.weight, 1);
        assert!(!nyc.available);

        assert_eq!(config.topology.regions["eu"], vec!["fra.example.com".to_string()]);
        assert_eq!(
            config.remap.unwrap().resolved_format().unwrap(),
            RemapFormat::DelimitedText
        );
    }

    #[test]
    fn test_validate_bad_scheme() {
        let mut config = RedirectorConfig::default();
        config.default_scheme = "ftp".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_region_marker() {
        let mut config = RedirectorConfig::default();
        config.region_marker = "a/b".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_coordinates() {
        let mut config = RedirectorConfig::from_yaml(SAMPLE).unwrap();
        config.topology.mirrors[0].latitude = 123.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_duplicate_host() {
        let mut config = RedirectorConfig::from_yaml(SAMPLE).unwrap();
        config.topology.mirrors[1].host = "fra.example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_unknown_region_member() {
        let mut config = RedirectorConfig::from_yaml(SAMPLE).unwrap();
        config
            .topology
            .regions
            .insert("asia".to_string(), vec!["tokyo.example.com".to_string()]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unsupported_remap_extension() {
        let mut config = RedirectorConfig::default();
        config.remap = Some(RemapConfig {
            path: PathBuf::from("map.txt"),
            format: None,
        });
        assert!(config.validate().is_err());

        config.remap = Some(RemapConfig {
            path: PathBuf::from("map.txt"),
            format: Some(RemapFormat::DelimitedText),
        });
        assert!(config.validate().is_ok());
    }
}
