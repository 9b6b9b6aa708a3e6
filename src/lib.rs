//! Mirror Redirector
//!
//! A geography-aware HTTP redirect dispatcher for a network of download
//! mirrors. Every request is answered with a `302 Found` pointing at the
//! best mirror for the client: the nearest available one, or a weighted
//! random pick from a region-pinned override list.
//!
//! # Overview
//!
//! For each request the redirector
//!
//! 1. locates the client by IP address (MaxMind City database),
//! 2. picks a mirror from the live topology snapshot,
//! 3. rewrites the path under the mirror's base path, optionally through a
//!    remap table of stable aliases,
//! 4. answers with the redirect and an `X-Geo-Distance` header.
//!
//! Mirror topology and the remap table are hot-reloadable. A reload builds a
//! complete new snapshot and publishes it with one atomic swap; requests in
//! flight keep the snapshot they started with.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mirror_redirector::{
//!     RedirectEngine, RedirectSettings, RedirectorConfig, RedirectorMetrics, StaticLocator,
//!     TopologyController,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RedirectorConfig::from_file("redirector.yaml")?;
//!
//! let controller = Arc::new(TopologyController::empty());
//! controller.reload(&config.topology, config.remap_source()?.as_ref(), "redirector.yaml")?;
//!
//! let engine = RedirectEngine::new(
//!     controller,
//!     Arc::new(StaticLocator::new()),
//!     RedirectorMetrics::new()?,
//!     RedirectSettings::from_config(&config),
//! );
//!
//! let decision = engine.decide("/images/board.img.xz", None, "203.0.113.7".parse()?)?;
//! println!("Location: {}", decision.location()?);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`geo`]: great-circle distance
//! - [`MirrorRegistry`]: mirrors, nearest search, weighted region overrides
//! - [`RemapTable`]: exact-match path aliases from delimited text or a
//!   release asset list
//! - [`TopologyController`]: snapshot publication and serialized reloads
//! - [`RedirectEngine`]: per-request decision
//! - [`RedirectServer`], [`ReloadHandler`], [`MetricsEndpoint`]: HTTP surface
//!
//! # Configuration
//!
//! ```yaml
//! bind_address: "0.0.0.0:8080"
//! geodb_path: "GeoLite2-City.mmdb"
//! reload_token: "secret"
//! remap:
//!   path: "dl_map.csv"
//! mirrors:
//!   - host: "fra.example.com"
//!     path: "/armbian"
//!     latitude: 50.11
//!     longitude: 8.68
//!     weight: 10
//! regions:
//!   eu: ["fra.example.com"]
//! ```
//!
//! See [`RedirectorConfig`] for every option.

pub mod assets;
pub mod config;
pub mod error;
pub mod geo;
pub mod geoip;
pub mod metrics;
pub mod metrics_endpoint;
pub mod mirror;
pub mod redirect;
pub mod reload_handler;
pub mod remap;
pub mod server;
pub mod snapshot;
pub mod weighted;

pub use assets::{AssetKeys, AssetList, ReleaseAsset};
pub use config::{MetricsEndpointConfig, MirrorConfig, RedirectorConfig, RemapConfig, TopologyConfig};
pub use error::{RedirectorError, ReloadStage, Result};
pub use geo::{distance, Coordinate};
pub use geoip::{GeoLocator, MaxMindLocator, StaticLocator};
pub use metrics::{MetricsSnapshot, RedirectorMetrics};
pub use metrics_endpoint::MetricsEndpoint;
pub use mirror::{MirrorRegistry, MirrorServer, MirrorSummary};
pub use redirect::{ClientLocation, RedirectDecision, RedirectEngine, RedirectSettings};
pub use reload_handler::{ReloadHandler, ReloadResponse};
pub use remap::{RemapFormat, RemapLoad, RemapSource, RemapTable};
pub use server::RedirectServer;
pub use snapshot::{ReloadReport, TopologyController, TopologySnapshot, TopologySummary};
pub use weighted::{weighted_choice, Choice};
