//! End-to-end redirect decisions
//!
//! Builds a topology from YAML, publishes it through the controller and
//! drives the engine the way the HTTP server does.

use mirror_redirector::{
    Coordinate, RedirectEngine, RedirectSettings, RedirectorConfig, RedirectorError,
    RedirectorMetrics, RemapFormat, RemapSource, StaticLocator, TopologyController,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::net::IpAddr;
use std::sync::Arc;

const CONFIG: &str = r#"
mirrors:
  - host: "m1.example.com"
    path: "/armbian"
    latitude: 52.37
    longitude: 4.90
    weight: 1
  - host: "m2.example.com"
    path: "/mirror/armbian"
    latitude: 48.14
    longitude: 11.58
    weight: 5
  - host: "m3.example.com"
    path: "/"
    latitude: -33.87
    longitude: 151.21
    available: false
regions:
  eu: ["m2.example.com"]
  au: ["m3.example.com"]
"#;

fn client_near_m1() -> IpAddr {
    "198.51.100.20".parse().unwrap()
}

fn setup(remap: Option<&str>) -> (RedirectEngine, Arc<TopologyController>) {
    let config = RedirectorConfig::from_yaml(CONFIG).unwrap();
    let controller = Arc::new(TopologyController::empty());
    let source = remap.map(|text| RemapSource::new(text, RemapFormat::DelimitedText));
    controller
        .reload(&config.topology, source.as_ref(), "test")
        .unwrap();

    // Utrecht, a few dozen kilometers from m1
    let locator = StaticLocator::new().with_location(client_near_m1(), Coordinate::new(52.09, 5.12));

    let engine = RedirectEngine::new(
        Arc::clone(&controller),
        Arc::new(locator),
        RedirectorMetrics::new().unwrap(),
        RedirectSettings::from_config(&config),
    );
    (engine, controller)
}

#[test]
fn test_nearest_mirror_without_remap() {
    let (engine, _) = setup(Some("other/path|somewhere/else\n"));

    let decision = engine.decide("/foo/bar", None, client_near_m1()).unwrap();

    assert_eq!(decision.host, "m1.example.com");
    assert_eq!(decision.path, "/armbian/foo/bar");
    assert_eq!(decision.scheme, "https");
    assert!(!decision.remapped);
    assert!(decision.region.is_none());

    let distance = decision.distance.unwrap();
    assert!(distance > 0.0 && distance < 50.0, "distance {}", distance);

    assert_eq!(
        decision.location().unwrap().as_str(),
        "https://m1.example.com/armbian/foo/bar"
    );
}

#[test]
fn test_region_override_with_remap() {
    let (engine, _) = setup(Some("file.img|images/file-v2.img\n"));
    let mut rng = StdRng::seed_from_u64(11);

    let decision = engine
        .decide_with_rng("/region/eu/file.img", None, client_near_m1(), &mut rng)
        .unwrap();

    assert_eq!(decision.host, "m2.example.com");
    assert_eq!(decision.path, "/mirror/armbian/images/file-v2.img");
    assert_eq!(decision.region.as_deref(), Some("eu"));
    assert!(decision.remapped);
    assert!(decision.distance.is_none());
}

#[test]
fn test_unavailable_region_falls_back_to_nearest() {
    let (engine, _) = setup(None);

    let decision = engine
        .decide("/region/au/file.img", None, client_near_m1())
        .unwrap();

    assert_eq!(decision.host, "m1.example.com");
    assert_eq!(decision.path, "/armbian/region/au/file.img");
    assert!(decision.region.is_none());
}

#[test]
fn test_internal_client_without_geoip_uses_fallback() {
    let (engine, _) = setup(None);

    // Fallback coordinate defaults to (0, 0): m2 in Munich is closer than m1
    let decision = engine
        .decide("/foo", None, "10.0.0.5".parse().unwrap())
        .unwrap();
    assert_eq!(decision.host, "m2.example.com");
}

#[test]
fn test_counters_follow_snapshot() {
    let (engine, controller) = setup(None);

    engine.decide("/a", None, client_near_m1()).unwrap();
    engine.decide("/b", None, client_near_m1()).unwrap();

    let summary = controller.summary();
    let m1 = summary
        .mirrors
        .iter()
        .find(|m| m.host == "m1.example.com")
        .unwrap();
    assert_eq!(m1.redirects, 2);
    assert_eq!(engine.metrics().get_stats().redirects, 2);
}

#[test]
fn test_counters_survive_identical_reload() {
    let (engine, controller) = setup(None);
    engine.decide("/x", None, client_near_m1()).unwrap();
    engine.decide("/x", None, client_near_m1()).unwrap();

    let config = RedirectorConfig::from_yaml(CONFIG).unwrap();
    controller.reload(&config.topology, None, "again").unwrap();
    engine.decide("/x", None, client_near_m1()).unwrap();

    let summary = controller.summary();
    let m1 = summary
        .mirrors
        .iter()
        .find(|m| m.host == "m1.example.com")
        .unwrap();
    assert_eq!(summary.generation, 2);
    assert_eq!(m1.redirects, 3);
}

#[test]
fn test_trailing_slash_follows_path_after_region_prefix() {
    let (engine, _) = setup(None);
    let mut rng = StdRng::seed_from_u64(5);

    // Nothing after the region key: the mirror base path, no slash added
    let decision = engine
        .decide_with_rng("/region/eu/", None, client_near_m1(), &mut rng)
        .unwrap();
    assert_eq!(decision.host, "m2.example.com");
    assert_eq!(decision.path, "/mirror/armbian");

    let decision = engine
        .decide_with_rng("/region/eu/pool/", None, client_near_m1(), &mut rng)
        .unwrap();
    assert_eq!(decision.path, "/mirror/armbian/pool/");

    let decision = engine.decide("/pool/", None, client_near_m1()).unwrap();
    assert_eq!(decision.path, "/armbian/pool/");
}

#[test]
fn test_no_available_mirror_fails_request() {
    let yaml = CONFIG.replace("weight: 1\n", "weight: 1\n    available: false\n")
        .replace("weight: 5\n", "weight: 5\n    available: false\n");
    let config = RedirectorConfig::from_yaml(&yaml).unwrap();

    let controller = Arc::new(TopologyController::empty());
    controller.reload(&config.topology, None, "test").unwrap();
    let engine = RedirectEngine::new(
        controller,
        Arc::new(StaticLocator::new()),
        RedirectorMetrics::new().unwrap(),
        RedirectSettings::from_config(&config),
    );

    let err = engine.decide("/foo", None, client_near_m1()).unwrap_err();
    assert!(matches!(err, RedirectorError::NoAvailableMirror));
    assert_eq!(err.to_http_status(), 500);
}
