use mirror_redirector::config::RedirectorConfig;
use mirror_redirector::{RemapFormat, TopologyController};
use std::fs;
use std::net::IpAddr;
use tempfile::TempDir;

#[test]
fn test_load_sample_config() {
    let config = RedirectorConfig::from_file("redirector.yaml");
    assert!(config.is_ok(), "Failed to load sample config: {:?}", config.err());

    let config = config.unwrap();
    assert_eq!(config.bind_address, "0.0.0.0:8080");
    assert_eq!(config.reload_token.as_deref(), Some("change-me"));
    assert_eq!(config.topology.mirrors.len(), 4);
    assert_eq!(config.topology.regions.len(), 3);
    assert_eq!(
        config.topology.regions["eu"],
        vec!["mirror.example.de".to_string(), "mirror.example.nl".to_string()]
    );
    assert!(config.metrics_endpoint.as_ref().unwrap().enabled);

    let remap = config.remap_source().unwrap().unwrap();
    assert_eq!(remap.format, RemapFormat::DelimitedText);

    let controller = TopologyController::empty();
    let report = controller
        .reload(&config.topology, Some(&remap), "redirector.yaml")
        .unwrap();
    assert_eq!(report.mirrors, 4);
    assert_eq!(report.available_mirrors, 3);
    assert_eq!(report.remap_entries, Some(3));
}

#[test]
fn test_load_minimal_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("minimal.yaml");
    fs::write(
        &path,
        r#"
mirrors:
  - host: "only.example.com"
    latitude: 1.0
    longitude: 2.0
"#,
    )
    .unwrap();

    let config = RedirectorConfig::from_file(&path).unwrap();

    // Check defaults are applied
    assert_eq!(config.bind_address, "0.0.0.0:8080");
    assert_eq!(config.default_scheme, "https");
    assert_eq!(config.region_marker, "region");
    assert_eq!(config.override_ip, Some("1.1.1.1".parse::<IpAddr>().unwrap()));
    assert!(config.reload_token.is_none());
    assert!(config.remap.is_none());
    assert!(config.metrics_endpoint.is_none());

    let mirror = &config.topology.mirrors[0];
    assert_eq!(mirror.path, "/");
    assert_eq!(mirror.weight, 1);
    assert!(mirror.available);
    assert!(config.topology.regions.is_empty());
}

#[test]
fn test_explicit_remap_format() {
    let dir = TempDir::new().unwrap();
    let remap_path = dir.path().join("images.list");
    fs::write(&remap_path, r#"{"assets": []}"#).unwrap();

    let yaml = format!(
        "remap:\n  path: \"{}\"\n  format: asset_list\n",
        remap_path.display()
    );
    let config = RedirectorConfig::from_yaml(&yaml).unwrap();

    let remap = config.remap_source().unwrap().unwrap();
    assert_eq!(remap.format, RemapFormat::AssetList);
}

#[test]
fn test_missing_remap_file() {
    let config = RedirectorConfig::from_yaml("remap:\n  path: \"/nonexistent/dl_map.csv\"\n").unwrap();
    assert!(config.remap_source().is_err());
}

#[test]
fn test_missing_config_file() {
    let result = RedirectorConfig::from_file("/nonexistent/redirector.yaml");
    assert!(result.is_err());
}

#[test]
fn test_invalid_yaml() {
    assert!(RedirectorConfig::from_yaml("mirrors: [ {host: ").is_err());
    assert!(RedirectorConfig::from_yaml("mirrors:\n  - host: \"a\"\n").is_err());
}

#[test]
fn test_parse_file_skips_validation() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.yaml");
    fs::write(&path, "regions:\n  eu: [\"missing.example.com\"]\n").unwrap();

    assert!(RedirectorConfig::from_file(&path).is_err());
    let config = RedirectorConfig::parse_file(&path).unwrap();
    assert!(config.topology.validate().is_err());
}
