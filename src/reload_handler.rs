//! Authenticated topology reload over HTTP
//!
//! `POST /reload` (or `GET`) with `Authorization: Bearer <token>` re-reads the
//! configuration file and the remap source it points to, then asks the
//! [`TopologyController`] to publish a new snapshot. The response is JSON:
//!
//! ```json
//! {"success": true, "stage": null, "message": "...", "report": {...}}
//! ```

use crate::config::RedirectorConfig;
use crate::error::{RedirectorError, ReloadStage, Result};
use crate::metrics::RedirectorMetrics;
use crate::snapshot::{ReloadReport, TopologyController};
use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Reload request handler
#[derive(Clone)]
pub struct ReloadHandler {
    controller: Arc<TopologyController>,
    /// Configuration file re-read on every reload
    config_path: PathBuf,
    /// Expected bearer token; without one every request is refused
    auth_token: Option<String>,
    /// Prometheus metrics (optional)
    metrics: Option<RedirectorMetrics>,
}

/// Reload response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub success: bool,
    /// Failed stage, when the reload was rejected
    pub stage: Option<String>,
    pub message: String,
    pub report: Option<ReloadReport>,
}

impl ReloadHandler {
    /// Create a handler that refuses every request until a token is set
    pub fn new(controller: Arc<TopologyController>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            controller,
            config_path: config_path.into(),
            auth_token: None,
            metrics: None,
        }
    }

    /// Require `Authorization: Bearer <auth_token>`
    pub fn with_auth(mut self, auth_token: Option<String>) -> Self {
        self.auth_token = auth_token.filter(|t| !t.is_empty());
        self
    }

    /// Enable Prometheus metrics
    pub fn with_metrics(mut self, metrics: RedirectorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Handle an HTTP reload request
    pub async fn handle_reload<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>> {
        if req.method() != Method::POST && req.method() != Method::GET {
            return self.error_response(
                StatusCode::METHOD_NOT_ALLOWED,
                None,
                "Only GET and POST are allowed",
            );
        }

        if let Err(e) = self.check_auth(&req) {
            if let Some(metrics) = &self.metrics {
                metrics.record_auth_failure();
            }
            warn!("Rejected reload request: {}", e);
            return self.error_response(StatusCode::UNAUTHORIZED, None, &e.to_string());
        }

        match self.spawn_reload().await {
            Ok(report) => {
                let changes = report.summary();
                let message = if changes.is_empty() {
                    format!("Reloaded topology generation {}", report.generation)
                } else {
                    format!(
                        "Reloaded topology generation {}: {}",
                        report.generation,
                        changes.join(", ")
                    )
                };

                let response = ReloadResponse {
                    success: true,
                    stage: None,
                    message,
                    report: Some(report),
                };
                self.json_response(StatusCode::OK, &response)
            }
            Err(e) => {
                let stage = e.reload_stage().map(|s| s.to_string());
                self.error_response(StatusCode::INTERNAL_SERVER_ERROR, stage, &e.to_string())
            }
        }
    }

    /// Re-read the configuration and publish a new snapshot
    ///
    /// Reading the config or remap file fails at the `config` stage; the
    /// controller reports `topology` and `remap_parse` failures. On any
    /// failure the live snapshot is untouched.
    pub fn reload(&self) -> Result<ReloadReport> {
        let result = self.load_and_publish();

        if let Some(metrics) = &self.metrics {
            metrics.record_reload(result.is_ok());
        }

        match &result {
            Ok(report) => info!(
                "Reload from {} succeeded: generation {}, {} mirrors",
                self.config_path.display(),
                report.generation,
                report.mirrors
            ),
            Err(e) => warn!("Reload from {} failed: {}", self.config_path.display(), e),
        }

        result
    }

    /// Run [`reload`](Self::reload) on the blocking thread pool
    ///
    /// File reads and waiting on a concurrent reload stay off the runtime
    /// worker threads that serve redirects.
    pub async fn spawn_reload(&self) -> Result<ReloadReport> {
        let handler = self.clone();
        tokio::task::spawn_blocking(move || handler.reload())
            .await
            .map_err(|e| RedirectorError::InternalError(format!("Reload task failed: {}", e)))?
    }

    fn load_and_publish(&self) -> Result<ReloadReport> {
        let config = RedirectorConfig::parse_file(&self.config_path)
            .map_err(|e| e.at_stage(ReloadStage::Config))?;

        let remap = config
            .remap_source()
            .map_err(|e| e.at_stage(ReloadStage::Config))?;

        let source = self.config_path.display().to_string();
        self.controller
            .reload(&config.topology, remap.as_ref(), &source)
    }

    /// Check the bearer token
    fn check_auth<B>(&self, req: &Request<B>) -> Result<()> {
        let expected_token = self
            .auth_token
            .as_deref()
            .ok_or(RedirectorError::Unauthorized)?;

        let token = req
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|auth| auth.strip_prefix("Bearer "))
            .ok_or(RedirectorError::Unauthorized)?;

        if token == expected_token {
            Ok(())
        } else {
            Err(RedirectorError::Unauthorized)
        }
    }

    /// Build JSON response
    fn json_response(
        &self,
        status: StatusCode,
        body: &ReloadResponse,
    ) -> Result<Response<Full<Bytes>>> {
        let json = serde_json::to_string(body).map_err(|e| {
            RedirectorError::InternalError(format!("Failed to serialize response: {}", e))
        })?;

        Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .header("cache-control", "no-cache, no-store, must-revalidate")
            .body(Full::new(Bytes::from(json)))
            .map_err(RedirectorError::from)
    }

    /// Build error response
    fn error_response(
        &self,
        status: StatusCode,
        stage: Option<String>,
        message: &str,
    ) -> Result<Response<Full<Bytes>>> {
        let response = ReloadResponse {
            success: false,
            stage,
            message: message.to_string(),
            report: None,
        };

        self.json_response(status, &response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
remap:
  path: "map.csv"
mirrors:
  - host: "fra.example.com"
    path: "/dl"
    latitude: 50.11
    longitude: 8.68
regions:
  eu: ["fra.example.com"]
"#;

    fn write_fixture(dir: &TempDir, config: &str, remap: &str) -> PathBuf {
        let remap_path = dir.path().join("map.csv");
        fs::write(&remap_path, remap).unwrap();
        let config = config.replace("map.csv", &remap_path.display().to_string());
        let config_path = dir.path().join("redirector.yaml");
        fs::write(&config_path, config).unwrap();
        config_path
    }

    fn handler(config_path: PathBuf) -> ReloadHandler {
        ReloadHandler::new(Arc::new(TopologyController::empty()), config_path)
            .with_auth(Some("secret-token".to_string()))
            .with_metrics(RedirectorMetrics::new().unwrap())
    }

    fn request(auth: Option<&str>) -> Request<()> {
        let mut builder = Request::builder().method(Method::POST).uri("/reload");
        if let Some(auth) = auth {
            builder = builder.header("authorization", auth);
        }
        builder.body(()).unwrap()
    }

    async fn body_json(response: Response<Full<Bytes>>) -> ReloadResponse {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_reload_success() {
        let dir = TempDir::new().unwrap();
        let handler = handler(write_fixture(&dir, CONFIG, "a|b\n"));

        let response = handler
            .handle_reload(request(Some("Bearer secret-token")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert!(body.success);
        let report = body.report.unwrap();
        assert_eq!(report.mirrors, 1);
        assert_eq!(report.remap_entries, Some(1));

        assert_eq!(handler.controller.resolve_remap("a"), Some("b".to_string()));
        assert_eq!(handler.metrics.as_ref().unwrap().get_stats().reloads_succeeded, 1);
    }

    #[tokio::test]
    async fn test_reload_requires_token() {
        let dir = TempDir::new().unwrap();
        let handler = handler(write_fixture(&dir, CONFIG, "a|b\n"));

        for auth in [None, Some("Bearer wrong"), Some("secret-token"), Some("Basic secret-token")] {
            let response = handler.handle_reload(request(auth)).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{:?}", auth);
        }

        assert_eq!(handler.controller.current().generation(), 0);
        assert_eq!(handler.metrics.as_ref().unwrap().get_stats().reload_auth_failures, 4);
    }

    #[tokio::test]
    async fn test_reload_refused_without_configured_token() {
        let dir = TempDir::new().unwrap();
        let handler = ReloadHandler::new(
            Arc::new(TopologyController::empty()),
            write_fixture(&dir, CONFIG, "a|b\n"),
        )
        .with_auth(Some(String::new()));

        let response = handler.handle_reload(request(Some("Bearer "))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_bad_remap_reports_stage() {
        let dir = TempDir::new().unwrap();
        let handler = handler(write_fixture(&dir, CONFIG, "a|b|c\n"));

        let response = handler
            .handle_reload(request(Some("Bearer secret-token")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert!(!body.success);
        assert_eq!(body.stage.as_deref(), Some("remap_parse"));
        assert_eq!(handler.controller.current().generation(), 0);
        assert_eq!(handler.metrics.as_ref().unwrap().get_stats().reloads_failed, 1);
    }

    #[tokio::test]
    async fn test_missing_config_reports_config_stage() {
        let dir = TempDir::new().unwrap();
        let handler = handler(dir.path().join("absent.yaml"));

        let err = handler.reload().unwrap_err();
        assert_eq!(err.reload_stage(), Some(ReloadStage::Config));
    }

    #[tokio::test]
    async fn test_unknown_region_member_reports_topology_stage() {
        let dir = TempDir::new().unwrap();
        let config = CONFIG.replace(r#"eu: ["fra.example.com"]"#, r#"eu: ["nowhere.example.com"]"#);
        let handler = handler(write_fixture(&dir, &config, "a|b\n"));

        let err = handler.reload().unwrap_err();
        assert_eq!(err.reload_stage(), Some(ReloadStage::Topology));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_reload_waits_off_the_runtime() {
        let dir = TempDir::new().unwrap();
        let handler = handler(write_fixture(&dir, CONFIG, "a|b\n"));
        let controller = Arc::clone(&handler.controller);

        let guard = controller.hold_reload_lock();
        let pending = tokio::spawn({
            let handler = handler.clone();
            async move {
                handler
                    .handle_reload(request(Some("Bearer secret-token")))
                    .await
            }
        });

        // The only runtime thread keeps running while the reload waits
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());
        assert_eq!(controller.current().generation(), 0);

        drop(guard);
        let response = pending.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(controller.current().generation(), 1);
    }

    #[tokio::test]
    async fn test_wrong_method() {
        let dir = TempDir::new().unwrap();
        let handler = handler(write_fixture(&dir, CONFIG, "a|b\n"));

        let req = Request::builder()
            .method(Method::DELETE)
            .uri("/reload")
            .header("authorization", "Bearer secret-token")
            .body(())
            .unwrap();
        let response = handler.handle_reload(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
