//! HTTP front end of the redirector
//!
//! Routes:
//! - `/status` - liveness, plain `OK`
//! - `/reload` - authenticated topology reload ([`ReloadHandler`])
//! - `/mirrors` - JSON summary of the live topology
//! - `/dl_map` - JSON dump of the live remap table, 404 without one
//! - `/geoip` - JSON location of the caller
//! - anything else - `302 Found` to the selected mirror

use crate::error::{RedirectorError, Result};
use crate::redirect::{RedirectDecision, RedirectEngine};
use crate::reload_handler::ReloadHandler;
use bytes::Bytes;
use http::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE, LOCATION};
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Header carrying the great-circle distance to the chosen mirror
pub const GEO_DISTANCE_HEADER: &str = "x-geo-distance";

/// Redirect server
pub struct RedirectServer {
    engine: Arc<RedirectEngine>,
    reload: Arc<ReloadHandler>,
}

impl RedirectServer {
    pub fn new(engine: Arc<RedirectEngine>, reload: Arc<ReloadHandler>) -> Self {
        Self { engine, reload }
    }

    /// Bind `addr` and serve until the process exits
    pub async fn start(self: Arc<Self>, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("Redirect server listening on http://{}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener, one task each
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let io = TokioIo::new(stream);
            let server = Arc::clone(&self);

            tokio::task::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let server = Arc::clone(&server);
                    async move { Ok::<_, Infallible>(server.handle(req, peer).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Error serving connection from {}: {:?}", peer, err);
                }
            });
        }
    }

    /// Answer a single request from `peer`
    pub async fn handle<B>(&self, req: Request<B>, peer: SocketAddr) -> Response<Full<Bytes>> {
        let path = req.uri().path().to_string();
        match path.as_str() {
            "/status" => text_response(StatusCode::OK, "text/plain", "OK"),
            "/reload" => match self.reload.handle_reload(req).await {
                Ok(response) => response,
                Err(e) => error_response(&e),
            },
            "/mirrors" => json_response(StatusCode::OK, &self.engine.controller().summary()),
            "/dl_map" => {
                let snapshot = self.engine.controller().current();
                match snapshot.remap() {
                    Some(table) => json_response(StatusCode::OK, table),
                    None => text_response(StatusCode::NOT_FOUND, "text/plain", "404 Not Found"),
                }
            }
            "/geoip" => json_response(StatusCode::OK, &self.engine.locate_client(peer.ip())),
            path => {
                let scheme = req.uri().scheme_str();
                match self.engine.decide(path, scheme, peer.ip()) {
                    Ok(decision) => redirect_response(&decision),
                    Err(e) => error_response(&e),
                }
            }
        }
    }
}

fn redirect_response(decision: &RedirectDecision) -> Response<Full<Bytes>> {
    let location = match decision
        .location()
        .and_then(|url| header_value(url.as_str()))
    {
        Ok(location) => location,
        Err(e) => return error_response(&e),
    };

    let mut response = text_response(StatusCode::FOUND, "text/plain", "");
    let headers = response.headers_mut();
    headers.insert(LOCATION, location);

    if let Some(distance) = decision.distance.filter(|d| *d > 0.0) {
        if let Ok(value) = header_value(&format!("{:.6}", distance)) {
            headers.insert(GEO_DISTANCE_HEADER, value);
        }
    }

    response
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| RedirectorError::HttpError(format!("invalid header value {}: {}", value, e)))
}

fn error_response(err: &RedirectorError) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(err.to_http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    text_response(status, "text/plain; charset=utf-8", format!("{}\n", err))
}

/// Build a response with a fixed content type
pub(crate) fn text_response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Serialize `body` as JSON
pub(crate) fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(body) {
        Ok(json) => {
            let mut response = text_response(status, "application/json; charset=utf-8", json);
            response.headers_mut().insert(
                CACHE_CONTROL,
                HeaderValue::from_static("no-cache, no-store, must-revalidate"),
            );
            response
        }
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                "failed to serialize response",
            )
        }
    }
}
