//! HTTP surface for `POST /api/webhook` (spec.md §6). Raw `hyper`, same
//! accept-loop/`service_fn`/`Full<Bytes>` shape as
//! `monitoring::server::MetricsServer` — this crate reaches for a web
//! framework nowhere, webhook ingestion included.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use super::dispatcher::WebhookDispatcher;
use super::payload::WebhookPayload;

#[derive(Debug, Clone)]
pub struct WebhookServerConfig {
    pub listen_addr: SocketAddr,
    pub webhook_path: String,
}

impl Default for WebhookServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".parse().unwrap(),
            webhook_path: "/api/webhook".to_string(),
        }
    }
}

pub struct WebhookServer {
    config: WebhookServerConfig,
    dispatcher: Arc<WebhookDispatcher>,
}

impl WebhookServer {
    pub fn new(config: WebhookServerConfig, dispatcher: Arc<WebhookDispatcher>) -> Self {
        Self { config, dispatcher }
    }

    /// Runs indefinitely, accepting connections and spawning one task per
    /// connection. Meant to be spawned into `TradingSystem`'s supervised
    /// task set.
    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .context("failed to bind webhook server")?;

        info!(
            "webhook server listening on http://{}{}",
            self.config.listen_addr, self.config.webhook_path
        );

        let dispatcher = self.dispatcher.clone();
        let webhook_path = self.config.webhook_path.clone();

        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("failed to accept webhook connection: {}", e);
                    continue;
                }
            };

            let dispatcher = dispatcher.clone();
            let webhook_path = webhook_path.clone();

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req: Request<Incoming>| {
                    let dispatcher = dispatcher.clone();
                    let webhook_path = webhook_path.clone();
                    async move { handle_request(req, dispatcher, webhook_path).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("webhook connection error from {}: {}", remote_addr, err);
                }
            });
        }
    }
}

async fn handle_request(
    req: Request<Incoming>,
    dispatcher: Arc<WebhookDispatcher>,
    webhook_path: String,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    if path == "/health" || path == "/healthz" {
        return Ok(plain_response(StatusCode::OK, "OK"));
    }

    if method != Method::POST || path != webhook_path {
        warn!("unknown webhook endpoint requested: {} {}", method, path);
        return Ok(plain_response(StatusCode::NOT_FOUND, "Not Found"));
    }

    let body = match req.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error!("failed to read webhook body: {}", e);
            return Ok(plain_response(StatusCode::BAD_REQUEST, "failed to read request body"));
        }
    };

    let payload = match WebhookPayload::parse(&body) {
        Ok(payload) => payload,
        Err(e) => {
            // A transport/parse failure, not a business rejection — this
            // is the one case spec.md §6 carves out for non-200.
            warn!("malformed webhook payload: {}", e);
            return Ok(json_response(StatusCode::BAD_REQUEST, &format!(r#"{{"success":false,"message":"{e}"}}"#)));
        }
    };

    let response = dispatcher.dispatch(payload).await;
    let body = serde_json::to_string(&response).unwrap_or_else(|_| r#"{"success":false,"message":"failed to encode response"}"#.to_string());
    Ok(json_response(StatusCode::OK, &body))
}

fn plain_response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

fn json_response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_binds_expected_path() {
        let config = WebhookServerConfig::default();
        assert_eq!(config.webhook_path, "/api/webhook");
        assert_eq!(config.listen_addr.port(), 8080);
    }
}
