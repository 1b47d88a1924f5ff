//! Conversion webhook server
//!
//! The API server posts a `ConversionReview` whenever it needs an
//! InMemoryChannel in a version other than the stored one.

use std::net::SocketAddr;
use std::path::Path;

use axum::routing::{get, post};
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use kube::core::conversion::ConversionReview;
use tracing::info;

use imc_conversion::review::convert_review;

/// Error type for webhook serving
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// Certificate or key could not be loaded
    #[error("failed to load webhook TLS material: {0}")]
    Tls(#[source] std::io::Error),

    /// The listener failed
    #[error("webhook server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Routes served by the webhook
pub fn router() -> Router {
    Router::new()
        .route("/convert", post(convert_handler))
        .route("/healthz", get(healthz))
}

async fn convert_handler(Json(review): Json<ConversionReview>) -> Json<ConversionReview> {
    Json(convert_review(review))
}

async fn healthz() -> &'static str {
    "ok"
}

/// Serve the webhook over TLS until the process exits
pub async fn serve(addr: SocketAddr, cert: &Path, key: &Path) -> Result<(), WebhookError> {
    let tls_config = RustlsConfig::from_pem_file(cert, key)
        .await
        .map_err(WebhookError::Tls)?;

    info!(addr = %addr, "Starting conversion webhook server");

    axum_server::bind_rustls(addr, tls_config)
        .serve(router().into_make_service())
        .await
        .map_err(WebhookError::Serve)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn review(desired: &str, objects: serde_json::Value) -> ConversionReview {
        serde_json::from_value(json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "ConversionReview",
            "request": {
                "uid": "0000-1111",
                "desiredAPIVersion": desired,
                "objects": objects,
            }
        }))
        .unwrap()
    }

    /// Story: a stored v1 object is served to a v1beta1 client
    #[tokio::test]
    async fn story_convert_handler_downgrades() {
        let request = review(
            "messaging.knative.dev/v1beta1",
            json!([{
                "apiVersion": "messaging.knative.dev/v1",
                "kind": "InMemoryChannel",
                "metadata": {"name": "test-imc", "namespace": "test-namespace"},
                "spec": {"delivery": {"retry": 3, "backoffPolicy": "linear", "timeout": "PT5S"}}
            }]),
        );

        let Json(out) = convert_handler(Json(request)).await;
        let response = out.response.unwrap();

        assert!(response.result.is_success());
        assert_eq!(response.uid, "0000-1111");
        let obj = &response.converted_objects[0];
        assert_eq!(obj["apiVersion"], "messaging.knative.dev/v1beta1");
        assert_eq!(obj["spec"]["delivery"]["backoffPolicy"], "linear");
        assert!(obj["spec"]["delivery"].get("timeout").is_none());
    }

    #[tokio::test]
    async fn test_convert_handler_reports_failure() {
        let request = review(
            "messaging.knative.dev/v1",
            json!([{
                "apiVersion": "messaging.knative.dev/v1beta1",
                "kind": "InMemoryChannel",
                "metadata": {"name": "test-imc", "namespace": "test-namespace"},
                "spec": {"delivery": {"backoffPolicy": "fibonacci"}}
            }]),
        );

        let Json(out) = convert_handler(Json(request)).await;
        assert!(out.response.unwrap().result.is_failure());
    }

    #[tokio::test]
    async fn test_healthz() {
        assert_eq!(healthz().await, "ok");
    }

    #[tokio::test]
    async fn test_missing_tls_material_is_an_error() {
        let err = serve(
            "127.0.0.1:0".parse().unwrap(),
            Path::new("/nonexistent/tls.crt"),
            Path::new("/nonexistent/tls.key"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WebhookError::Tls(_)));
    }
}
